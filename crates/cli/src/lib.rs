pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "reimburse",
    about = "Reimburse operator CLI",
    long_about = "Apply migrations, inspect configuration, check readiness and preview approval rules offline.",
    after_help = "Examples:\n  reimburse doctor --json\n  reimburse config\n  reimburse evaluate --file rule.json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, currency provider setup, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Evaluate an approval rule against recorded approver actions")]
    Evaluate {
        #[arg(long, value_name = "PATH", help = "JSON file holding { rule, actions }")]
        file: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Evaluate { file } => commands::evaluate::run(&file),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
