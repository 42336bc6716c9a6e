use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ApplicationError;

/// Upper-cases a three-letter ISO 4217 style code, or `None` if malformed.
pub fn normalize_currency_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub converted_amount: Decimal,
    pub rate: Decimal,
}

impl Conversion {
    pub fn identity(amount: Decimal) -> Self {
        Self { converted_amount: amount, rate: Decimal::ONE }
    }

    /// Fails when `amount * rate` leaves the `Decimal` range.
    pub fn at_rate(amount: Decimal, rate: Decimal) -> Result<Self, ApplicationError> {
        let product = amount.checked_mul(rate).ok_or_else(|| {
            ApplicationError::Integration(format!(
                "converting {amount} at rate {rate} overflows the supported amount range"
            ))
        })?;
        let converted_amount =
            product.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Ok(Self { converted_amount, rate })
    }
}

#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Conversion, ApplicationError>;
}

/// Converts with a fixed table of rates keyed `(from, to)`.
///
/// Inverse pairs are derived when only one direction is configured.
#[derive(Clone, Debug, Default)]
pub struct StaticRateConverter {
    rates: HashMap<(String, String), Decimal>,
}

impl StaticRateConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: Decimal) -> Self {
        self.insert(from, to, rate);
        self
    }

    pub fn insert(&mut self, from: &str, to: &str, rate: Decimal) {
        self.rates.insert((from.trim().to_ascii_uppercase(), to.trim().to_ascii_uppercase()), rate);
    }

    /// Builds a converter from `FROM:TO = rate` style keys, e.g. `"USD:INR"`.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a String, &'a Decimal)>,
    ) -> Result<Self, ApplicationError> {
        let mut converter = Self::new();
        for (pair, rate) in pairs {
            let Some((from, to)) = pair.split_once(':') else {
                return Err(ApplicationError::Configuration(format!(
                    "static rate key `{pair}` must look like `FROM:TO`"
                )));
            };
            let (Some(from), Some(to)) = (normalize_currency_code(from), normalize_currency_code(to))
            else {
                return Err(ApplicationError::Configuration(format!(
                    "static rate key `{pair}` contains an invalid currency code"
                )));
            };
            if *rate <= Decimal::ZERO {
                return Err(ApplicationError::Configuration(format!(
                    "static rate for `{pair}` must be positive"
                )));
            }
            converter.insert(&from, &to, *rate);
        }
        Ok(converter)
    }

    pub fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let key = (from.to_string(), to.to_string());
        if let Some(rate) = self.rates.get(&key) {
            return Some(*rate);
        }
        self.rates
            .get(&(to.to_string(), from.to_string()))
            .and_then(|rate| Decimal::ONE.checked_div(*rate))
    }
}

#[async_trait]
impl CurrencyConverter for StaticRateConverter {
    async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
    ) -> Result<Conversion, ApplicationError> {
        let from = from.trim().to_ascii_uppercase();
        let to = to.trim().to_ascii_uppercase();
        if from == to {
            return Ok(Conversion::identity(amount));
        }

        let rate = self.rate(&from, &to).ok_or_else(|| {
            ApplicationError::Integration(format!("no exchange rate configured for {from}->{to}"))
        })?;
        Conversion::at_rate(amount, rate)
    }
}
