//! Exchange-rate lookups for approved expenses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use reimburse_core::config::{CurrencyConfig, CurrencyProvider};
use reimburse_core::currency::{Conversion, CurrencyConverter, StaticRateConverter};
use reimburse_core::errors::ApplicationError;

pub type RateTable = HashMap<String, Decimal>;

/// Source of the rate table for one base currency.
#[async_trait]
pub trait RateFetcher: Send + Sync {
    async fn fetch(&self, base: &str) -> Result<RateTable, ApplicationError>;
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: HashMap<String, serde_json::Number>,
}

/// `GET {base_url}/{BASE}` against an exchangerate-api style endpoint.
pub struct HttpRateFetcher {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpRateFetcher {
    pub fn new(config: &CurrencyConfig) -> Result<Self, ApplicationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| {
                ApplicationError::Configuration(format!("failed to build rate client: {error}"))
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl RateFetcher for HttpRateFetcher {
    async fn fetch(&self, base: &str) -> Result<RateTable, ApplicationError> {
        let url = format!("{}/{base}", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            ApplicationError::Integration(format!("exchange rate request failed: {error}"))
        })?;
        if !response.status().is_success() {
            return Err(ApplicationError::Integration(format!(
                "exchange rate endpoint returned {}",
                response.status()
            )));
        }

        let payload: RatesResponse = response.json().await.map_err(|error| {
            ApplicationError::Integration(format!("failed to decode exchange rates: {error}"))
        })?;
        Ok(payload
            .rates
            .into_iter()
            .filter_map(|(code, rate)| {
                parse_rate(&rate).map(|rate| (code.trim().to_ascii_uppercase(), rate))
            })
            .collect())
    }
}

fn parse_rate(number: &serde_json::Number) -> Option<Decimal> {
    let raw = number.to_string();
    raw.parse::<Decimal>().ok().or_else(|| Decimal::from_scientific(&raw).ok())
}

struct CachedRates {
    rates: RateTable,
    fetched_at: Instant,
}

/// Live-rate converter with a per-base cache.
///
/// Tables older than the TTL are refetched; when the refetch fails the stale
/// table is used. With nothing cached the fetch error propagates.
pub struct ExchangeRateApiConverter {
    fetcher: Arc<dyn RateFetcher>,
    ttl: Duration,
    cache: RwLock<HashMap<String, CachedRates>>,
}

impl ExchangeRateApiConverter {
    pub fn new(config: &CurrencyConfig) -> Result<Self, ApplicationError> {
        let fetcher = HttpRateFetcher::new(config)?;
        Ok(Self::with_fetcher(Arc::new(fetcher), Duration::from_secs(config.cache_ttl_secs)))
    }

    pub fn with_fetcher(fetcher: Arc<dyn RateFetcher>, ttl: Duration) -> Self {
        Self { fetcher, ttl, cache: RwLock::new(HashMap::new()) }
    }

    async fn rates_for(&self, base: &str) -> Result<RateTable, ApplicationError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(base) {
                if cached.fetched_at.elapsed() < self.ttl {
                    debug!(event_name = "currency.rates.cache_hit", base = %base, "using cached rates");
                    return Ok(cached.rates.clone());
                }
            }
        }

        match self.fetcher.fetch(base).await {
            Ok(rates) => {
                info!(
                    event_name = "currency.rates.fetched",
                    base = %base,
                    rate_count = rates.len(),
                    "exchange rates refreshed"
                );
                let mut cache = self.cache.write().await;
                cache.insert(
                    base.to_string(),
                    CachedRates { rates: rates.clone(), fetched_at: Instant::now() },
                );
                Ok(rates)
            }
            Err(error) => {
                let cache = self.cache.read().await;
                match cache.get(base) {
                    Some(stale) => {
                        warn!(
                            event_name = "currency.rates.stale",
                            base = %base,
                            age_secs = stale.fetched_at.elapsed().as_secs(),
                            error = %error,
                            "rate refresh failed; using stale table"
                        );
                        Ok(stale.rates.clone())
                    }
                    None => Err(error),
                }
            }
        }
    }
}

#[async_trait]
impl CurrencyConverter for ExchangeRateApiConverter {
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

        let rates = self.rates_for(&from).await?;
        let rate = rates.get(&to).ok_or_else(|| {
            ApplicationError::Integration(format!("exchange rates for {from} carry no {to} rate"))
        })?;
        Conversion::at_rate(amount, *rate)
    }
}

pub fn build_converter(
    config: &CurrencyConfig,
) -> Result<Arc<dyn CurrencyConverter>, ApplicationError> {
    match config.provider {
        CurrencyProvider::Static => {
            Ok(Arc::new(StaticRateConverter::from_pairs(&config.static_rates)?))
        }
        CurrencyProvider::ExchangeRateApi => Ok(Arc::new(ExchangeRateApiConverter::new(config)?)),
    }
}
