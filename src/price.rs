//! Price oracle interface
//!
//! Price acquisition itself lives outside this crate; the engine only
//! needs "what is one TOKEN worth in QUOTE right now" to convert on-chain
//! values into the ledger's monetary unit. The fallback combinator retries
//! the primary with bounded backoff before consulting the secondary.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use tracing::warn;

use crate::error::{Error, Result};

/// Spot price source
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of one `token` denominated in `quote` (e.g. "ETH", "USD")
    async fn price(&self, token: &str, quote: &str) -> Result<f64>;
}

/// Fixed price table; deterministic pricing for tests and dry runs
pub struct StaticOracle {
    prices: HashMap<(String, String), f64>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    pub fn with_price(mut self, token: &str, quote: &str, price: f64) -> Self {
        self.prices
            .insert((token.to_uppercase(), quote.to_uppercase()), price);
        self
    }
}

impl Default for StaticOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for StaticOracle {
    async fn price(&self, token: &str, quote: &str) -> Result<f64> {
        self.prices
            .get(&(token.to_uppercase(), quote.to_uppercase()))
            .copied()
            .ok_or_else(|| Error::PriceUnavailable {
                token: token.to_string(),
                quote: quote.to_string(),
                reason: "no static price configured".into(),
            })
    }
}

/// Primary oracle with bounded retry, then an optional secondary
pub struct FallbackOracle {
    primary: Arc<dyn PriceOracle>,
    secondary: Option<Arc<dyn PriceOracle>>,
    retry_window: Duration,
}

impl FallbackOracle {
    pub fn new(primary: Arc<dyn PriceOracle>) -> Self {
        Self {
            primary,
            secondary: None,
            retry_window: Duration::from_secs(2),
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn PriceOracle>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_retry_window(mut self, window: Duration) -> Self {
        self.retry_window = window;
        self
    }
}

#[async_trait]
impl PriceOracle for FallbackOracle {
    async fn price(&self, token: &str, quote: &str) -> Result<f64> {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(100),
            max_elapsed_time: Some(self.retry_window),
            ..ExponentialBackoff::default()
        };

        let primary = Arc::clone(&self.primary);
        let attempt = || {
            let primary = Arc::clone(&primary);
            let token = token.to_string();
            let quote = quote.to_string();
            async move {
                primary
                    .price(&token, &quote)
                    .await
                    .map_err(backoff::Error::transient)
            }
        };

        match backoff::future::retry(policy, attempt).await {
            Ok(price) => Ok(price),
            Err(primary_err) => match &self.secondary {
                Some(secondary) => {
                    warn!(
                        "Primary oracle failed for {}/{} ({}), trying secondary",
                        token, quote, primary_err
                    );
                    secondary.price(token, quote).await
                }
                None => Err(primary_err),
            },
        }
    }
}
