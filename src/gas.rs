//! Gas estimation with tiered safety buffers
//!
//! Converts a raw network estimate into a buffered gas limit plus EIP-1559
//! fee parameters, both capped by policy. Estimation failures fall back to
//! conservative per-tier constants rather than failing the transaction.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::chain::{CallRequest, ChainClient};
use crate::error::{Error, Result};

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Gas plan for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPlan {
    /// Buffered gas limit
    pub limit: u64,
    /// Max fee per gas in wei (2 * base fee + priority, capped)
    pub max_fee_per_gas: u128,
    /// Priority fee per gas in wei (capped)
    pub max_priority_fee_per_gas: u128,
}

impl GasPlan {
    /// Worst-case fee exposure in wei
    pub fn max_cost_wei(&self) -> u128 {
        self.limit as u128 * self.max_fee_per_gas
    }
}

/// Call complexity tier, classified by payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallComplexity {
    /// Bare value transfer, no payload
    Transfer,
    Small,
    Medium,
    Large,
}

impl CallComplexity {
    pub fn classify(payload_len: usize, config: &GasConfig) -> Self {
        if payload_len == 0 {
            CallComplexity::Transfer
        } else if payload_len <= config.small_payload_bytes {
            CallComplexity::Small
        } else if payload_len <= config.medium_payload_bytes {
            CallComplexity::Medium
        } else {
            CallComplexity::Large
        }
    }

    /// Safety-buffer multiplier applied to the raw estimate
    pub fn buffer(&self) -> f64 {
        match self {
            CallComplexity::Transfer => 1.20,
            CallComplexity::Small => 1.30,
            CallComplexity::Medium => 1.50,
            CallComplexity::Large => 2.00,
        }
    }

    /// Conservative raw estimate used when the network cannot provide one
    pub fn fallback_gas(&self) -> u64 {
        match self {
            CallComplexity::Transfer => 21_000,
            CallComplexity::Small => 100_000,
            CallComplexity::Medium => 250_000,
            CallComplexity::Large => 500_000,
        }
    }
}

/// Gas estimator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    /// Ceiling for max fee per gas
    #[serde(default = "default_max_fee_gwei")]
    pub max_fee_gwei: u64,

    /// Ceiling for priority fee per gas
    #[serde(default = "default_max_priority_fee_gwei")]
    pub max_priority_fee_gwei: u64,

    /// Fee cache lifetime
    #[serde(default = "default_fee_cache_ttl_ms")]
    pub fee_cache_ttl_ms: u64,

    /// Payloads up to this size are "small"
    #[serde(default = "default_small_payload_bytes")]
    pub small_payload_bytes: usize,

    /// Payloads up to this size are "medium"; anything larger is "large"
    #[serde(default = "default_medium_payload_bytes")]
    pub medium_payload_bytes: usize,
}

fn default_max_fee_gwei() -> u64 {
    150
}
fn default_max_priority_fee_gwei() -> u64 {
    5
}
fn default_fee_cache_ttl_ms() -> u64 {
    3_000
}
fn default_small_payload_bytes() -> usize {
    256
}
fn default_medium_payload_bytes() -> usize {
    1_024
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            max_fee_gwei: default_max_fee_gwei(),
            max_priority_fee_gwei: default_max_priority_fee_gwei(),
            fee_cache_ttl_ms: default_fee_cache_ttl_ms(),
            small_payload_bytes: default_small_payload_bytes(),
            medium_payload_bytes: default_medium_payload_bytes(),
        }
    }
}

impl GasConfig {
    pub fn max_fee_wei(&self) -> u128 {
        self.max_fee_gwei as u128 * WEI_PER_GWEI
    }

    pub fn max_priority_fee_wei(&self) -> u128 {
        self.max_priority_fee_gwei as u128 * WEI_PER_GWEI
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedFees {
    base_fee: u128,
    priority_fee: u128,
    fetched_at: std::time::Instant,
}

/// Tier-buffered gas estimator with a short-lived fee cache
pub struct GasEstimator {
    chain: Arc<dyn ChainClient>,
    config: GasConfig,
    fees: RwLock<Option<CachedFees>>,
}

impl GasEstimator {
    pub fn new(chain: Arc<dyn ChainClient>, config: GasConfig) -> Self {
        Self {
            chain,
            config,
            fees: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    /// Produce a gas plan for a call.
    ///
    /// A failed network estimate falls back to the tier's conservative
    /// constant; fee data has no safe default, so its failure propagates
    /// (after bounded retry).
    pub async fn estimate(&self, call: &CallRequest) -> Result<GasPlan> {
        let complexity = CallComplexity::classify(call.data.len(), &self.config);

        let raw = match self.chain.estimate_gas(call).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(
                    "Gas estimation failed ({}), falling back to {:?} default",
                    e, complexity
                );
                complexity.fallback_gas()
            }
        };

        let limit = (raw as f64 * complexity.buffer()).ceil() as u64;

        let (base_fee, priority_fee) = self.current_fees().await?;
        let priority = priority_fee.min(self.config.max_priority_fee_wei());
        let max_fee = (2 * base_fee + priority).min(self.config.max_fee_wei());

        debug!(
            "Gas plan: raw {} -> limit {} ({:?} x{}), max_fee {} wei, priority {} wei",
            raw,
            limit,
            complexity,
            complexity.buffer(),
            max_fee,
            priority
        );

        Ok(GasPlan {
            limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority,
        })
    }

    /// Base and priority fee, cached for the configured TTL and fetched
    /// with bounded retry (fee endpoints are flaky under load)
    async fn current_fees(&self) -> Result<(u128, u128)> {
        let ttl = Duration::from_millis(self.config.fee_cache_ttl_ms);

        if let Some(cached) = *self.fees.read().await {
            if cached.fetched_at.elapsed() < ttl {
                return Ok((cached.base_fee, cached.priority_fee));
            }
        }

        let chain = Arc::clone(&self.chain);
        let fetch = || {
            let chain = Arc::clone(&chain);
            async move {
                let base = chain.base_fee().await.map_err(transient)?;
                let priority = chain.priority_fee().await.map_err(transient)?;
                Ok::<(u128, u128), backoff::Error<Error>>((base, priority))
            }
        };

        let (base_fee, priority_fee) = backoff::future::retry(retry_policy(), fetch).await?;

        *self.fees.write().await = Some(CachedFees {
            base_fee,
            priority_fee,
            fetched_at: std::time::Instant::now(),
        });

        Ok((base_fee, priority_fee))
    }
}

fn transient(e: Error) -> backoff::Error<Error> {
    if e.is_retryable() {
        backoff::Error::transient(e)
    } else {
        backoff::Error::permanent(e)
    }
}

fn retry_policy() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_millis(100),
        max_elapsed_time: Some(Duration::from_secs(2)),
        ..ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use alloy::primitives::{Address, Bytes, U256};
    use std::sync::atomic::Ordering;

    fn call_with_payload(len: usize) -> CallRequest {
        CallRequest::new(
            Address::repeat_byte(0x11),
            U256::from(1u64),
            Bytes::from(vec![0xab; len]),
        )
    }

    #[test]
    fn test_complexity_classification() {
        let config = GasConfig::default();
        assert_eq!(
            CallComplexity::classify(0, &config),
            CallComplexity::Transfer
        );
        assert_eq!(CallComplexity::classify(4, &config), CallComplexity::Small);
        assert_eq!(
            CallComplexity::classify(256, &config),
            CallComplexity::Small
        );
        assert_eq!(
            CallComplexity::classify(257, &config),
            CallComplexity::Medium
        );
        assert_eq!(
            CallComplexity::classify(1025, &config),
            CallComplexity::Large
        );
    }

    #[test]
    fn test_buffers_monotonic() {
        assert!(CallComplexity::Transfer.buffer() < CallComplexity::Small.buffer());
        assert!(CallComplexity::Small.buffer() < CallComplexity::Medium.buffer());
        assert!(CallComplexity::Medium.buffer() < CallComplexity::Large.buffer());
    }

    #[tokio::test]
    async fn test_empty_payload_smallest_buffer() {
        let chain = Arc::new(MockChain::default());
        chain.gas_estimate.store(21_000, Ordering::SeqCst);
        let estimator = GasEstimator::new(chain, GasConfig::default());

        let plan = estimator
            .estimate(&call_with_payload(0))
            .await
            .unwrap();
        assert_eq!(plan.limit, (21_000f64 * 1.20).ceil() as u64);
    }

    #[tokio::test]
    async fn test_buffered_limit_monotonic_in_payload_size() {
        let chain = Arc::new(MockChain::default());
        chain.gas_estimate.store(80_000, Ordering::SeqCst);
        let estimator = GasEstimator::new(chain, GasConfig::default());

        let mut last = 0u64;
        for len in [0usize, 100, 600, 3000] {
            let plan = estimator.estimate(&call_with_payload(len)).await.unwrap();
            assert!(
                plan.limit >= last,
                "limit decreased between payload sizes: {} < {}",
                plan.limit,
                last
            );
            last = plan.limit;
        }
    }

    #[tokio::test]
    async fn test_estimation_failure_uses_fallback() {
        let chain = Arc::new(MockChain::default());
        chain.fail_gas_estimate.store(true, Ordering::SeqCst);
        let estimator = GasEstimator::new(chain, GasConfig::default());

        // Bare transfer falls back to 21000 * 1.20
        let plan = estimator.estimate(&call_with_payload(0)).await.unwrap();
        assert_eq!(plan.limit, (21_000f64 * 1.20).ceil() as u64);

        // Large call falls back to 500000 * 2.00
        let plan = estimator.estimate(&call_with_payload(3000)).await.unwrap();
        assert_eq!(plan.limit, 1_000_000);
    }

    #[tokio::test]
    async fn test_fee_formula_and_ceilings() {
        let chain = Arc::new(MockChain::default());
        chain.base_fee.store(20_000_000_000, Ordering::SeqCst); // 20 gwei
        chain.priority_fee.store(1_000_000_000, Ordering::SeqCst); // 1 gwei
        let estimator = GasEstimator::new(Arc::clone(&chain) as Arc<dyn ChainClient>, GasConfig::default());

        let plan = estimator.estimate(&call_with_payload(0)).await.unwrap();
        // 2 * 20 + 1 = 41 gwei, below the 150 gwei ceiling
        assert_eq!(plan.max_fee_per_gas, 41_000_000_000);
        assert_eq!(plan.max_priority_fee_per_gas, 1_000_000_000);
    }

    #[tokio::test]
    async fn test_fee_ceiling_clamps() {
        let chain = Arc::new(MockChain::default());
        chain.base_fee.store(400_000_000_000, Ordering::SeqCst); // 400 gwei spike
        chain.priority_fee.store(50_000_000_000, Ordering::SeqCst); // 50 gwei
        let config = GasConfig::default();
        let estimator = GasEstimator::new(chain, config.clone());

        let plan = estimator.estimate(&call_with_payload(0)).await.unwrap();
        assert_eq!(plan.max_fee_per_gas, config.max_fee_wei());
        assert_eq!(plan.max_priority_fee_per_gas, config.max_priority_fee_wei());
    }

    #[tokio::test]
    async fn test_fee_failure_propagates() {
        let chain = Arc::new(MockChain::default());
        chain.fail_fees.store(true, Ordering::SeqCst);
        let estimator = GasEstimator::new(chain, GasConfig::default());

        let result = estimator.estimate(&call_with_payload(0)).await;
        assert!(matches!(result, Err(Error::FeeData(_))));
    }

    #[tokio::test]
    async fn test_fee_cache_reused_within_ttl() {
        let chain = Arc::new(MockChain::default());
        let estimator = GasEstimator::new(Arc::clone(&chain) as Arc<dyn ChainClient>, GasConfig::default());

        let first = estimator.estimate(&call_with_payload(0)).await.unwrap();

        // A spike inside the TTL is not observed
        chain.base_fee.store(999_000_000_000, Ordering::SeqCst);
        let second = estimator.estimate(&call_with_payload(0)).await.unwrap();
        assert_eq!(first.max_fee_per_gas, second.max_fee_per_gas);
    }
}
