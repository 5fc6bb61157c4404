//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// Re-export component configs so embedders can build them directly
pub use crate::gas::GasConfig;
pub use crate::threat::ThreatConfig;

use crate::ledger::SpendLimits;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc: RpcConfig,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub threat: ThreatConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Contract registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Optional whitelist override file merged on top of the built-in table
    #[serde(default)]
    pub override_path: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            override_path: None,
        }
    }
}

/// Spending ledger limits
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_transaction_usd")]
    pub max_transaction_usd: f64,
    #[serde(default = "default_daily_limit_usd")]
    pub daily_limit_usd: f64,
    #[serde(default = "default_weekly_limit_usd")]
    pub weekly_limit_usd: f64,
    #[serde(default = "default_monthly_limit_usd")]
    pub monthly_limit_usd: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_transaction_usd: default_max_transaction_usd(),
            daily_limit_usd: default_daily_limit_usd(),
            weekly_limit_usd: default_weekly_limit_usd(),
            monthly_limit_usd: default_monthly_limit_usd(),
        }
    }
}

impl LimitsConfig {
    pub fn to_spend_limits(&self) -> SpendLimits {
        SpendLimits {
            max_transaction_usd: self.max_transaction_usd,
            daily_limit_usd: self.daily_limit_usd,
            weekly_limit_usd: self.weekly_limit_usd,
            monthly_limit_usd: self.monthly_limit_usd,
        }
    }
}

/// Approval workflow configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// Backstop poll interval while waiting on a decision
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Timeout applied when a caller does not pass one explicitly
    #[serde(default = "default_approval_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            default_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

/// Which signing technology backs the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerBackendKind {
    Local,
    Managed,
    Hardware,
}

/// Signing backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_backend")]
    pub backend: SignerBackendKind,

    /// Environment variable holding the local hex private key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,

    /// Custody API base URL (managed backend)
    #[serde(default)]
    pub custody_url: String,

    /// Environment variable holding the custody API key
    #[serde(default = "default_custody_api_key_env")]
    pub custody_api_key_env: String,

    /// Account address for the hardware backend
    #[serde(default)]
    pub hardware_address: String,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            backend: default_signer_backend(),
            private_key_env: default_private_key_env(),
            custody_url: String::new(),
            custody_api_key_env: default_custody_api_key_env(),
            hardware_address: String::new(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://eth.llamarpc.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_chain_id() -> u64 {
    1
}

fn default_max_transaction_usd() -> f64 {
    500.0
}

fn default_daily_limit_usd() -> f64 {
    1_000.0
}

fn default_weekly_limit_usd() -> f64 {
    5_000.0
}

fn default_monthly_limit_usd() -> f64 {
    15_000.0
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_approval_timeout_secs() -> u64 {
    4 * 3600
}

fn default_signer_backend() -> SignerBackendKind {
    SignerBackendKind::Local
}

fn default_private_key_env() -> String {
    "SENTINEL_PRIVATE_KEY".to_string()
}

fn default_custody_api_key_env() -> String {
    "SENTINEL_CUSTODY_API_KEY".to_string()
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.max_retries", default_max_retries() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SENTINEL_)
            .add_source(
                config::Environment::with_prefix("SENTINEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.endpoint.is_empty() {
            anyhow::bail!("rpc.endpoint must be set");
        }

        if self.chain_id == 0 {
            anyhow::bail!("chain_id must be nonzero");
        }

        // Gas ceilings
        if self.gas.max_fee_gwei == 0 {
            anyhow::bail!("gas.max_fee_gwei must be positive");
        }
        if self.gas.max_priority_fee_gwei > self.gas.max_fee_gwei {
            anyhow::bail!("gas.max_priority_fee_gwei cannot exceed gas.max_fee_gwei");
        }
        if self.gas.small_payload_bytes >= self.gas.medium_payload_bytes {
            anyhow::bail!("gas.small_payload_bytes must be below gas.medium_payload_bytes");
        }

        // Spend limits, ordered per-transaction <= daily <= weekly <= monthly
        if self.limits.max_transaction_usd <= 0.0 {
            anyhow::bail!("limits.max_transaction_usd must be positive");
        }
        if self.limits.daily_limit_usd < self.limits.max_transaction_usd {
            anyhow::bail!("limits.daily_limit_usd cannot be below max_transaction_usd");
        }
        if self.limits.weekly_limit_usd < self.limits.daily_limit_usd {
            anyhow::bail!("limits.weekly_limit_usd cannot be below daily_limit_usd");
        }
        if self.limits.monthly_limit_usd < self.limits.weekly_limit_usd {
            anyhow::bail!("limits.monthly_limit_usd cannot be below weekly_limit_usd");
        }

        // Approval workflow
        if self.approval.poll_interval_ms == 0 {
            anyhow::bail!("approval.poll_interval_ms must be positive");
        }
        if self.approval.default_timeout_secs == 0 {
            anyhow::bail!("approval.default_timeout_secs must be positive");
        }

        // Threat detector
        if self.threat.unlimited_approval_bits == 0 || self.threat.unlimited_approval_bits > 255 {
            anyhow::bail!("threat.unlimited_approval_bits must be in 1..=255");
        }

        // Signer backend wiring
        match self.signer.backend {
            SignerBackendKind::Managed => {
                if self.signer.custody_url.is_empty() {
                    anyhow::bail!("signer.custody_url must be set for the managed backend");
                }
            }
            SignerBackendKind::Hardware => {
                if self.signer.hardware_address.is_empty() {
                    anyhow::bail!("signer.hardware_address must be set for the hardware backend");
                }
                self.signer
                    .hardware_address
                    .parse::<alloy::primitives::Address>()
                    .map_err(|e| anyhow::anyhow!("signer.hardware_address is invalid: {}", e))?;
            }
            SignerBackendKind::Local => {}
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
  Chain:
    id: {}
  Gas:
    max_fee: {} gwei
    max_priority_fee: {} gwei
  Threat:
    strict: {}
  Limits:
    per_tx: ${}
    daily: ${}
    weekly: ${}
    monthly: ${}
  Approval:
    poll_interval: {}ms
    default_timeout: {}s
  Signer:
    backend: {:?}
    custody_url: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.chain_id,
            self.gas.max_fee_gwei,
            self.gas.max_priority_fee_gwei,
            self.threat.strict,
            self.limits.max_transaction_usd,
            self.limits.daily_limit_usd,
            self.limits.weekly_limit_usd,
            self.limits.monthly_limit_usd,
            self.approval.poll_interval_ms,
            self.approval.default_timeout_secs,
            self.signer.backend,
            if self.signer.custody_url.is_empty() {
                "(not set)".to_string()
            } else {
                mask_url(&self.signer.custody_url)
            },
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                endpoint: default_rpc_endpoint(),
                timeout_ms: default_timeout_ms(),
                max_retries: default_max_retries(),
            },
            chain_id: default_chain_id(),
            gas: GasConfig::default(),
            threat: ThreatConfig::default(),
            registry: RegistryConfig::default(),
            limits: LimitsConfig::default(),
            approval: ApprovalConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}
