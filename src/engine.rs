//! Engine assembly
//!
//! Builds every component from configuration and wires them together:
//! chain client, registry (with the override file merged), threat detector,
//! ledger, approval service, gas estimator, signing backend, and the
//! execution pipeline. All instances are explicit and passed by handle -
//! there is no process-wide state.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::approval::ApprovalService;
use crate::audit::{AuditSink, TracingAuditSink};
use crate::chain::{ChainClient, HttpRpcClient};
use crate::config::{Config, SignerBackendKind};
use crate::error::{Error, Result};
use crate::gas::GasEstimator;
use crate::ledger::SpendingLedger;
use crate::pipeline::ExecutionPipeline;
use crate::price::{PriceOracle, StaticOracle};
use crate::registry::ContractRegistry;
use crate::signer::{HardwareStubSigner, LocalSeedSigner, ManagedApiSigner, SigningBackend};
use crate::threat::ThreatDetector;
use crate::wallet::{TierPolicy, TieredWallet};

/// Assembles a [`SentinelEngine`] from configuration, with override points
/// for the pieces tests and embedders want to swap
pub struct EngineBuilder {
    config: Config,
    chain: Option<Arc<dyn ChainClient>>,
    signer: Option<Arc<dyn SigningBackend>>,
    oracle: Option<Arc<dyn PriceOracle>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            chain: None,
            signer: None,
            oracle: None,
            audit: None,
        }
    }

    /// Use an existing chain client instead of building one from `rpc`
    pub fn with_chain(mut self, chain: Arc<dyn ChainClient>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Use an existing signing backend instead of building one from `signer`
    pub fn with_signer(mut self, signer: Arc<dyn SigningBackend>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PriceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn build(self) -> Result<SentinelEngine> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        let chain: Arc<dyn ChainClient> = match self.chain {
            Some(chain) => chain,
            None => Arc::new(HttpRpcClient::new(
                &config.rpc.endpoint,
                config.rpc.timeout_ms,
            )?),
        };

        let registry = Arc::new(ContractRegistry::from_builtin());
        if let Some(path) = &config.registry.override_path {
            registry.merge_override_file(path)?;
        }

        let audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let oracle: Arc<dyn PriceOracle> =
            self.oracle.unwrap_or_else(|| Arc::new(StaticOracle::new()));

        let detector = Arc::new(ThreatDetector::new(
            Arc::clone(&registry),
            config.threat.clone(),
        ));
        let ledger = Arc::new(SpendingLedger::new(config.limits.to_spend_limits()));
        let approvals = Arc::new(
            ApprovalService::new(Arc::clone(&audit)).with_poll_interval(Duration::from_millis(
                config.approval.poll_interval_ms,
            )),
        );
        let gas = Arc::new(GasEstimator::new(
            Arc::clone(&chain),
            config.gas.clone(),
        ));

        let signer: Arc<dyn SigningBackend> = match self.signer {
            Some(signer) => signer,
            None => build_signer(&config, Arc::clone(&chain))?,
        };

        let pipeline = Arc::new(ExecutionPipeline::new(
            Arc::clone(&chain),
            detector,
            ledger,
            approvals,
            gas,
            oracle,
            Arc::clone(&audit),
            config.chain_id,
        ));

        info!(
            "Sentinel engine assembled: chain {} ({} registry records)",
            config.chain_id,
            registry.len()
        );

        Ok(SentinelEngine {
            pipeline,
            registry,
            signer,
            audit,
        })
    }
}

fn build_signer(config: &Config, chain: Arc<dyn ChainClient>) -> Result<Arc<dyn SigningBackend>> {
    match config.signer.backend {
        SignerBackendKind::Local => {
            let key = std::env::var(&config.signer.private_key_env)
                .map_err(|_| Error::MissingEnvVar(config.signer.private_key_env.clone()))?;
            Ok(Arc::new(LocalSeedSigner::from_hex_key(&key, chain)?))
        }
        SignerBackendKind::Managed => {
            let api_key = std::env::var(&config.signer.custody_api_key_env)
                .map_err(|_| Error::MissingEnvVar(config.signer.custody_api_key_env.clone()))?;
            let address = std::env::var("SENTINEL_SIGNER_ADDRESS")
                .map_err(|_| Error::MissingEnvVar("SENTINEL_SIGNER_ADDRESS".into()))?
                .parse()
                .map_err(|e| Error::Config(format!("bad SENTINEL_SIGNER_ADDRESS: {}", e)))?;
            Ok(Arc::new(ManagedApiSigner::new(
                &config.signer.custody_url,
                &api_key,
                address,
                chain,
            )))
        }
        SignerBackendKind::Hardware => {
            let address = config
                .signer
                .hardware_address
                .parse()
                .map_err(|e| Error::Config(format!("bad hardware address: {}", e)))?;
            Ok(Arc::new(HardwareStubSigner::new(address, chain)))
        }
    }
}

/// The assembled authorization core: one pipeline, one signing backend,
/// and the shared services behind them
pub struct SentinelEngine {
    pipeline: Arc<ExecutionPipeline>,
    registry: Arc<ContractRegistry>,
    signer: Arc<dyn SigningBackend>,
    audit: Arc<dyn AuditSink>,
}

impl SentinelEngine {
    pub fn pipeline(&self) -> &Arc<ExecutionPipeline> {
        &self.pipeline
    }

    pub fn registry(&self) -> &Arc<ContractRegistry> {
        &self.registry
    }

    pub fn signer(&self) -> &Arc<dyn SigningBackend> {
        &self.signer
    }

    /// Bind a tier policy to this engine's signer and pipeline
    pub fn wallet(&self, policy: TierPolicy) -> Result<TieredWallet> {
        TieredWallet::new(
            policy,
            Arc::clone(&self.signer),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.audit),
        )
        .map_err(|e| Error::Config(e.to_string()))
    }
}
