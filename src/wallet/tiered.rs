//! Tiered wallet
//!
//! Binds one policy profile to one signing backend and routes every
//! value-moving call through the execution pipeline. The wallet owns the
//! tier's runtime state: the pause flag, daily counters, and the balance
//! estimate. An auto-pausing tier flips its pause flag on any limit breach
//! and reports the reason to the optional pause hook.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{Error, Result};
use crate::pipeline::{ExecutionPipeline, ExecutionReport, Stage, TransactionIntent};
use crate::signer::{SignableRequest, SigningBackend};

use super::policy::{TierPolicy, TierRuntimeState, WalletTier};

/// Called with the pause reason when an auto-pausing tier trips
pub type PauseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// A signing backend wrapped in a tier policy
pub struct TieredWallet {
    policy: TierPolicy,
    signer: Arc<dyn SigningBackend>,
    pipeline: Arc<ExecutionPipeline>,
    audit: Arc<dyn AuditSink>,
    state: RwLock<TierRuntimeState>,
    pause_hook: Option<PauseHook>,
}

impl TieredWallet {
    pub fn new(
        policy: TierPolicy,
        signer: Arc<dyn SigningBackend>,
        pipeline: Arc<ExecutionPipeline>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            signer,
            pipeline,
            audit,
            state: RwLock::new(TierRuntimeState::new_today()),
            pause_hook: None,
        })
    }

    pub fn with_pause_hook(mut self, hook: PauseHook) -> Self {
        self.pause_hook = Some(hook);
        self
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Balance of the native asset (None) or an ERC-20 token
    pub async fn balance(&self, token: Option<Address>) -> Result<U256> {
        self.signer.balance(token).await
    }

    /// Snapshot of the runtime state, after the daily rollover check
    pub async fn state(&self) -> TierRuntimeState {
        let mut state = self.state.write().await;
        state.reset_if_new_day();
        state.clone()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    /// Pause all execution with a reason
    pub async fn pause(&self, reason: &str) {
        let mut state = self.state.write().await;
        state.paused = true;
        state.pause_reason = Some(reason.to_string());
        warn!("{} wallet paused: {}", self.policy.tier, reason);
        self.audit.record(AuditEvent::PauseTriggered {
            tier: self.policy.tier.to_string(),
            reason: reason.to_string(),
        });
        if let Some(hook) = &self.pause_hook {
            hook(reason);
        }
    }

    /// Clear the pause flag
    pub async fn resume(&self) {
        let mut state = self.state.write().await;
        state.paused = false;
        state.pause_reason = None;
        info!("{} wallet resumed", self.policy.tier);
        self.audit.record(AuditEvent::PauseCleared {
            tier: self.policy.tier.to_string(),
        });
    }

    pub async fn set_balance_estimate(&self, usd: f64) {
        self.state.write().await.balance_estimate_usd = usd;
    }

    /// Execute a transaction under this tier's policy.
    ///
    /// The manual tier never signs non-interactively; use
    /// [`prepare_for_signing`](Self::prepare_for_signing) there instead.
    pub async fn execute(&self, intent: &TransactionIntent) -> Result<ExecutionReport> {
        if self.policy.tier == WalletTier::Manual {
            return Err(Error::ManualSigningRequired);
        }

        self.check_not_paused().await?;

        let result = self
            .pipeline
            .execute(
                self.signer.as_ref(),
                intent,
                &self.policy.execution_policy(),
            )
            .await;

        match result {
            Ok(report) => {
                self.record_success(&report).await;
                Ok(report)
            }
            Err(failure) => {
                if failure.stage == Stage::LimitCheck && self.policy.auto_pause_on_breach {
                    self.pause(&failure.error.to_string()).await;
                }
                Err(failure.into_error())
            }
        }
    }

    /// Run the safety stages and emit a signable description for an
    /// external signer instead of a signature. The only transaction path
    /// the manual tier exposes.
    pub async fn prepare_for_signing(
        &self,
        intent: &TransactionIntent,
    ) -> Result<SignableRequest> {
        self.check_not_paused().await?;

        let (prepared, amount_usd) = self
            .pipeline
            .prepare(
                self.signer.as_ref(),
                intent,
                &self.policy.execution_policy(),
            )
            .await
            .map_err(|failure| failure.into_error())?;

        let summary = format!(
            "{}: ${:.2} to {:#x} ({})",
            intent.kind, amount_usd, intent.to, intent.rationale
        );
        Ok(prepared.describe(&summary))
    }

    async fn check_not_paused(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.reset_if_new_day();
        if state.paused {
            let reason = state
                .pause_reason
                .clone()
                .unwrap_or_else(|| "no reason recorded".into());
            return Err(Error::WalletPaused(reason));
        }
        Ok(())
    }

    async fn record_success(&self, report: &ExecutionReport) {
        let mut state = self.state.write().await;
        state.reset_if_new_day();
        state.spent_today_usd += report.amount_usd;
        state.tx_count_today += 1;
        state.last_tx_at = Some(Utc::now());
        state.balance_estimate_usd =
            (state.balance_estimate_usd - report.amount_usd).max(0.0);

        if state.balance_estimate_usd > self.policy.max_balance_usd {
            warn!(
                "{} wallet balance estimate ${:.2} exceeds tier ceiling ${:.2}; \
                 sweep excess to a higher tier",
                self.policy.tier, state.balance_estimate_usd, self.policy.max_balance_usd
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalService, DecisionCallback};
    use crate::audit::MemoryAuditSink;
    use crate::chain::mock::MockChain;
    use crate::chain::ChainClient;
    use crate::gas::{GasConfig, GasEstimator};
    use crate::ledger::SpendingLedger;
    use crate::price::StaticOracle;
    use crate::registry::{builtin, ContractRegistry};
    use crate::signer::{HardwareStubSigner, LocalSeedSigner};
    use crate::threat::{ThreatConfig, ThreatDetector};
    use alloy::primitives::{Bytes, U256};
    use alloy::signers::local::PrivateKeySigner;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn build_pipeline(
        chain: Arc<MockChain>,
        policy: &TierPolicy,
        decision: Option<DecisionCallback>,
    ) -> (Arc<ExecutionPipeline>, Arc<MemoryAuditSink>) {
        let chain_dyn: Arc<dyn ChainClient> = chain as Arc<dyn ChainClient>;
        let audit = Arc::new(MemoryAuditSink::new());
        let audit_dyn: Arc<dyn AuditSink> = Arc::clone(&audit) as Arc<dyn AuditSink>;

        let registry = Arc::new(ContractRegistry::from_builtin());
        let detector = Arc::new(ThreatDetector::new(registry, ThreatConfig::default()));
        let ledger = Arc::new(SpendingLedger::new(policy.spend_limits()));
        let mut approvals = ApprovalService::new(Arc::clone(&audit_dyn))
            .with_poll_interval(Duration::from_millis(10));
        if let Some(decision) = decision {
            approvals = approvals.with_decision_callback(decision);
        }
        let gas = Arc::new(GasEstimator::new(Arc::clone(&chain_dyn), GasConfig::default()));
        let oracle = Arc::new(StaticOracle::new().with_price("ETH", "USD", 3_000.0));

        let pipeline = Arc::new(ExecutionPipeline::new(
            chain_dyn,
            detector,
            ledger,
            Arc::new(approvals),
            gas,
            oracle,
            audit_dyn,
            1,
        ));
        (pipeline, audit)
    }

    fn autonomous_wallet(chain: Arc<MockChain>) -> TieredWallet {
        let policy = TierPolicy::autonomous();
        let (pipeline, audit) = build_pipeline(Arc::clone(&chain), &policy, None);
        let signer = Arc::new(LocalSeedSigner::new(
            PrivateKeySigner::random(),
            Arc::clone(&chain) as Arc<dyn ChainClient>,
        ));
        TieredWallet::new(policy, signer, pipeline, audit).unwrap()
    }

    /// 0.125 ETH at $3000 = $375 (both exact in f64)
    fn intent_375_usd() -> TransactionIntent {
        TransactionIntent::transfer(
            builtin::WETH,
            U256::from(125_000_000_000_000_000u128),
            "rebalance",
        )
    }

    #[tokio::test]
    async fn test_autonomous_execute_updates_state() {
        let chain = Arc::new(MockChain::default());
        let wallet = autonomous_wallet(Arc::clone(&chain));
        wallet.set_balance_estimate(1_000.0).await;

        let report = wallet.execute(&intent_375_usd()).await.unwrap();
        assert_eq!(report.amount_usd, 375.0);
        assert_eq!(chain.sent_count(), 1);

        let state = wallet.state().await;
        assert_eq!(state.spent_today_usd, 375.0);
        assert_eq!(state.tx_count_today, 1);
        assert_eq!(state.balance_estimate_usd, 625.0);
        assert!(state.last_tx_at.is_some());
    }

    #[tokio::test]
    async fn test_paused_wallet_refuses() {
        let chain = Arc::new(MockChain::default());
        let wallet = autonomous_wallet(Arc::clone(&chain));

        wallet.pause("manual halt").await;
        let result = wallet.execute(&intent_375_usd()).await;
        assert!(matches!(result, Err(Error::WalletPaused(_))));
        assert_eq!(chain.sent_count(), 0);

        wallet.resume().await;
        assert!(wallet.execute(&intent_375_usd()).await.is_ok());
    }

    #[tokio::test]
    async fn test_limit_breach_auto_pauses_and_fires_hook() {
        let chain = Arc::new(MockChain::default());
        let fired = Arc::new(AtomicBool::new(false));
        let hook: PauseHook = {
            let fired = Arc::clone(&fired);
            Arc::new(move |_reason| fired.store(true, Ordering::SeqCst))
        };
        let wallet = autonomous_wallet(Arc::clone(&chain)).with_pause_hook(hook);

        // $600 transfer against the autonomous $500 per-transaction limit
        let intent = TransactionIntent::transfer(
            builtin::WETH,
            U256::from(200_000_000_000_000_000u128),
            "too big",
        );
        let result = wallet.execute(&intent).await;

        assert!(matches!(result, Err(Error::StageRejected { .. })));
        assert!(wallet.is_paused().await);
        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(chain.sent_count(), 0);

        // Everything is refused while paused, even tiny transfers
        let small = TransactionIntent::transfer(
            builtin::WETH,
            U256::from(1_000_000_000_000_000u128),
            "small",
        );
        assert!(matches!(
            wallet.execute(&small).await,
            Err(Error::WalletPaused(_))
        ));
    }

    #[tokio::test]
    async fn test_approval_tier_waits_for_decision() {
        let chain = Arc::new(MockChain::default());
        let policy = TierPolicy::approval_required();
        let callback: DecisionCallback = Arc::new(|request| request.amount_usd < 1_000.0);
        let (pipeline, _audit) = build_pipeline(Arc::clone(&chain), &policy, Some(callback));
        let signer = Arc::new(LocalSeedSigner::new(
            PrivateKeySigner::random(),
            Arc::clone(&chain) as Arc<dyn ChainClient>,
        ));
        let audit: Arc<dyn AuditSink> = Arc::new(MemoryAuditSink::new());
        let wallet = TieredWallet::new(policy, signer, pipeline, audit).unwrap();

        // $375 passes the callback's $1000 bar
        let report = wallet.execute(&intent_375_usd()).await.unwrap();
        assert!(report.approval_id.is_some());

        // $1500 is rejected by the callback
        let big = TransactionIntent::transfer(
            builtin::WETH,
            U256::from(500_000_000_000_000_000u128),
            "half an ether",
        );
        let result = wallet.execute(&big).await;
        assert!(matches!(result, Err(Error::StageRejected { .. })));
        // approval_required does not auto-pause
        assert!(!wallet.is_paused().await);
    }

    #[tokio::test]
    async fn test_manual_tier_never_signs() {
        let chain = Arc::new(MockChain::default());
        let policy = TierPolicy::manual();
        let (pipeline, audit) = build_pipeline(Arc::clone(&chain), &policy, None);
        let signer = Arc::new(HardwareStubSigner::new(
            Address::repeat_byte(0x33),
            Arc::clone(&chain) as Arc<dyn ChainClient>,
        ));
        let wallet = TieredWallet::new(policy, signer, pipeline, audit).unwrap();

        assert!(matches!(
            wallet.execute(&intent_375_usd()).await,
            Err(Error::ManualSigningRequired)
        ));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_manual_tier_prepares_signable_description() {
        let chain = Arc::new(MockChain::default());
        chain.tx_count.store(11, Ordering::SeqCst);
        let policy = TierPolicy::manual();
        let (pipeline, audit) = build_pipeline(Arc::clone(&chain), &policy, None);
        let signer = Arc::new(HardwareStubSigner::new(
            Address::repeat_byte(0x33),
            Arc::clone(&chain) as Arc<dyn ChainClient>,
        ));
        let wallet = TieredWallet::new(policy, signer, pipeline, audit).unwrap();

        let request = wallet
            .prepare_for_signing(&intent_375_usd())
            .await
            .unwrap();

        assert_eq!(request.nonce, 11);
        assert_eq!(request.chain_id, 1);
        assert!(request.summary.contains("$375.00"));
        assert!(request.gas_limit > 21_000); // buffered
        assert_eq!(chain.sent_count(), 0); // nothing ever submitted
    }

    #[tokio::test]
    async fn test_prepare_still_runs_threat_checks() {
        let chain = Arc::new(MockChain::default());
        let policy = TierPolicy::manual();
        let (pipeline, audit) = build_pipeline(Arc::clone(&chain), &policy, None);
        let signer = Arc::new(HardwareStubSigner::new(
            Address::repeat_byte(0x33),
            Arc::clone(&chain) as Arc<dyn ChainClient>,
        ));
        let wallet = TieredWallet::new(policy, signer, pipeline, audit).unwrap();

        let mut data = vec![0u8; 8];
        data.extend_from_slice(&crate::threat::DELEGATION_MARKER);
        let intent = TransactionIntent {
            to: builtin::WETH,
            value: U256::ZERO,
            data: Bytes::from(data),
            kind: "call".into(),
            rationale: "hijack attempt".into(),
            source: None,
            destination: None,
        };

        assert!(matches!(
            wallet.prepare_for_signing(&intent).await,
            Err(Error::StageRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_daily_counters_roll_over() {
        let chain = Arc::new(MockChain::default());
        let wallet = autonomous_wallet(Arc::clone(&chain));

        {
            let mut state = wallet.state.write().await;
            state.day = "2020-01-01".into();
            state.spent_today_usd = 950.0;
            state.tx_count_today = 7;
        }

        let state = wallet.state().await;
        assert_eq!(state.spent_today_usd, 0.0);
        assert_eq!(state.tx_count_today, 0);
    }
}
