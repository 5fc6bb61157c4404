//! Execution pipeline
//!
//! Drives one transaction through build -> simulate -> validate ->
//! limit-check -> approval -> gas-check -> submit, returning either a full
//! execution report or a failure tagged with the exact stage that rejected
//! it. Simulation always precedes signing, and any abort before successful
//! submission resets the nonce allocator and voids the ledger reservation,
//! so a refused transaction leaves no trace in the accounting.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::approval::{ApprovalService, ApprovalStatus};
use crate::audit::{AuditEvent, AuditSink};
use crate::chain::{CallRequest, ChainClient, TxReceipt};
use crate::error::{Error, Result};
use crate::gas::{GasEstimator, GasPlan};
use crate::ledger::{SpendReservation, SpendingLedger};
use crate::price::PriceOracle;
use crate::registry::RiskTier;
use crate::signer::{PreparedTransaction, SigningBackend};
use crate::threat::{Severity, ThreatDetector, ThreatFinding};

const WEI_PER_ETH: f64 = 1e18;
const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Simulate,
    Validate,
    LimitCheck,
    Approval,
    GasCheck,
    Submit,
    Confirm,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Build => "build",
            Stage::Simulate => "simulate",
            Stage::Validate => "validate",
            Stage::LimitCheck => "limit-check",
            Stage::Approval => "approval",
            Stage::GasCheck => "gas-check",
            Stage::Submit => "submit",
            Stage::Confirm => "confirm",
        };
        write!(f, "{}", s)
    }
}

/// A rejection tagged with the stage that produced it, so callers can
/// distinguish "we refused to spend" from "the network failed us"
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: Error,
}

impl StageFailure {
    pub fn into_error(self) -> Error {
        Error::StageRejected {
            stage: self.stage.to_string(),
            reason: self.error.to_string(),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} stage: {}", self.stage, self.error)
    }
}

/// What the agent wants to execute
#[derive(Debug, Clone)]
pub struct TransactionIntent {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    /// Transaction type for the approval surface ("transfer", "swap", ...)
    pub kind: String,
    /// Why the agent wants to do this
    pub rationale: String,
    pub source: Option<String>,
    pub destination: Option<String>,
}

impl TransactionIntent {
    pub fn transfer(to: Address, value: U256, rationale: &str) -> Self {
        Self {
            to,
            value,
            data: Bytes::new(),
            kind: "transfer".into(),
            rationale: rationale.to_string(),
            source: None,
            destination: None,
        }
    }
}

/// Per-execution policy inputs, derived from the wallet tier
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    /// Risk tiers this caller tolerates; None skips the tier check
    pub allowed_risk: Option<Vec<RiskTier>>,
    pub requires_approval: bool,
    pub approval_timeout: Duration,
}

/// Audit of a successful execution: which checks passed and what was spent
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub tx_hash: B256,
    pub nonce: u64,
    pub gas: GasPlan,
    pub amount_usd: f64,
    pub stages_passed: Vec<Stage>,
    pub warnings: Vec<ThreatFinding>,
    pub approval_id: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
}

/// Receipt plus confirmation depth
#[derive(Debug, Clone)]
pub struct ConfirmationOutcome {
    pub receipt: TxReceipt,
    pub confirmations: u64,
}

/// Orchestrates every execution-safety layer for one transaction at a time
pub struct ExecutionPipeline {
    chain: Arc<dyn ChainClient>,
    detector: Arc<ThreatDetector>,
    ledger: Arc<SpendingLedger>,
    approvals: Arc<ApprovalService>,
    gas: Arc<GasEstimator>,
    oracle: Arc<dyn PriceOracle>,
    audit: Arc<dyn AuditSink>,
    chain_id: u64,
    confirm_poll_interval: Duration,
}

impl ExecutionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        detector: Arc<ThreatDetector>,
        ledger: Arc<SpendingLedger>,
        approvals: Arc<ApprovalService>,
        gas: Arc<GasEstimator>,
        oracle: Arc<dyn PriceOracle>,
        audit: Arc<dyn AuditSink>,
        chain_id: u64,
    ) -> Self {
        Self {
            chain,
            detector,
            ledger,
            approvals,
            gas,
            oracle,
            audit,
            chain_id,
            confirm_poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_confirm_poll_interval(mut self, interval: Duration) -> Self {
        self.confirm_poll_interval = interval;
        self
    }

    pub fn approvals(&self) -> &Arc<ApprovalService> {
        &self.approvals
    }

    pub fn ledger(&self) -> &Arc<SpendingLedger> {
        &self.ledger
    }

    /// Run every stage up to and including submission. Returns immediately
    /// after submit with the transaction hash; confirmation is the separate
    /// [`await_confirmation`](Self::await_confirmation) call.
    pub async fn execute(
        &self,
        signer: &dyn SigningBackend,
        intent: &TransactionIntent,
        policy: &ExecutionPolicy,
    ) -> std::result::Result<ExecutionReport, StageFailure> {
        let mut passed = Vec::new();
        let account = signer.address();
        let call = CallRequest::new(intent.to, intent.value, intent.data.clone())
            .with_from(account);

        // Build: resolve the monetary size of this transaction
        let amount_usd = match self.value_in_usd(intent.value).await {
            Ok(amount) => amount,
            Err(e) => return Err(self.fail(Stage::Build, e, None, None).await),
        };
        passed.push(Stage::Build);

        // Simulate before anything signs; a doomed call must not burn fees
        // or a nonce slot
        if let Err(e) = self.chain.call(&call).await {
            signer.reset_nonce().await;
            return Err(self.fail(Stage::Simulate, e, None, None).await);
        }
        passed.push(Stage::Simulate);

        // Validate against the threat battery
        let verdict = self.detector.inspect(
            intent.to,
            intent.value,
            &intent.data,
            policy.allowed_risk.as_deref(),
        );
        for finding in &verdict.findings {
            if finding.severity == Severity::Critical {
                self.audit.record(AuditEvent::ThreatDetected {
                    destination: format!("{:#x}", intent.to),
                    kind: finding.kind.to_string(),
                    severity: finding.severity.to_string(),
                    description: finding.description.clone(),
                });
            }
        }
        if !verdict.allowed() {
            let reason = verdict
                .rejection_reason()
                .unwrap_or_else(|| "rejected by threat detector".into());
            return Err(self
                .fail(Stage::Validate, Error::ThreatRejected { reason }, None, None)
                .await);
        }
        let warnings: Vec<ThreatFinding> =
            verdict.warnings().into_iter().cloned().collect();
        passed.push(Stage::Validate);

        // Limit check: atomic reserve against the spending ledger
        let reservation = if amount_usd > 0.0 {
            match self.ledger.check_and_record(account, amount_usd).await {
                Ok(reservation) => Some(reservation),
                Err(e) => {
                    self.audit.record(AuditEvent::LimitBreached {
                        account: format!("{:#x}", account),
                        reason: e.to_string(),
                    });
                    return Err(self.fail(Stage::LimitCheck, e, None, None).await);
                }
            }
        } else {
            None
        };
        passed.push(Stage::LimitCheck);

        // Approval gate, when the policy demands a human
        let approval_id = if policy.requires_approval {
            match self
                .await_approval(intent, amount_usd, policy.approval_timeout)
                .await
            {
                Ok(id) => {
                    passed.push(Stage::Approval);
                    Some(id)
                }
                Err(e) => {
                    return Err(self
                        .fail(Stage::Approval, e, reservation, Some(account))
                        .await)
                }
            }
        } else {
            None
        };

        // Gas plan plus the submission-time price cap
        let gas = match self.gas.estimate(&call).await {
            Ok(plan) => plan,
            Err(e) => {
                signer.reset_nonce().await;
                return Err(self
                    .fail(Stage::GasCheck, e, reservation, Some(account))
                    .await);
            }
        };
        if let Err(e) = self.check_gas_price_ceiling().await {
            signer.reset_nonce().await;
            return Err(self
                .fail(Stage::GasCheck, e, reservation, Some(account))
                .await);
        }
        passed.push(Stage::GasCheck);

        // Sign and submit
        let nonce = match signer.next_nonce().await {
            Ok(nonce) => nonce,
            Err(e) => {
                return Err(self
                    .fail(Stage::Submit, e, reservation, Some(account))
                    .await)
            }
        };
        let prepared = PreparedTransaction {
            to: intent.to,
            value: intent.value,
            data: intent.data.clone(),
            gas_limit: gas.limit,
            max_fee_per_gas: gas.max_fee_per_gas,
            max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
            nonce,
            chain_id: self.chain_id,
        };

        let tx_hash = match signer.sign_and_send(&prepared).await {
            Ok(hash) => hash,
            Err(e) => {
                signer.reset_nonce().await;
                return Err(self
                    .fail(Stage::Submit, e, reservation, Some(account))
                    .await);
            }
        };
        passed.push(Stage::Submit);

        info!(
            "Executed {} to {} (${:.2}, nonce {}): {}",
            intent.kind, intent.to, amount_usd, nonce, tx_hash
        );
        self.audit.record(AuditEvent::TransactionExecuted {
            tx_hash: format!("{:#x}", tx_hash),
            destination: format!("{:#x}", intent.to),
            amount_usd,
        });

        Ok(ExecutionReport {
            tx_hash,
            nonce,
            gas,
            amount_usd,
            stages_passed: passed,
            warnings,
            approval_id,
            submitted_at: Utc::now(),
        })
    }

    /// Block until the transaction reaches the requested confirmation depth.
    /// Never indefinite: bounded by `timeout` and cancellable via the token.
    pub async fn await_confirmation(
        &self,
        tx_hash: B256,
        required_confirmations: u64,
        timeout: Duration,
        cancel: Option<CancellationToken>,
    ) -> Result<ConfirmationOutcome> {
        let cancel = cancel.unwrap_or_default();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(receipt) = self.chain.receipt(tx_hash).await? {
                let head = self.chain.block_number().await?;
                let confirmations = head.saturating_sub(receipt.block_number) + 1;
                if confirmations >= required_confirmations {
                    debug!(
                        "{} confirmed at depth {} (block {})",
                        tx_hash, confirmations, receipt.block_number
                    );
                    return Ok(ConfirmationOutcome {
                        receipt,
                        confirmations,
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::ConfirmationCancelled(format!("{:#x}", tx_hash)));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(Error::ConfirmationTimeout(format!("{:#x}", tx_hash)));
                }
                _ = tokio::time::sleep(self.confirm_poll_interval) => {}
            }
        }
    }

    /// Run the read-only safety stages (build, simulate, validate,
    /// gas-check) and resolve a transaction without signing, submitting, or
    /// touching the ledger. The manual wallet tier hands the result to an
    /// external signer as a signable description.
    pub async fn prepare(
        &self,
        signer: &dyn SigningBackend,
        intent: &TransactionIntent,
        policy: &ExecutionPolicy,
    ) -> std::result::Result<(PreparedTransaction, f64), StageFailure> {
        let account = signer.address();
        let call = CallRequest::new(intent.to, intent.value, intent.data.clone())
            .with_from(account);

        let amount_usd = match self.value_in_usd(intent.value).await {
            Ok(amount) => amount,
            Err(e) => return Err(self.fail(Stage::Build, e, None, None).await),
        };

        if let Err(e) = self.chain.call(&call).await {
            return Err(self.fail(Stage::Simulate, e, None, None).await);
        }

        let verdict = self.detector.inspect(
            intent.to,
            intent.value,
            &intent.data,
            policy.allowed_risk.as_deref(),
        );
        if !verdict.allowed() {
            let reason = verdict
                .rejection_reason()
                .unwrap_or_else(|| "rejected by threat detector".into());
            return Err(self
                .fail(Stage::Validate, Error::ThreatRejected { reason }, None, None)
                .await);
        }

        let gas = match self.gas.estimate(&call).await {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(Stage::GasCheck, e, None, None).await),
        };
        if let Err(e) = self.check_gas_price_ceiling().await {
            return Err(self.fail(Stage::GasCheck, e, None, None).await);
        }

        let nonce = match signer.next_nonce().await {
            Ok(nonce) => nonce,
            Err(e) => return Err(self.fail(Stage::Build, e, None, None).await),
        };

        Ok((
            PreparedTransaction {
                to: intent.to,
                value: intent.value,
                data: intent.data.clone(),
                gas_limit: gas.limit,
                max_fee_per_gas: gas.max_fee_per_gas,
                max_priority_fee_per_gas: gas.max_priority_fee_per_gas,
                nonce,
                chain_id: self.chain_id,
            },
            amount_usd,
        ))
    }

    async fn await_approval(
        &self,
        intent: &TransactionIntent,
        amount_usd: f64,
        timeout: Duration,
    ) -> Result<Uuid> {
        let request = self.approvals.request(
            &intent.kind,
            amount_usd,
            intent.source.clone(),
            intent.destination.clone(),
            &intent.rationale,
            timeout,
            None,
        );

        match self.approvals.wait(request.id).await? {
            ApprovalStatus::Approved => Ok(request.id),
            ApprovalStatus::Rejected => {
                let reason = self
                    .approvals
                    .get(request.id)
                    .ok()
                    .and_then(|r| r.rejection_reason)
                    .unwrap_or_else(|| "no reason given".into());
                Err(Error::ApprovalRejected {
                    id: request.id.to_string(),
                    reason,
                })
            }
            ApprovalStatus::Expired => Err(Error::ApprovalExpired(request.id.to_string())),
            ApprovalStatus::Pending => Err(Error::Internal(
                "wait returned while request still pending".into(),
            )),
        }
    }

    async fn check_gas_price_ceiling(&self) -> Result<()> {
        let current = self.chain.gas_price().await?;
        let ceiling = self.gas.config().max_fee_wei();
        if current > ceiling {
            return Err(Error::GasPriceExceedsCeiling {
                current_gwei: (current / WEI_PER_GWEI) as u64,
                ceiling_gwei: self.gas.config().max_fee_gwei,
            });
        }
        Ok(())
    }

    async fn value_in_usd(&self, value: U256) -> Result<f64> {
        if value.is_zero() {
            return Ok(0.0);
        }
        let eth = value.saturating_to::<u128>() as f64 / WEI_PER_ETH;
        let price = self.oracle.price("ETH", "USD").await?;
        Ok(eth * price)
    }

    /// Common failure path: void any ledger reservation, audit, tag the stage
    async fn fail(
        &self,
        stage: Stage,
        error: Error,
        reservation: Option<SpendReservation>,
        account: Option<Address>,
    ) -> StageFailure {
        if let (Some(reservation), Some(account)) = (reservation, account) {
            self.ledger.void(account, reservation).await;
        }
        warn!("Pipeline aborted at {}: {}", stage, error);
        self.audit.record(AuditEvent::TransactionFailed {
            stage: stage.to_string(),
            reason: error.to_string(),
        });
        StageFailure { stage, error }
    }
}
