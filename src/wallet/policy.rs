//! Tier policy profiles
//!
//! Three profiles share one shape with different numbers: autonomous
//! (small, self-driving), approval-required (mid-size, human in the loop),
//! and manual (hardware-backed, prepare-only). A policy is immutable once
//! constructed; all mutable per-tier state lives in [`TierRuntimeState`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::SpendLimits;
use crate::pipeline::ExecutionPolicy;
use crate::registry::RiskTier;

/// Named wallet policy profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletTier {
    Autonomous,
    ApprovalRequired,
    Manual,
}

impl std::fmt::Display for WalletTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletTier::Autonomous => write!(f, "autonomous"),
            WalletTier::ApprovalRequired => write!(f, "approval_required"),
            WalletTier::Manual => write!(f, "manual"),
        }
    }
}

/// Immutable tier configuration: limits, risk tolerance, approval rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier: WalletTier,
    /// Ceiling on how much the wallet should hold at all
    pub max_balance_usd: f64,
    pub max_transaction_usd: f64,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
    pub requires_approval: bool,
    pub approval_timeout_secs: u64,
    /// Flip the pause flag on any limit breach
    pub auto_pause_on_breach: bool,
    /// Contract risk tiers this wallet may transact with
    pub allowed_risk: Vec<RiskTier>,
}

impl TierPolicy {
    /// Low-limit self-driving tier: small amounts, lowest-risk contracts
    /// only, pauses itself on any limit breach
    pub fn autonomous() -> Self {
        Self {
            tier: WalletTier::Autonomous,
            max_balance_usd: 2_000.0,
            max_transaction_usd: 500.0,
            daily_limit_usd: 1_000.0,
            weekly_limit_usd: 5_000.0,
            monthly_limit_usd: 15_000.0,
            requires_approval: false,
            approval_timeout_secs: 300,
            auto_pause_on_breach: true,
            allowed_risk: vec![RiskTier::Low],
        }
    }

    /// Mid-limit tier: every transaction waits on human sign-off
    pub fn approval_required() -> Self {
        Self {
            tier: WalletTier::ApprovalRequired,
            max_balance_usd: 25_000.0,
            max_transaction_usd: 5_000.0,
            daily_limit_usd: 10_000.0,
            weekly_limit_usd: 50_000.0,
            monthly_limit_usd: 150_000.0,
            requires_approval: true,
            approval_timeout_secs: 4 * 3600,
            auto_pause_on_breach: false,
            allowed_risk: vec![RiskTier::Low, RiskTier::Medium],
        }
    }

    /// Hardware-backed tier: effectively unlimited ceilings, always requires
    /// approval, and only ever prepares transactions for external signing
    pub fn manual() -> Self {
        Self {
            tier: WalletTier::Manual,
            max_balance_usd: 1e15,
            max_transaction_usd: 1e15,
            daily_limit_usd: 1e15,
            weekly_limit_usd: 1e15,
            monthly_limit_usd: 1e15,
            requires_approval: true,
            approval_timeout_secs: 24 * 3600,
            auto_pause_on_breach: false,
            allowed_risk: vec![RiskTier::Low, RiskTier::Medium, RiskTier::High],
        }
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    /// The ledger limits this policy implies
    pub fn spend_limits(&self) -> SpendLimits {
        SpendLimits {
            max_transaction_usd: self.max_transaction_usd,
            daily_limit_usd: self.daily_limit_usd,
            weekly_limit_usd: self.weekly_limit_usd,
            monthly_limit_usd: self.monthly_limit_usd,
        }
    }

    /// The per-execution inputs the pipeline needs
    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            allowed_risk: Some(self.allowed_risk.clone()),
            requires_approval: self.requires_approval,
            approval_timeout: self.approval_timeout(),
        }
    }

    /// Fatal-at-startup sanity checks
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_transaction_usd <= 0.0 {
            anyhow::bail!("max_transaction_usd must be positive");
        }
        if self.daily_limit_usd < self.max_transaction_usd {
            anyhow::bail!("daily_limit_usd cannot be below max_transaction_usd");
        }
        if self.weekly_limit_usd < self.daily_limit_usd {
            anyhow::bail!("weekly_limit_usd cannot be below daily_limit_usd");
        }
        if self.monthly_limit_usd < self.weekly_limit_usd {
            anyhow::bail!("monthly_limit_usd cannot be below weekly_limit_usd");
        }
        if self.allowed_risk.is_empty() {
            anyhow::bail!("allowed_risk must permit at least one tier");
        }
        if self.allowed_risk.contains(&RiskTier::Blocked) {
            anyhow::bail!("allowed_risk cannot include blocked");
        }
        if self.requires_approval && self.approval_timeout_secs == 0 {
            anyhow::bail!("approval_timeout_secs must be positive when approval is required");
        }
        Ok(())
    }
}

/// Mutable per-tier state; day-scoped fields reset on wall-clock date change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRuntimeState {
    /// UTC date the daily counters belong to
    pub day: String,
    pub paused: bool,
    pub pause_reason: Option<String>,
    pub balance_estimate_usd: f64,
    pub spent_today_usd: f64,
    pub tx_count_today: u32,
    pub last_tx_at: Option<DateTime<Utc>>,
}

impl TierRuntimeState {
    pub fn new_today() -> Self {
        Self {
            day: Utc::now().format("%Y-%m-%d").to_string(),
            paused: false,
            pause_reason: None,
            balance_estimate_usd: 0.0,
            spent_today_usd: 0.0,
            tx_count_today: 0,
            last_tx_at: None,
        }
    }

    pub fn is_today(&self) -> bool {
        self.day == Utc::now().format("%Y-%m-%d").to_string()
    }

    /// Reset the day-scoped counters on date change; pause state and the
    /// balance estimate carry over
    pub fn reset_if_new_day(&mut self) {
        if !self.is_today() {
            self.day = Utc::now().format("%Y-%m-%d").to_string();
            self.spent_today_usd = 0.0;
            self.tx_count_today = 0;
        }
    }
}

impl Default for TierRuntimeState {
    fn default() -> Self {
        Self::new_today()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_validate() {
        TierPolicy::autonomous().validate().unwrap();
        TierPolicy::approval_required().validate().unwrap();
        TierPolicy::manual().validate().unwrap();
    }

    #[test]
    fn test_autonomous_shape() {
        let policy = TierPolicy::autonomous();
        assert!(!policy.requires_approval);
        assert!(policy.auto_pause_on_breach);
        assert_eq!(policy.allowed_risk, vec![RiskTier::Low]);
        assert!(policy.max_transaction_usd <= 500.0);
    }

    #[test]
    fn test_approval_required_shape() {
        let policy = TierPolicy::approval_required();
        assert!(policy.requires_approval);
        assert!(!policy.auto_pause_on_breach);
        assert_eq!(policy.approval_timeout(), Duration::from_secs(4 * 3600));
        assert!(policy.allowed_risk.contains(&RiskTier::Medium));
    }

    #[test]
    fn test_manual_shape() {
        let policy = TierPolicy::manual();
        assert!(policy.requires_approval);
        assert!(policy.allowed_risk.contains(&RiskTier::High));
        assert!(policy.max_transaction_usd >= 1e12);
    }

    #[test]
    fn test_invalid_policies_rejected() {
        let mut policy = TierPolicy::autonomous();
        policy.daily_limit_usd = 100.0; // below max_transaction
        assert!(policy.validate().is_err());

        let mut policy = TierPolicy::autonomous();
        policy.allowed_risk = vec![RiskTier::Blocked];
        assert!(policy.validate().is_err());

        let mut policy = TierPolicy::autonomous();
        policy.allowed_risk.clear();
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_policy_serde_round_trip() {
        for policy in [
            TierPolicy::autonomous(),
            TierPolicy::approval_required(),
            TierPolicy::manual(),
        ] {
            let json = serde_json::to_string(&policy).unwrap();
            let reloaded: TierPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(policy, reloaded);
        }
    }

    #[test]
    fn test_runtime_state_serde_round_trip() {
        let state = TierRuntimeState {
            day: "2026-08-07".into(),
            paused: true,
            pause_reason: Some("daily limit".into()),
            balance_estimate_usd: 1_234.56,
            spent_today_usd: 950.0,
            tx_count_today: 4,
            last_tx_at: Some(Utc::now()),
        };

        let json = serde_json::to_string(&state).unwrap();
        let reloaded: TierRuntimeState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, reloaded);
    }

    #[test]
    fn test_daily_reset_preserves_pause_and_balance() {
        let mut state = TierRuntimeState {
            day: "2020-01-01".into(),
            paused: true,
            pause_reason: Some("breach".into()),
            balance_estimate_usd: 500.0,
            spent_today_usd: 950.0,
            tx_count_today: 4,
            last_tx_at: None,
        };

        state.reset_if_new_day();
        assert_eq!(state.spent_today_usd, 0.0);
        assert_eq!(state.tx_count_today, 0);
        assert!(state.paused);
        assert_eq!(state.balance_estimate_usd, 500.0);
        assert!(state.is_today());
    }
}
