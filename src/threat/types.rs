//! Threat detection result types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::{ContractRecord, RiskTier};

/// Category of a detected threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    /// Payload could assign executable code to an account (EIP-7702 style)
    DelegationHijack,
    /// Token-spending authorization routed through the approval hub
    HiddenApprovalGrant,
    UnknownContract,
    BlockedContract,
    SuspiciousPayload,
    DangerousSelector,
    ExcessiveApproval,
    TierRiskMismatch,
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatKind::DelegationHijack => "delegation_hijack",
            ThreatKind::HiddenApprovalGrant => "hidden_approval_grant",
            ThreatKind::UnknownContract => "unknown_contract",
            ThreatKind::BlockedContract => "blocked_contract",
            ThreatKind::SuspiciousPayload => "suspicious_payload",
            ThreatKind::DangerousSelector => "dangerous_selector",
            ThreatKind::ExcessiveApproval => "excessive_approval",
            ThreatKind::TierRiskMismatch => "tier_risk_mismatch",
        };
        write!(f, "{}", s)
    }
}

/// How serious a finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// One structured detection result. Produced per validation call, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatFinding {
    pub kind: ThreatKind,
    pub severity: Severity,
    pub description: String,
    /// Structured evidence (selector, decoded amount, offsets, ...)
    pub details: Value,
    pub recommendation: String,
}

impl ThreatFinding {
    pub fn critical(kind: ThreatKind, description: String, recommendation: &str) -> Self {
        Self {
            kind,
            severity: Severity::Critical,
            description,
            details: Value::Null,
            recommendation: recommendation.to_string(),
        }
    }

    pub fn warning(kind: ThreatKind, description: String, recommendation: &str) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            description,
            details: Value::Null,
            recommendation: recommendation.to_string(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Aggregate verdict over one inspected transaction
#[derive(Debug, Clone)]
pub struct ValidationVerdict {
    pub findings: Vec<ThreatFinding>,
    /// Resolved registry record for the destination, if any
    pub record: Option<ContractRecord>,
    /// Resolved risk tier; Blocked when strict mode resolved nothing
    pub risk: RiskTier,
}

impl ValidationVerdict {
    /// A verdict is allowed iff no finding is critical
    pub fn allowed(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Critical)
    }

    /// Warning-level findings the caller may attach to its audit trail
    pub fn warnings(&self) -> Vec<&ThreatFinding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect()
    }

    /// Joined description of every critical finding; None when allowed
    pub fn rejection_reason(&self) -> Option<String> {
        let reasons: Vec<&str> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .map(|f| f.description.as_str())
            .collect();
        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_forces_disallow() {
        let verdict = ValidationVerdict {
            findings: vec![
                ThreatFinding::warning(ThreatKind::SuspiciousPayload, "w".into(), ""),
                ThreatFinding::critical(ThreatKind::DelegationHijack, "c".into(), ""),
            ],
            record: None,
            risk: RiskTier::Low,
        };
        assert!(!verdict.allowed());
        assert_eq!(verdict.rejection_reason().unwrap(), "c");
        assert_eq!(verdict.warnings().len(), 1);
    }

    #[test]
    fn test_warnings_alone_allow() {
        let verdict = ValidationVerdict {
            findings: vec![ThreatFinding::warning(
                ThreatKind::ExcessiveApproval,
                "big".into(),
                "bound the amount",
            )],
            record: None,
            risk: RiskTier::Medium,
        };
        assert!(verdict.allowed());
        assert!(verdict.rejection_reason().is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
