//! Threat detector
//!
//! Runs a fixed battery of independent checks over (destination, value,
//! payload) and unions their findings into a [`ValidationVerdict`]. Any
//! critical finding makes the verdict disallowed - no debate.

pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use lazy_static::lazy_static;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::registry::{builtin::PERMIT2, ContractRegistry, RiskTier};

pub use types::{Severity, ThreatFinding, ThreatKind, ValidationVerdict};

/// EIP-7702 delegation designator prefix. A payload carrying this can hand
/// control of the wallet account to arbitrary code.
pub const DELEGATION_MARKER: [u8; 3] = [0xef, 0x01, 0x00];

/// ERC-20 approve(address,uint256)
const SELECTOR_ERC20_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

lazy_static! {
    /// Permit2 functions that grant or move token allowances
    static ref PERMIT2_GRANT_SELECTORS: HashMap<[u8; 4], &'static str> = HashMap::from([
        ([0x87, 0x51, 0x7c, 0x45], "approve(address,address,uint160,uint48)"),
        ([0x2b, 0x67, 0xb5, 0x70], "permit(address,PermitSingle,bytes)"),
        ([0x2a, 0x2d, 0x80, 0xd1], "permit(address,PermitBatch,bytes)"),
        ([0x36, 0xc7, 0x85, 0x16], "transferFrom(address,address,uint160,address)"),
    ]);

    /// Selectors for destructive operations: proxy upgrades, admin swaps,
    /// self-destruct wrappers
    static ref DANGEROUS_SELECTORS: HashMap<[u8; 4], &'static str> = HashMap::from([
        ([0x36, 0x59, 0xcf, 0xe6], "upgradeTo(address)"),
        ([0x4f, 0x1e, 0xf2, 0x86], "upgradeToAndCall(address,bytes)"),
        ([0x8f, 0x28, 0x39, 0x70], "changeAdmin(address)"),
        ([0x41, 0xc0, 0xe1, 0xb5], "kill()"),
        ([0x83, 0x19, 0x7e, 0xf0], "destroy()"),
    ]);
}

/// Threat detector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ThreatConfig {
    /// Reject unknown contracts and treat approval-hub grants as critical
    #[serde(default = "default_strict")]
    pub strict: bool,

    /// Approvals at or above 2^bits are treated as effectively unlimited
    #[serde(default = "default_unlimited_bits")]
    pub unlimited_approval_bits: u32,

    /// Payloads above this size are scanned for batched hidden operations
    #[serde(default = "default_bulk_payload_bytes")]
    pub bulk_payload_bytes: usize,

    /// Address-shaped word count that marks a large payload as suspicious
    #[serde(default = "default_bulk_address_count")]
    pub bulk_address_count: usize,
}

fn default_strict() -> bool {
    true
}
fn default_unlimited_bits() -> u32 {
    200
}
fn default_bulk_payload_bytes() -> usize {
    4096
}
fn default_bulk_address_count() -> usize {
    16
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            strict: default_strict(),
            unlimited_approval_bits: default_unlimited_bits(),
            bulk_payload_bytes: default_bulk_payload_bytes(),
            bulk_address_count: default_bulk_address_count(),
        }
    }
}

impl ThreatConfig {
    fn unlimited_threshold(&self) -> U256 {
        U256::from(1u8) << self.unlimited_approval_bits as usize
    }
}

/// Inspects outbound transactions for known attack signatures
pub struct ThreatDetector {
    registry: Arc<ContractRegistry>,
    config: ThreatConfig,
}

impl ThreatDetector {
    pub fn new(registry: Arc<ContractRegistry>, config: ThreatConfig) -> Self {
        Self { registry, config }
    }

    pub fn strict(&self) -> bool {
        self.config.strict
    }

    /// Run every check and union the findings
    pub fn inspect(
        &self,
        to: Address,
        value: U256,
        payload: &[u8],
        allowed_risk: Option<&[RiskTier]>,
    ) -> ValidationVerdict {
        let mut findings = Vec::new();

        // 1. Whitelist check
        let check = self.registry.validate_target(to, self.config.strict);
        if !check.allowed {
            let kind = if check.record.is_some() {
                ThreatKind::BlockedContract
            } else {
                ThreatKind::UnknownContract
            };
            findings.push(ThreatFinding::critical(
                kind,
                check.reason.clone(),
                "add the contract to the whitelist after review",
            ));
        }

        // 2. Tier-risk check
        if let (Some(allowed), Some(record)) = (allowed_risk, check.record.as_ref()) {
            if !allowed.contains(&record.risk) {
                findings.push(
                    ThreatFinding::critical(
                        ThreatKind::TierRiskMismatch,
                        format!(
                            "{} is {} risk, outside this wallet's tolerance",
                            record.name, record.risk
                        ),
                        "route through a higher tier or review the contract",
                    )
                    .with_details(json!({
                        "contract_risk": record.risk.to_string(),
                        "allowed": allowed.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
                    })),
                );
            }
        }

        // 3. Delegation-hijack signature
        findings.extend(self.check_delegation(payload));

        // 4. Hidden approval grants via the approval hub
        findings.extend(self.check_approval_hub(to, payload));

        // 5. Dangerous selectors
        findings.extend(self.check_dangerous_selector(payload));

        // 6. Excessive ERC-20 approval
        findings.extend(self.check_excessive_approval(payload));

        // 7. Bulk suspicious-payload heuristic
        findings.extend(self.check_bulk_payload(payload));

        let risk = match check.record.as_ref() {
            Some(record) => record.risk,
            None if self.config.strict => RiskTier::Blocked,
            None => RiskTier::High,
        };

        debug!(
            "Inspected tx to {} (value {} wei): {} findings",
            to,
            value,
            findings.len()
        );

        ValidationVerdict {
            findings,
            record: check.record,
            risk,
        }
    }

    fn check_delegation(&self, payload: &[u8]) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        if let Some(offset) = find_subslice(payload, &DELEGATION_MARKER) {
            findings.push(
                ThreatFinding::critical(
                    ThreatKind::DelegationHijack,
                    "payload carries the account-delegation designator; this could hand \
                     control of the wallet to arbitrary code"
                        .into(),
                    "never sign delegation payloads from automated flows",
                )
                .with_details(json!({ "offset": offset })),
            );
            return findings;
        }

        // Structural form: a 23-byte delegation record right-aligned in an
        // ABI word (9 zero bytes, 0xef01 + any version byte, 20-byte address).
        // Catches designator versions the literal marker search would miss.
        for (i, word) in payload.chunks_exact(32).enumerate() {
            if word[..9].iter().all(|b| *b == 0)
                && word[9] == 0xef
                && word[10] == 0x01
                && word[12..].iter().any(|b| *b != 0)
            {
                findings.push(
                    ThreatFinding::critical(
                        ThreatKind::DelegationHijack,
                        "payload embeds a delegation record in an ABI word".into(),
                        "never sign delegation payloads from automated flows",
                    )
                    .with_details(json!({ "word_index": i })),
                );
                break;
            }
        }

        findings
    }

    fn check_approval_hub(&self, to: Address, payload: &[u8]) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        if to == PERMIT2 {
            findings.push(ThreatFinding::warning(
                ThreatKind::HiddenApprovalGrant,
                "direct call to the Permit2 approval hub".into(),
                "verify the spender and amount before proceeding",
            ));

            if let Some(selector) = selector_of(payload) {
                if let Some(name) = PERMIT2_GRANT_SELECTORS.get(&selector) {
                    let description = format!("Permit2 allowance-granting call: {}", name);
                    let finding = if self.config.strict {
                        ThreatFinding::critical(
                            ThreatKind::HiddenApprovalGrant,
                            description,
                            "grant allowances manually, never from the autonomous path",
                        )
                    } else {
                        ThreatFinding::warning(
                            ThreatKind::HiddenApprovalGrant,
                            description,
                            "verify the spender and amount before proceeding",
                        )
                    };
                    findings.push(finding.with_details(json!({
                        "selector": format!("0x{}", hex_bytes(&selector)),
                        "function": name,
                    })));
                }
            }
        } else if let Some(offset) = find_subslice(payload, PERMIT2.as_slice()) {
            // Hub address buried in calldata aimed elsewhere: possibly a
            // disguised grant routed through a multicall or router
            findings.push(
                ThreatFinding::warning(
                    ThreatKind::HiddenApprovalGrant,
                    "payload references the Permit2 approval hub while calling another \
                     contract (possible disguised grant)"
                        .into(),
                    "decode the payload and verify no allowance is granted",
                )
                .with_details(json!({ "offset": offset })),
            );
        }

        findings
    }

    fn check_dangerous_selector(&self, payload: &[u8]) -> Vec<ThreatFinding> {
        let Some(selector) = selector_of(payload) else {
            return Vec::new();
        };

        match DANGEROUS_SELECTORS.get(&selector) {
            Some(name) => vec![ThreatFinding::critical(
                ThreatKind::DangerousSelector,
                format!("destructive operation: {}", name),
                "these operations are never executed autonomously",
            )
            .with_details(json!({
                "selector": format!("0x{}", hex_bytes(&selector)),
                "function": name,
            }))],
            None => Vec::new(),
        }
    }

    fn check_excessive_approval(&self, payload: &[u8]) -> Vec<ThreatFinding> {
        if payload.len() < 68 || selector_of(payload) != Some(SELECTOR_ERC20_APPROVE) {
            return Vec::new();
        }

        let spender = Address::from_slice(&payload[16..36]);
        let amount = U256::from_be_slice(&payload[36..68]);

        if amount == U256::MAX || amount >= self.config.unlimited_threshold() {
            return vec![ThreatFinding::warning(
                ThreatKind::ExcessiveApproval,
                format!("unlimited token approval to {}", spender),
                "approve only the amount the next operation needs",
            )
            .with_details(json!({
                "spender": format!("{:#x}", spender),
                "amount": amount.to_string(),
                "unlimited": amount == U256::MAX,
            }))];
        }

        Vec::new()
    }

    fn check_bulk_payload(&self, payload: &[u8]) -> Vec<ThreatFinding> {
        if payload.len() <= self.config.bulk_payload_bytes {
            return Vec::new();
        }

        let body = if payload.len() > 4 { &payload[4..] } else { payload };
        let address_words = body
            .chunks_exact(32)
            .filter(|word| {
                word[..12].iter().all(|b| *b == 0) && word[12..].iter().any(|b| *b != 0)
            })
            .count();

        if address_words > self.config.bulk_address_count {
            return vec![ThreatFinding::warning(
                ThreatKind::SuspiciousPayload,
                format!(
                    "large payload ({} bytes) carries {} address-shaped words \
                     (possible hidden batched operation)",
                    payload.len(),
                    address_words
                ),
                "decode and review each batched step",
            )
            .with_details(json!({
                "payload_bytes": payload.len(),
                "address_words": address_words,
            }))];
        }

        Vec::new()
    }
}

fn selector_of(payload: &[u8]) -> Option<[u8; 4]> {
    if payload.len() < 4 {
        return None;
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&payload[..4]);
    Some(selector)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
