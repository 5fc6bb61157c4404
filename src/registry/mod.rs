//! Contract risk registry
//!
//! Maps destination addresses to a trust classification. Built once from the
//! static built-in table plus an optional operator-supplied override file
//! merged on top by address. Lookups return clones, so a record observed
//! during validation never changes under the caller.

pub mod builtin;

use std::path::Path;

use alloy::primitives::Address;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Trust classification for a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Blocked,
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskTier::Low => write!(f, "low"),
            RiskTier::Medium => write!(f, "medium"),
            RiskTier::High => write!(f, "high"),
            RiskTier::Blocked => write!(f, "blocked"),
        }
    }
}

/// What kind of contract this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractCategory {
    Token,
    LendingPool,
    Router,
    Factory,
    Oracle,
    Wrapper,
    /// Permit-style approval hub able to grant token spending without a
    /// direct `approve` call; gets special scrutiny in the threat detector
    ApprovalHub,
    Governance,
    Other,
}

/// One known contract
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRecord {
    pub address: Address,
    pub name: String,
    pub protocol: String,
    pub category: ContractCategory,
    pub risk: RiskTier,
    pub network: String,
    #[serde(default)]
    pub notes: String,
}

/// Result of validating a destination address against the registry
#[derive(Debug, Clone)]
pub struct TargetCheck {
    pub allowed: bool,
    pub reason: String,
    pub record: Option<ContractRecord>,
}

/// Address-keyed registry of contract trust records
pub struct ContractRegistry {
    records: DashMap<Address, ContractRecord>,
}

impl ContractRegistry {
    /// Build from the built-in table only
    pub fn from_builtin() -> Self {
        let records = DashMap::new();
        for record in builtin::builtin_records() {
            records.insert(record.address, record);
        }
        let registry = Self { records };
        info!("Contract registry loaded: {} built-in records", registry.len());
        registry
    }

    /// Build an empty registry (tests, fully operator-driven deployments)
    pub fn empty() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Merge an override file on top of the current table, keyed by address.
    /// Malformed entries are skipped with a warning; a missing file is an error.
    pub fn merge_override_file<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read override file {:?}: {}", path, e)))?;

        let raw: Vec<serde_json::Value> = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Override file {:?} is not a JSON array: {}", path, e)))?;

        let mut merged = 0usize;
        for (i, entry) in raw.into_iter().enumerate() {
            match serde_json::from_value::<ContractRecord>(entry) {
                Ok(record) => {
                    debug!(
                        "Override: {} -> {} ({})",
                        record.address, record.name, record.risk
                    );
                    self.records.insert(record.address, record);
                    merged += 1;
                }
                Err(e) => {
                    warn!("Skipping malformed override entry {}: {}", i, e);
                }
            }
        }

        info!("Merged {} override records from {:?}", merged, path);
        Ok(merged)
    }

    /// Look up a record by address (read-only snapshot)
    pub fn lookup(&self, address: Address) -> Option<ContractRecord> {
        self.records.get(&address).map(|r| r.clone())
    }

    /// Whether the address is explicitly block-listed
    pub fn is_blocked(&self, address: Address) -> bool {
        self.records
            .get(&address)
            .map(|r| r.risk == RiskTier::Blocked)
            .unwrap_or(false)
    }

    /// Validate a destination address.
    ///
    /// Strict mode rejects anything absent from the table; permissive mode
    /// allows unknown addresses with a warning reason. Blocked records are
    /// rejected in both modes.
    pub fn validate_target(&self, address: Address, strict: bool) -> TargetCheck {
        match self.lookup(address) {
            Some(record) if record.risk == RiskTier::Blocked => TargetCheck {
                reason: format!("{} ({}) is block-listed", record.name, address),
                allowed: false,
                record: Some(record),
            },
            Some(record) => TargetCheck {
                reason: format!("{} ({} risk)", record.name, record.risk),
                allowed: true,
                record: Some(record),
            },
            None if strict => TargetCheck {
                allowed: false,
                reason: format!("{} is not in the contract registry", address),
                record: None,
            },
            None => TargetCheck {
                allowed: true,
                reason: format!("{} is unknown; allowed in permissive mode", address),
                record: None,
            },
        }
    }

    /// Add or replace a record
    pub fn add(&self, record: ContractRecord) {
        self.records.insert(record.address, record);
    }

    /// Administratively remove a record
    pub fn remove(&self, address: Address) -> Option<ContractRecord> {
        self.records.remove(&address).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_lookup() {
        let registry = ContractRegistry::from_builtin();
        let record = registry.lookup(builtin::WETH).expect("WETH should exist");
        assert_eq!(record.risk, RiskTier::Low);
        assert_eq!(record.category, ContractCategory::Token);
    }

    #[test]
    fn test_approval_hub_present() {
        let registry = ContractRegistry::from_builtin();
        let record = registry
            .lookup(builtin::PERMIT2)
            .expect("Permit2 should exist");
        assert_eq!(record.category, ContractCategory::ApprovalHub);
    }

    #[test]
    fn test_strict_rejects_unknown() {
        let registry = ContractRegistry::from_builtin();
        let check = registry.validate_target(Address::repeat_byte(0x42), true);
        assert!(!check.allowed);
        assert!(check.record.is_none());
        assert!(check.reason.contains("not in the contract registry"));
    }

    #[test]
    fn test_permissive_allows_unknown_with_warning() {
        let registry = ContractRegistry::from_builtin();
        let check = registry.validate_target(Address::repeat_byte(0x42), false);
        assert!(check.allowed);
        assert!(check.reason.contains("permissive"));
    }

    #[test]
    fn test_blocked_rejected_in_both_modes() {
        let registry = ContractRegistry::empty();
        registry.add(ContractRecord {
            address: Address::repeat_byte(0x66),
            name: "drainer".into(),
            protocol: "unknown".into(),
            category: ContractCategory::Other,
            risk: RiskTier::Blocked,
            network: "mainnet".into(),
            notes: String::new(),
        });

        assert!(registry.is_blocked(Address::repeat_byte(0x66)));
        assert!(!registry.validate_target(Address::repeat_byte(0x66), true).allowed);
        assert!(!registry.validate_target(Address::repeat_byte(0x66), false).allowed);
    }

    #[test]
    fn test_override_merge_replaces_by_address() {
        let registry = ContractRegistry::from_builtin();
        let original = registry.lookup(builtin::WETH).unwrap();
        assert_eq!(original.risk, RiskTier::Low);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = format!(
            r#"[
                {{"address": "{:#x}", "name": "WETH (override)", "protocol": "weth",
                  "category": "token", "risk": "medium", "network": "mainnet"}},
                {{"address": "not-an-address", "name": "bad"}}
            ]"#,
            builtin::WETH
        );
        file.write_all(json.as_bytes()).unwrap();

        let merged = registry.merge_override_file(file.path()).unwrap();
        assert_eq!(merged, 1); // malformed entry skipped, not fatal

        let replaced = registry.lookup(builtin::WETH).unwrap();
        assert_eq!(replaced.risk, RiskTier::Medium);
        assert_eq!(replaced.name, "WETH (override)");
    }

    #[test]
    fn test_whitelist_override_defeats_block() {
        let registry = ContractRegistry::empty();
        let addr = Address::repeat_byte(0x77);
        registry.add(ContractRecord {
            address: addr,
            name: "suspect".into(),
            protocol: "unknown".into(),
            category: ContractCategory::Other,
            risk: RiskTier::Blocked,
            network: "mainnet".into(),
            notes: String::new(),
        });
        assert!(registry.is_blocked(addr));

        // Operator re-lists the address; merge-by-address replaces the block row
        registry.add(ContractRecord {
            address: addr,
            name: "suspect (cleared)".into(),
            protocol: "unknown".into(),
            category: ContractCategory::Other,
            risk: RiskTier::High,
            network: "mainnet".into(),
            notes: "manually reviewed".into(),
        });
        assert!(!registry.is_blocked(addr));
        assert!(registry.validate_target(addr, true).allowed);
    }

    #[test]
    fn test_remove() {
        let registry = ContractRegistry::from_builtin();
        let before = registry.len();
        assert!(registry.remove(builtin::WETH).is_some());
        assert_eq!(registry.len(), before - 1);
        assert!(registry.lookup(builtin::WETH).is_none());
    }
}
