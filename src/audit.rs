//! Audit trail
//!
//! One structured event per security-relevant decision, with enough fields
//! to reconstruct why money did or did not move. The default sink emits
//! tracing events; the in-memory sink keeps a capped trail for the
//! approval dashboard to read.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// A security-relevant decision
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ThreatDetected {
        destination: String,
        kind: String,
        severity: String,
        description: String,
    },
    LimitBreached {
        account: String,
        reason: String,
    },
    ApprovalRequested {
        id: String,
        kind: String,
        amount_usd: f64,
    },
    ApprovalResolved {
        id: String,
        status: String,
    },
    PauseTriggered {
        tier: String,
        reason: String,
    },
    PauseCleared {
        tier: String,
    },
    TransactionExecuted {
        tx_hash: String,
        destination: String,
        amount_usd: f64,
    },
    TransactionFailed {
        stage: String,
        reason: String,
    },
}

/// A timestamped audit entry
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// Receives one event per security-relevant decision
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured tracing events
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::ThreatDetected {
                destination,
                kind,
                severity,
                description,
            } => warn!(
                destination = %destination,
                kind = %kind,
                severity = %severity,
                "threat detected: {}",
                description
            ),
            AuditEvent::LimitBreached { account, reason } => {
                warn!(account = %account, "limit breached: {}", reason)
            }
            AuditEvent::ApprovalRequested { id, kind, amount_usd } => {
                info!(id = %id, kind = %kind, amount_usd, "approval requested")
            }
            AuditEvent::ApprovalResolved { id, status } => {
                info!(id = %id, status = %status, "approval resolved")
            }
            AuditEvent::PauseTriggered { tier, reason } => {
                warn!(tier = %tier, "wallet paused: {}", reason)
            }
            AuditEvent::PauseCleared { tier } => info!(tier = %tier, "wallet pause cleared"),
            AuditEvent::TransactionExecuted {
                tx_hash,
                destination,
                amount_usd,
            } => info!(
                tx_hash = %tx_hash,
                destination = %destination,
                amount_usd,
                "transaction executed"
            ),
            AuditEvent::TransactionFailed { stage, reason } => {
                warn!(stage = %stage, "transaction failed: {}", reason)
            }
        }
    }
}

/// In-memory sink keeping the newest entries first, capped for audit reads
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    cap: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_cap(1000)
    }

    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            cap,
        }
    }

    /// Snapshot of the trail, newest first
    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            0,
            AuditEntry {
                at: Utc::now(),
                event,
            },
        );
        entries.truncate(self.cap);
    }
}

/// Sink that discards everything (tests, embedding without observability)
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_newest_first_and_capped() {
        let sink = MemoryAuditSink::with_cap(3);
        for i in 0..5 {
            sink.record(AuditEvent::ApprovalResolved {
                id: i.to_string(),
                status: "approved".into(),
            });
        }

        let trail = sink.snapshot();
        assert_eq!(trail.len(), 3);
        match &trail[0].event {
            AuditEvent::ApprovalResolved { id, .. } => assert_eq!(id, "4"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_entry_serializes_flat() {
        let entry = AuditEntry {
            at: Utc::now(),
            event: AuditEvent::LimitBreached {
                account: "0xabc".into(),
                reason: "daily".into(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"], "limit_breached");
        assert_eq!(json["account"], "0xabc");
    }
}
