//! Human-in-the-loop approval workflow
//!
//! A pending request transitions exactly once: to approved, rejected, or
//! expired. Waiters park on a per-request wake channel so a decision lands
//! immediately; a short poll interval is only the backstop when no push
//! path fires. Abandoning a wait has no effect on the request itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::error::{Error, Result};

/// Lifecycle status of an approval request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalStatus::Pending => write!(f, "pending"),
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
            ApprovalStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A pending authorization awaiting human sign-off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    /// Transaction type ("swap", "lend", "transfer", ...)
    pub kind: String,
    pub amount_usd: f64,
    /// Protocol the funds leave, when known
    pub source: Option<String>,
    /// Protocol the funds enter, when known
    pub destination: Option<String>,
    /// Why the agent wants to do this
    pub rationale: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub gas_estimate_usd: Option<f64>,
    pub rejection_reason: Option<String>,
}

impl ApprovalRequest {
    fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Synchronous decision hook; when configured, `wait` resolves immediately
pub type DecisionCallback = Arc<dyn Fn(&ApprovalRequest) -> bool + Send + Sync>;

struct Entry {
    state: std::sync::Mutex<ApprovalRequest>,
    wake: Notify,
}

/// Manages approval requests and their waiters.
///
/// Requests are never deleted; terminal ones stay in the table for audit
/// until process restart.
pub struct ApprovalService {
    entries: DashMap<Uuid, Arc<Entry>>,
    poll_interval: Duration,
    decision: Option<DecisionCallback>,
    audit: Arc<dyn AuditSink>,
}

impl ApprovalService {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            entries: DashMap::new(),
            poll_interval: Duration::from_millis(250),
            decision: None,
            audit,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Install a synchronous decision callback (demo/testing harness)
    pub fn with_decision_callback(mut self, callback: DecisionCallback) -> Self {
        self.decision = Some(callback);
        self
    }

    /// Create a pending request
    pub fn request(
        &self,
        kind: &str,
        amount_usd: f64,
        source: Option<String>,
        destination: Option<String>,
        rationale: &str,
        timeout: Duration,
        gas_estimate_usd: Option<f64>,
    ) -> ApprovalRequest {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: Uuid::new_v4(),
            kind: kind.to_string(),
            amount_usd,
            source,
            destination,
            rationale: rationale.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now
                + chrono::Duration::from_std(timeout)
                    .unwrap_or_else(|_| chrono::Duration::hours(4)),
            gas_estimate_usd,
            rejection_reason: None,
        };

        info!(
            "Approval requested: {} ${:.2} ({}) expires {}",
            request.kind, request.amount_usd, request.id, request.expires_at
        );
        self.audit.record(AuditEvent::ApprovalRequested {
            id: request.id.to_string(),
            kind: request.kind.clone(),
            amount_usd: request.amount_usd,
        });

        self.entries.insert(
            request.id,
            Arc::new(Entry {
                state: std::sync::Mutex::new(request.clone()),
                wake: Notify::new(),
            }),
        );

        request
    }

    /// Suspend until the request leaves `pending` or expires.
    ///
    /// Waking is push-based via the per-request channel; the poll interval
    /// only covers a missed wake. Multiple callers may wait on the same
    /// request; a caller abandoning its wait leaves the request waitable.
    pub async fn wait(&self, id: Uuid) -> Result<ApprovalStatus> {
        let entry = self.entry(id)?;

        // A configured synchronous decision path resolves immediately
        if let Some(decision) = &self.decision {
            let snapshot = entry.state.lock().unwrap().clone();
            if snapshot.status == ApprovalStatus::Pending {
                let approved = decision(&snapshot);
                debug!("Decision callback for {}: {}", id, approved);
                // Outcome is read back from the state below; a lost race
                // against expiry is handled there, not here
                let _ = if approved {
                    self.approve(id)
                } else {
                    self.reject(id, "rejected by decision callback")
                };
            }
        }

        loop {
            let (status, expires_at) = {
                let mut state = entry.state.lock().unwrap();
                expire_if_due(&mut state, &self.audit);
                (state.status, state.expires_at)
            };

            if status.is_terminal() {
                entry.wake.notify_waiters();
                return Ok(status);
            }

            let until_expiry = (expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            let sleep_for = self.poll_interval.min(until_expiry).max(Duration::from_millis(1));

            tokio::select! {
                _ = entry.wake.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Approve a pending request. Refuses when it is already terminal; a
    /// past-expiry request is auto-transitioned to expired and the caller
    /// gets an error.
    pub fn approve(&self, id: Uuid) -> Result<()> {
        self.transition(id, ApprovalStatus::Approved, None)
    }

    /// Reject a pending request with a reason
    pub fn reject(&self, id: Uuid, reason: &str) -> Result<()> {
        self.transition(id, ApprovalStatus::Rejected, Some(reason.to_string()))
    }

    fn transition(&self, id: Uuid, to: ApprovalStatus, reason: Option<String>) -> Result<()> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().unwrap();

        if state.status.is_terminal() {
            return Err(Error::ApprovalAlreadyResolved {
                id: id.to_string(),
                status: state.status.to_string(),
            });
        }

        if state.is_past_expiry(Utc::now()) {
            expire_if_due(&mut state, &self.audit);
            entry.wake.notify_waiters();
            return Err(Error::ApprovalExpired(id.to_string()));
        }

        state.status = to;
        state.rejection_reason = reason;
        info!("Approval {} -> {}", id, to);
        self.audit.record(AuditEvent::ApprovalResolved {
            id: id.to_string(),
            status: to.to_string(),
        });

        drop(state);
        entry.wake.notify_waiters();
        Ok(())
    }

    /// Snapshot of all requests still pending (past-due ones are expired
    /// on the way out)
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let now = Utc::now();
        let mut pending = Vec::new();
        for entry in self.entries.iter() {
            let mut state = entry.value().state.lock().unwrap();
            if state.status == ApprovalStatus::Pending && state.is_past_expiry(now) {
                expire_if_due(&mut state, &self.audit);
                entry.value().wake.notify_waiters();
            }
            if state.status == ApprovalStatus::Pending {
                pending.push(state.clone());
            }
        }
        pending
    }

    /// Snapshot of one request
    pub fn get(&self, id: Uuid) -> Result<ApprovalRequest> {
        let entry = self.entry(id)?;
        let mut state = entry.state.lock().unwrap();
        expire_if_due(&mut state, &self.audit);
        Ok(state.clone())
    }

    fn entry(&self, id: Uuid) -> Result<Arc<Entry>> {
        self.entries
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| Error::ApprovalNotFound(id.to_string()))
    }
}

fn expire_if_due(state: &mut ApprovalRequest, audit: &Arc<dyn AuditSink>) {
    if state.status == ApprovalStatus::Pending && state.is_past_expiry(Utc::now()) {
        state.status = ApprovalStatus::Expired;
        info!("Approval {} expired", state.id);
        audit.record(AuditEvent::ApprovalResolved {
            id: state.id.to_string(),
            status: ApprovalStatus::Expired.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{MemoryAuditSink, NullAuditSink};

    fn service() -> ApprovalService {
        ApprovalService::new(Arc::new(NullAuditSink)).with_poll_interval(Duration::from_millis(10))
    }

    fn make_request(service: &ApprovalService, timeout: Duration) -> ApprovalRequest {
        service.request(
            "swap",
            1_500.0,
            Some("aave".into()),
            Some("compound".into()),
            "better supply rate",
            timeout,
            None,
        )
    }

    #[tokio::test]
    async fn test_approve_wakes_waiter() {
        let service = Arc::new(service());
        let request = make_request(&service, Duration::from_secs(60));

        let waiter = {
            let service = Arc::clone(&service);
            let id = request.id;
            tokio::spawn(async move { service.wait(id).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        service.approve(request.id).unwrap();

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn test_reject_carries_reason() {
        let service = service();
        let request = make_request(&service, Duration::from_secs(60));

        service.reject(request.id, "rate not worth the gas").unwrap();

        let state = service.get(request.id).unwrap();
        assert_eq!(state.status, ApprovalStatus::Rejected);
        assert_eq!(
            state.rejection_reason.as_deref(),
            Some("rate not worth the gas")
        );
    }

    #[tokio::test]
    async fn test_expiry_is_terminal_and_single() {
        let service = service();
        let request = make_request(&service, Duration::from_millis(30));

        let status = service.wait(request.id).await.unwrap();
        assert_eq!(status, ApprovalStatus::Expired);

        // No transition out of expired
        assert!(matches!(
            service.approve(request.id),
            Err(Error::ApprovalAlreadyResolved { .. })
        ));
        assert!(matches!(
            service.reject(request.id, "late"),
            Err(Error::ApprovalAlreadyResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_decision_on_past_expiry_autotransitions() {
        let service = service();
        let request = make_request(&service, Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(10)).await;

        // The request is past expiry but nothing observed it yet; the
        // approve call must expire it and fail
        assert!(matches!(
            service.approve(request.id),
            Err(Error::ApprovalExpired(_))
        ));
        assert_eq!(
            service.get(request.id).unwrap().status,
            ApprovalStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_terminal_transitions_once() {
        let service = service();
        let request = make_request(&service, Duration::from_secs(60));

        service.approve(request.id).unwrap();
        assert!(matches!(
            service.reject(request.id, "changed my mind"),
            Err(Error::ApprovalAlreadyResolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_pending_snapshot() {
        let service = service();
        let a = make_request(&service, Duration::from_secs(60));
        let b = make_request(&service, Duration::from_secs(60));
        let c = make_request(&service, Duration::from_secs(60));
        service.approve(b.id).unwrap();

        let pending = service.list_pending();
        let ids: Vec<Uuid> = pending.iter().map(|r| r.id).collect();
        assert_eq!(pending.len(), 2);
        assert!(ids.contains(&a.id));
        assert!(ids.contains(&c.id));
    }

    #[tokio::test]
    async fn test_abandoned_wait_leaves_request_waitable() {
        let service = Arc::new(service());
        let request = make_request(&service, Duration::from_secs(60));

        // First caller gives up after its own (short) timeout
        let abandoned = tokio::time::timeout(Duration::from_millis(30), {
            let service = Arc::clone(&service);
            let id = request.id;
            async move { service.wait(id).await }
        })
        .await;
        assert!(abandoned.is_err());

        // Request is untouched and a second caller can still wait
        assert_eq!(
            service.get(request.id).unwrap().status,
            ApprovalStatus::Pending
        );
        service.approve(request.id).unwrap();
        assert_eq!(
            service.wait(request.id).await.unwrap(),
            ApprovalStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_concurrent_waiters_all_resolve() {
        let service = Arc::new(service());
        let request = make_request(&service, Duration::from_secs(60));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let service = Arc::clone(&service);
                let id = request.id;
                tokio::spawn(async move { service.wait(id).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        service.approve(request.id).unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), ApprovalStatus::Approved);
        }
    }

    #[tokio::test]
    async fn test_decision_callback_resolves_immediately() {
        let callback: DecisionCallback = Arc::new(|request| request.amount_usd < 1_000.0);
        let service = ApprovalService::new(Arc::new(NullAuditSink))
            .with_decision_callback(callback);

        let small = service.request("swap", 500.0, None, None, "ok", Duration::from_secs(60), None);
        assert_eq!(
            service.wait(small.id).await.unwrap(),
            ApprovalStatus::Approved
        );

        let large = service.request("swap", 5_000.0, None, None, "big", Duration::from_secs(60), None);
        assert_eq!(
            service.wait(large.id).await.unwrap(),
            ApprovalStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_audit_events_emitted() {
        let sink = Arc::new(MemoryAuditSink::new());
        let service = ApprovalService::new(Arc::clone(&sink) as Arc<dyn AuditSink>);
        let request = make_request(&service, Duration::from_secs(60));
        service.approve(request.id).unwrap();

        assert_eq!(sink.len(), 2); // requested + resolved
    }

    #[tokio::test]
    async fn test_unknown_request() {
        let service = service();
        assert!(matches!(
            service.wait(Uuid::new_v4()).await,
            Err(Error::ApprovalNotFound(_))
        ));
    }
}
