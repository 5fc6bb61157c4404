//! Spending ledger
//!
//! Tracks spend-over-time-window per account. The check and the append are
//! one atomic step under an account-scoped lock, so two concurrent
//! authorizations can never jointly exceed a window ceiling. Rolling sums
//! recompute from the live record set on every call - no running totals
//! that can desynchronize from pruning.

use std::sync::Arc;

use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// One authorized spend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub amount_usd: f64,
}

/// A recorded-but-uncommitted spend, held while downstream stages run.
/// Voiding it removes the record so an aborted transaction frees its
/// window allowance.
#[derive(Debug, Clone, Copy)]
pub struct SpendReservation {
    pub id: Uuid,
    pub amount_usd: f64,
}

/// Rolling windows over which cumulative spend is bounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendWindow {
    Daily,
    Weekly,
    Monthly,
}

impl SpendWindow {
    pub fn duration(&self) -> Duration {
        match self {
            SpendWindow::Daily => Duration::days(1),
            SpendWindow::Weekly => Duration::days(7),
            SpendWindow::Monthly => Duration::days(30),
        }
    }

    pub const ALL: [SpendWindow; 3] =
        [SpendWindow::Daily, SpendWindow::Weekly, SpendWindow::Monthly];
}

impl std::fmt::Display for SpendWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpendWindow::Daily => write!(f, "daily"),
            SpendWindow::Weekly => write!(f, "weekly"),
            SpendWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Spend limits enforced by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendLimits {
    pub max_transaction_usd: f64,
    pub daily_limit_usd: f64,
    pub weekly_limit_usd: f64,
    pub monthly_limit_usd: f64,
}

impl SpendLimits {
    pub fn window_limit(&self, window: SpendWindow) -> f64 {
        match window {
            SpendWindow::Daily => self.daily_limit_usd,
            SpendWindow::Weekly => self.weekly_limit_usd,
            SpendWindow::Monthly => self.monthly_limit_usd,
        }
    }
}

/// Per-account rolling-window spend accounting
pub struct SpendingLedger {
    limits: SpendLimits,
    accounts: DashMap<Address, Arc<Mutex<Vec<SpendRecord>>>>,
}

impl SpendingLedger {
    pub fn new(limits: SpendLimits) -> Self {
        Self {
            limits,
            accounts: DashMap::new(),
        }
    }

    pub fn limits(&self) -> &SpendLimits {
        &self.limits
    }

    fn account(&self, address: Address) -> Arc<Mutex<Vec<SpendRecord>>> {
        self.accounts
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }

    /// Atomically check every limit and record the spend.
    ///
    /// Checks run in order: per-transaction ceiling first, then each rolling
    /// window. The returned reservation lets the caller void the record if a
    /// later pipeline stage aborts the transaction.
    pub async fn check_and_record(
        &self,
        address: Address,
        amount_usd: f64,
    ) -> Result<SpendReservation> {
        let account = self.account(address);
        let mut records = account.lock().await;

        let now = Utc::now();
        prune_records(&mut records, now);

        if amount_usd > self.limits.max_transaction_usd {
            return Err(Error::TransactionLimitExceeded {
                amount: amount_usd,
                limit: self.limits.max_transaction_usd,
            });
        }

        for window in SpendWindow::ALL {
            let spent = window_sum(&records, window, now);
            let limit = self.limits.window_limit(window);
            if spent + amount_usd > limit {
                return Err(Error::WindowLimitExceeded {
                    window: window.to_string(),
                    spent,
                    requested: amount_usd,
                    limit,
                });
            }
        }

        let record = SpendRecord {
            id: Uuid::new_v4(),
            at: now,
            amount_usd,
        };
        let reservation = SpendReservation {
            id: record.id,
            amount_usd,
        };
        records.push(record);

        debug!(
            "Recorded ${:.2} spend for {} (daily total ${:.2})",
            amount_usd,
            address,
            window_sum(&records, SpendWindow::Daily, now)
        );

        Ok(reservation)
    }

    /// Remove a reserved record after a downstream abort, freeing its
    /// window allowance
    pub async fn void(&self, address: Address, reservation: SpendReservation) {
        let account = self.account(address);
        let mut records = account.lock().await;
        if let Some(pos) = records.iter().position(|r| r.id == reservation.id) {
            records.remove(pos);
            info!(
                "Voided ${:.2} reserved spend for {}",
                reservation.amount_usd, address
            );
        }
    }

    /// Record an already-authorized spend without re-checking limits
    pub async fn record(&self, address: Address, amount_usd: f64) {
        let account = self.account(address);
        let mut records = account.lock().await;
        records.push(SpendRecord {
            id: Uuid::new_v4(),
            at: Utc::now(),
            amount_usd,
        });
    }

    /// Live spend inside a window
    pub async fn window_spend(&self, address: Address, window: SpendWindow) -> f64 {
        let account = self.account(address);
        let records = account.lock().await;
        window_sum(&records, window, Utc::now())
    }

    /// Drop records older than the longest tracked window, for every account
    pub async fn prune(&self) {
        let now = Utc::now();
        for entry in self.accounts.iter() {
            let mut records = entry.value().lock().await;
            prune_records(&mut records, now);
        }
    }
}

fn prune_records(records: &mut Vec<SpendRecord>, now: DateTime<Utc>) {
    let horizon = now - SpendWindow::Monthly.duration();
    records.retain(|r| r.at > horizon);
}

fn window_sum(records: &[SpendRecord], window: SpendWindow, now: DateTime<Utc>) -> f64 {
    let cutoff = now - window.duration();
    records
        .iter()
        .filter(|r| r.at > cutoff)
        .map(|r| r.amount_usd)
        .sum()
}
