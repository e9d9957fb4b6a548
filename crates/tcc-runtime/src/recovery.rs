//! Recovery pass for stuck transactions
//!
//! TigerStyle: One bounded pass per call; scheduling belongs to the caller.
//!
//! A transaction whose record has not been touched for `recover_duration`
//! is re-driven:
//! - Confirming → confirm sweep
//! - Cancelling, or a ROOT still Trying → cancel sweep
//! - a BRANCH still Trying is left to its root
//!
//! A BRANCH record is only touched once `max_retry_count * recover_duration`
//! has passed since creation, so its root gets the first chance to drive it.
//! Records retried more than `max_retry_count` times are left for operators.

use crate::manager::{Sweep, TransactionManager};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tcc_core::{RecoveryConfig, Result, Transaction, TransactionStatus, TransactionType};
use tracing::{debug, error, info, instrument, warn};

/// Outcome counts of one recovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Records returned by the stuck-transaction query
    pub scanned: usize,
    pub confirmed: usize,
    pub cancelled: usize,
    /// Records left alone (retry limit, branch window, branch still Trying)
    pub skipped: usize,
    /// Records another writer updated first
    pub conflicts: usize,
    /// Records whose sweep failed this pass
    pub failed: usize,
}

enum Outcome {
    Confirmed,
    Cancelled,
    Skipped,
}

/// Re-drives stuck transactions through the manager's sweeps
pub struct TransactionRecovery {
    manager: Arc<TransactionManager>,
    config: RecoveryConfig,
}

impl TransactionRecovery {
    pub fn new(manager: Arc<TransactionManager>, config: RecoveryConfig) -> Self {
        Self { manager, config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Run one recovery pass
    ///
    /// Only the stuck-transaction query itself can fail the pass; per-record
    /// failures are logged and counted.
    #[instrument(skip(self))]
    pub async fn recover_once(&self) -> Result<RecoveryReport> {
        let now = self.manager.time().now_utc();
        let recover_duration = duration_ms(self.config.recover_duration_ms());
        let since = now
            .checked_sub_signed(recover_duration)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stuck = self
            .manager
            .repository()
            .find_all_unmodified_since(since)
            .await?;

        let mut report = RecoveryReport {
            scanned: stuck.len(),
            ..Default::default()
        };

        for transaction in stuck {
            let xid = *transaction.xid();
            match self.recover_transaction(transaction).await {
                Ok(Outcome::Confirmed) => report.confirmed += 1,
                Ok(Outcome::Cancelled) => report.cancelled += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) if e.is_optimistic_lock() => {
                    warn!(%xid, error = %e, "Transaction updated concurrently, skipped this pass");
                    report.conflicts += 1;
                }
                Err(e) => {
                    error!(%xid, error = %e, "Transaction recovery failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            confirmed = report.confirmed,
            cancelled = report.cancelled,
            skipped = report.skipped,
            conflicts = report.conflicts,
            failed = report.failed,
            "Recovery pass finished"
        );
        Ok(report)
    }

    async fn recover_transaction(&self, mut transaction: Transaction) -> Result<Outcome> {
        let xid = *transaction.xid();

        if transaction.retried_count() > self.config.max_retry_count {
            error!(
                %xid,
                retried_count = transaction.retried_count(),
                max_retry_count = self.config.max_retry_count,
                status = %transaction.status(),
                "Recovery retries exhausted, manual handling required"
            );
            return Ok(Outcome::Skipped);
        }

        let now = self.manager.time().now_utc();
        let branch_window = duration_ms(self.config.branch_recover_after_ms());
        let branch_due = transaction.created_at().checked_add_signed(branch_window);
        if transaction.transaction_type() == TransactionType::Branch
            && branch_due.map_or(true, |due| due > now)
        {
            debug!(%xid, "Branch still within its root's recovery window");
            return Ok(Outcome::Skipped);
        }

        let sweep = match (transaction.status(), transaction.transaction_type()) {
            (TransactionStatus::Confirming, _) => Sweep::Confirm,
            (TransactionStatus::Cancelling, _) | (TransactionStatus::Trying, TransactionType::Root) => {
                Sweep::Cancel
            }
            (TransactionStatus::Trying, TransactionType::Branch) => {
                debug!(%xid, "Branch still Trying, left to its root");
                return Ok(Outcome::Skipped);
            }
        };

        transaction.add_retried_count();
        transaction.change_status(sweep.status())?;
        self.manager.persist_update(&mut transaction).await?;

        info!(%xid, ?sweep, retried_count = transaction.retried_count(), "Recovering transaction");
        self.manager.run_sweep(transaction, sweep).await?;

        Ok(match sweep {
            Sweep::Confirm => Outcome::Confirmed,
            Sweep::Cancel => Outcome::Cancelled,
        })
    }
}

/// Upper bound for recovery windows (100 years)
const RECOVER_WINDOW_MS_MAX: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

fn duration_ms(ms: u64) -> Duration {
    let ms = ms.min(RECOVER_WINDOW_MS_MAX);
    Duration::milliseconds(ms as i64)
}
