//! In-memory transaction repository
//!
//! For testing and single-process deployments.
//!
//! TigerStyle: Records are stored serialized, so every read returns an
//! independent copy and nothing outside the store can mutate it.

use crate::repository::TransactionRepository;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tcc_core::{Error, Result, TimeProvider, Transaction, TransactionXid, WallClockTime};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Storage data: xid -> serialized record
type StorageData = HashMap<TransactionXid, Bytes>;

/// Per-operation counters
#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    update_conflicts: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
    scans: AtomicU64,
}

/// Snapshot of the backend counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRepositoryStats {
    /// Records currently stored
    pub records: usize,
    /// `create` calls
    pub creates: u64,
    /// `update` calls
    pub updates: u64,
    /// `update` calls that affected zero rows
    pub update_conflicts: u64,
    /// `delete` calls
    pub deletes: u64,
    /// `find_by_xid` calls
    pub reads: u64,
    /// `find_all_unmodified_since` calls
    pub scans: u64,
}

/// In-memory transaction repository
#[derive(Clone)]
pub struct MemoryTransactionRepository {
    data: Arc<RwLock<StorageData>>,
    counters: Arc<Counters>,
    fail_next_update: Arc<AtomicBool>,
    fail_next_delete: Arc<AtomicBool>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryTransactionRepository {
    /// Create an empty repository using wall-clock time
    pub fn new() -> Self {
        Self::with_time_provider(Arc::new(WallClockTime::new()))
    }

    /// Create an empty repository with a custom time provider
    pub fn with_time_provider(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
            fail_next_update: Arc::new(AtomicBool::new(false)),
            fail_next_delete: Arc::new(AtomicBool::new(false)),
            time,
        }
    }

    /// Make the next `update` fail with a storage error
    pub fn fail_next_update(&self) {
        self.fail_next_update.store(true, Ordering::SeqCst);
    }

    /// Make the next `delete` fail with a storage error
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    /// Whether a record exists, without touching the read counter
    pub async fn contains(&self, xid: &TransactionXid) -> bool {
        self.data.read().await.contains_key(xid)
    }

    /// Read a record without touching the read counter
    pub async fn peek(&self, xid: &TransactionXid) -> Result<Option<Transaction>> {
        let data = self.data.read().await;
        data.get(xid).map(decode).transpose()
    }

    /// Counter snapshot
    pub async fn stats(&self) -> MemoryRepositoryStats {
        let records = self.data.read().await.len();
        MemoryRepositoryStats {
            records,
            creates: self.counters.creates.load(Ordering::Relaxed),
            updates: self.counters.updates.load(Ordering::Relaxed),
            update_conflicts: self.counters.update_conflicts.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            reads: self.counters.reads.load(Ordering::Relaxed),
            scans: self.counters.scans.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryTransactionRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(transaction: &Transaction) -> Result<Bytes> {
    serde_json::to_vec(transaction)
        .map(Bytes::from)
        .map_err(|e| Error::SerializationFailed {
            reason: format!("transaction {}: {}", transaction.xid(), e),
        })
}

fn decode(raw: &Bytes) -> Result<Transaction> {
    serde_json::from_slice(raw).map_err(|e| Error::DeserializationFailed {
        reason: e.to_string(),
    })
}

fn injected_fault(operation: &str, xid: &TransactionXid) -> Error {
    Error::StorageFailed {
        operation: operation.to_string(),
        xid: xid.to_string(),
        reason: "injected fault".to_string(),
    }
}

#[async_trait]
impl TransactionRepository for MemoryTransactionRepository {
    #[instrument(skip(self, transaction), fields(xid = %transaction.xid()))]
    async fn create(&self, transaction: &Transaction) -> Result<usize> {
        self.counters.creates.fetch_add(1, Ordering::Relaxed);
        let raw = encode(transaction)?;
        let mut data = self.data.write().await;

        if data.contains_key(transaction.xid()) {
            debug!("duplicate xid, nothing created");
            return Ok(0);
        }
        data.insert(*transaction.xid(), raw);
        Ok(1)
    }

    #[instrument(skip(self, transaction), fields(xid = %transaction.xid(), version = %transaction.version()))]
    async fn update(&self, transaction: &mut Transaction) -> Result<usize> {
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        if self.fail_next_update.swap(false, Ordering::SeqCst) {
            return Err(injected_fault("update", transaction.xid()));
        }

        let mut data = self.data.write().await;
        let stored_version = match data.get(transaction.xid()) {
            Some(raw) => decode(raw)?.version(),
            None => {
                self.counters.update_conflicts.fetch_add(1, Ordering::Relaxed);
                debug!("record gone, zero rows updated");
                return Ok(0);
            }
        };
        if stored_version != transaction.version() {
            self.counters.update_conflicts.fetch_add(1, Ordering::Relaxed);
            debug!(%stored_version, "version mismatch, zero rows updated");
            return Ok(0);
        }

        let mut next = transaction.clone();
        next.mark_persisted(stored_version.increment(), self.time.now_utc());
        let raw = encode(&next)?;
        data.insert(*next.xid(), raw);

        *transaction = next;
        debug_assert_eq!(transaction.version(), stored_version.increment());
        Ok(1)
    }

    #[instrument(skip(self, transaction), fields(xid = %transaction.xid()))]
    async fn delete(&self, transaction: &Transaction) -> Result<usize> {
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(injected_fault("delete", transaction.xid()));
        }

        let mut data = self.data.write().await;
        Ok(usize::from(data.remove(transaction.xid()).is_some()))
    }

    #[instrument(skip(self), fields(xid = %xid))]
    async fn find_by_xid(&self, xid: &TransactionXid) -> Result<Option<Transaction>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read().await;
        data.get(xid).map(decode).transpose()
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn find_all_unmodified_since(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        self.counters.scans.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read().await;

        let mut found = Vec::new();
        for raw in data.values() {
            let transaction = decode(raw)?;
            if transaction.last_updated_at() < since {
                found.push(transaction);
            }
        }
        found.sort_by_key(|t| t.last_updated_at());
        Ok(found)
    }
}
