//! Cache-augmented transaction repository
//!
//! TigerStyle: The backing store is ground truth; the cache only ever holds
//! what a successful backend call returned or accepted.
//!
//! ```text
//!  create ──► backend ──ok──► cache put
//!  update ──► backend ──1───► cache put
//!                     ──0───► invalidate, OptimisticLock
//!                     ──err─► invalidate, propagate
//!  delete ──► backend ──────► invalidate (always)
//!  find   ──► cache ──miss──► backend ──found──► cache put
//! ```
//!
//! Entries expire after an idle period and the least recently accessed entry
//! is evicted when the cache is full.
//!
//! Every invalidation bumps an epoch under the cache lock. A put carries the
//! epoch observed before its backend call and is dropped if the epoch moved,
//! so a read that raced a delete cannot bring the deleted record back.

use crate::repository::TransactionRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tcc_core::{
    CacheConfig, Error, Result, TimeProvider, Transaction, TransactionXid, WallClockTime,
};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

// =============================================================================
// Cache Entry
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    transaction: Transaction,
    /// Last access time (for idle expiry and LRU eviction)
    last_accessed_ms: u64,
}

/// Cache statistics (for monitoring)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently cached (including not yet purged expired ones)
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped by idle expiry or capacity eviction
    pub evictions: u64,
}

// =============================================================================
// Caching Repository
// =============================================================================

/// Repository decorator with a bounded, idle-expiring cache keyed by Xid
pub struct CachingTransactionRepository<R> {
    inner: R,
    cache: RwLock<HashMap<TransactionXid, CacheEntry>>,
    expire_after_access_ms: u64,
    entries_max: usize,
    time: Arc<dyn TimeProvider>,
    /// Bumped on every invalidation, only while the cache write lock is held
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<R: TransactionRepository> CachingTransactionRepository<R> {
    /// Wrap a repository with the default cache configuration
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, &CacheConfig::default(), Arc::new(WallClockTime::new()))
    }

    /// Wrap a repository with an explicit configuration and time provider
    pub fn with_config(inner: R, config: &CacheConfig, time: Arc<dyn TimeProvider>) -> Self {
        assert!(config.entries_max > 0, "cache must hold at least one entry");
        assert!(config.expire_after_access_ms > 0, "expiry must be positive");

        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            expire_after_access_ms: config.expire_after_access_ms,
            entries_max: config.entries_max,
            time,
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The wrapped repository
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.cache.read().await.len();
        CacheStats {
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now_ms: u64) -> bool {
        now_ms.saturating_sub(entry.last_accessed_ms) > self.expire_after_access_ms
    }

    async fn cached(&self, xid: &TransactionXid) -> Option<Transaction> {
        let now_ms = self.time.now_ms();
        let mut cache = self.cache.write().await;

        match cache.get_mut(xid) {
            None => return None,
            Some(entry) if !self.is_expired(entry, now_ms) => {
                entry.last_accessed_ms = now_ms;
                return Some(entry.transaction.clone());
            }
            Some(_) => {}
        }

        // Expired
        cache.remove(xid);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Epoch to pass to [`put`](Self::put) for a backend call about to start
    fn observe_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Cache `transaction` unless an invalidation happened since `observed_epoch`
    async fn put(&self, transaction: &Transaction, observed_epoch: u64) {
        let now_ms = self.time.now_ms();
        let mut cache = self.cache.write().await;

        if self.epoch.load(Ordering::Acquire) != observed_epoch {
            // Drop any older copy too; the next read goes to the backend
            cache.remove(transaction.xid());
            debug!(xid = %transaction.xid(), "invalidated during backend call, not cached");
            return;
        }

        if !cache.contains_key(transaction.xid()) && cache.len() >= self.entries_max {
            self.evict_expired_sync(&mut cache, now_ms);
        }
        if !cache.contains_key(transaction.xid()) && cache.len() >= self.entries_max {
            self.evict_lru_sync(&mut cache);
        }

        cache.insert(
            *transaction.xid(),
            CacheEntry {
                transaction: transaction.clone(),
                last_accessed_ms: now_ms,
            },
        );
        debug_assert!(cache.len() <= self.entries_max);
    }

    async fn invalidate(&self, xid: &TransactionXid) {
        let mut cache = self.cache.write().await;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        cache.remove(xid);
    }

    /// Evict expired entries (called with lock held)
    fn evict_expired_sync(&self, cache: &mut HashMap<TransactionXid, CacheEntry>, now_ms: u64) {
        let before = cache.len();
        cache.retain(|_, entry| !self.is_expired(entry, now_ms));
        let evicted = before - cache.len();
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Evict the least recently accessed entry (called with lock held)
    fn evict_lru_sync(&self, cache: &mut HashMap<TransactionXid, CacheEntry>) {
        let oldest = cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed_ms)
            .map(|(xid, _)| *xid);

        if let Some(xid) = oldest {
            cache.remove(&xid);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(%xid, "evicted least recently accessed transaction");
        }
    }
}

#[async_trait]
impl<R: TransactionRepository> TransactionRepository for CachingTransactionRepository<R> {
    #[instrument(skip(self, transaction), fields(xid = %transaction.xid()))]
    async fn create(&self, transaction: &Transaction) -> Result<usize> {
        let epoch = self.observe_epoch();
        let rows = self.inner.create(transaction).await?;
        if rows > 0 {
            self.put(transaction, epoch).await;
        }
        Ok(rows)
    }

    #[instrument(skip(self, transaction), fields(xid = %transaction.xid(), version = %transaction.version()))]
    async fn update(&self, transaction: &mut Transaction) -> Result<usize> {
        let xid = *transaction.xid();
        let read_version = transaction.version();
        let epoch = self.observe_epoch();

        match self.inner.update(transaction).await {
            Ok(0) => {
                self.invalidate(&xid).await;
                warn!("optimistic lock conflict, cache entry invalidated");
                Err(Error::OptimisticLock {
                    xid: xid.to_string(),
                    version: read_version.value(),
                })
            }
            Ok(rows) => {
                self.put(transaction, epoch).await;
                Ok(rows)
            }
            Err(e) => {
                self.invalidate(&xid).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self, transaction), fields(xid = %transaction.xid()))]
    async fn delete(&self, transaction: &Transaction) -> Result<usize> {
        let result = self.inner.delete(transaction).await;
        self.invalidate(transaction.xid()).await;
        result
    }

    #[instrument(skip(self), fields(xid = %xid))]
    async fn find_by_xid(&self, xid: &TransactionXid) -> Result<Option<Transaction>> {
        if let Some(transaction) = self.cached(xid).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(transaction));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let epoch = self.observe_epoch();
        let found = self.inner.find_by_xid(xid).await?;
        if let Some(transaction) = &found {
            self.put(transaction, epoch).await;
        }
        Ok(found)
    }

    #[instrument(skip(self), fields(since = %since))]
    async fn find_all_unmodified_since(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let epoch = self.observe_epoch();
        let found = self.inner.find_all_unmodified_since(since).await?;
        for transaction in &found {
            self.put(transaction, epoch).await;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransactionRepository;
    use tcc_core::{ManualClock, TransactionStatus};

    struct Fixture {
        backend: Arc<MemoryTransactionRepository>,
        repository: CachingTransactionRepository<Arc<MemoryTransactionRepository>>,
        clock: ManualClock,
    }

    fn fixture(entries_max: usize) -> Fixture {
        let clock = ManualClock::default();
        let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
        let backend = Arc::new(MemoryTransactionRepository::with_time_provider(time.clone()));
        let config = CacheConfig {
            expire_after_access_ms: 120_000,
            entries_max,
        };
        let repository = CachingTransactionRepository::with_config(backend.clone(), &config, time);
        Fixture {
            backend,
            repository,
            clock,
        }
    }

    #[tokio::test]
    async fn test_find_after_create_is_served_from_cache() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        let found = f.repository.find_by_xid(transaction.xid()).await.unwrap();
        assert_eq!(found, Some(transaction));
        assert_eq!(f.backend.stats().await.reads, 0);
        assert_eq!(f.repository.stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_find_after_update_returns_new_version_from_cache() {
        let f = fixture(16);
        let mut transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        transaction.change_status(TransactionStatus::Cancelling).unwrap();
        f.repository.update(&mut transaction).await.unwrap();

        let found = f
            .repository
            .find_by_xid(transaction.xid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status(), TransactionStatus::Cancelling);
        assert_eq!(found.version(), transaction.version());
        assert_eq!(f.backend.stats().await.reads, 0);
    }

    #[tokio::test]
    async fn test_miss_reads_through_and_caches() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.backend.create(&transaction).await.unwrap();

        f.repository.find_by_xid(transaction.xid()).await.unwrap();
        f.repository.find_by_xid(transaction.xid()).await.unwrap();

        assert_eq!(f.backend.stats().await.reads, 1);
        let stats = f.repository.stats().await;
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
    }

    #[tokio::test]
    async fn test_absent_is_not_cached() {
        let f = fixture(16);
        let xid = TransactionXid::new_root();

        assert!(f.repository.find_by_xid(&xid).await.unwrap().is_none());
        assert!(f.repository.find_by_xid(&xid).await.unwrap().is_none());
        assert_eq!(f.backend.stats().await.reads, 2);
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        assert_eq!(f.repository.delete(&transaction).await.unwrap(), 1);
        assert!(f
            .repository
            .find_by_xid(transaction.xid())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_delete_still_invalidates() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        f.backend.fail_next_delete();
        assert!(f.repository.delete(&transaction).await.is_err());
        assert_eq!(f.repository.stats().await.entries, 0);

        // Still in the store, read through again
        assert!(f
            .repository
            .find_by_xid(transaction.xid())
            .await
            .unwrap()
            .is_some());
        assert_eq!(f.backend.stats().await.reads, 1);
    }

    #[tokio::test]
    async fn test_version_conflict_invalidates_and_fails() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        let mut winner = transaction.clone();
        let mut loser = transaction.clone();
        f.repository.update(&mut winner).await.unwrap();

        let err = f.repository.update(&mut loser).await.unwrap_err();
        assert!(matches!(err, Error::OptimisticLock { version: 0, .. }));
        assert_eq!(f.repository.stats().await.entries, 0);

        let stored = f
            .repository
            .find_by_xid(transaction.xid())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version(), winner.version());
    }

    #[tokio::test]
    async fn test_backend_error_invalidates_and_propagates() {
        let f = fixture(16);
        let mut transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        f.backend.fail_next_update();
        let err = f.repository.update(&mut transaction).await.unwrap_err();
        assert!(matches!(err, Error::StorageFailed { .. }));
        assert_eq!(f.repository.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_idle_entries_expire() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.repository.create(&transaction).await.unwrap();

        f.clock.advance_ms(60_000);
        f.repository.find_by_xid(transaction.xid()).await.unwrap();
        assert_eq!(f.backend.stats().await.reads, 0);

        // Access refreshed the entry, so 60s more is still within the idle window
        f.clock.advance_ms(60_000);
        f.repository.find_by_xid(transaction.xid()).await.unwrap();
        assert_eq!(f.backend.stats().await.reads, 0);

        f.clock.advance_ms(120_001);
        let found = f.repository.find_by_xid(transaction.xid()).await.unwrap();
        assert!(found.is_some());
        assert_eq!(f.backend.stats().await.reads, 1);
        assert_eq!(f.repository.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_full_cache_evicts_least_recently_accessed() {
        let f = fixture(2);
        let a = Transaction::new_root(f.clock.now_utc());
        let b = Transaction::new_root(f.clock.now_utc());
        let c = Transaction::new_root(f.clock.now_utc());

        f.repository.create(&a).await.unwrap();
        f.clock.advance_ms(10);
        f.repository.create(&b).await.unwrap();
        f.clock.advance_ms(10);
        // Touch a so b becomes the oldest
        f.repository.find_by_xid(a.xid()).await.unwrap();
        f.clock.advance_ms(10);
        f.repository.create(&c).await.unwrap();

        let stats = f.repository.stats().await;
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 1);

        f.repository.find_by_xid(a.xid()).await.unwrap();
        f.repository.find_by_xid(c.xid()).await.unwrap();
        assert_eq!(f.backend.stats().await.reads, 0);

        f.repository.find_by_xid(b.xid()).await.unwrap();
        assert_eq!(f.backend.stats().await.reads, 1);
    }

    #[tokio::test]
    async fn test_scan_bypasses_and_populates_cache() {
        let f = fixture(16);
        let transaction = Transaction::new_root(f.clock.now_utc());
        f.backend.create(&transaction).await.unwrap();

        f.clock.advance_ms(1_000);
        let found = f
            .repository
            .find_all_unmodified_since(f.clock.now_utc())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(f.backend.stats().await.scans, 1);

        f.repository.find_by_xid(transaction.xid()).await.unwrap();
        assert_eq!(f.backend.stats().await.reads, 0);
    }
}
