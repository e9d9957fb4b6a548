//! Reads that race a delete must not repopulate the cache
//!
//! The backend below pauses every read after it has fetched its result, so
//! a delete can complete while the stale copy is still in flight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tcc_core::{CacheConfig, ManualClock, Result, TimeProvider, Transaction, TransactionXid};
use tcc_storage::{CachingTransactionRepository, MemoryTransactionRepository, TransactionRepository};
use tokio::sync::{Notify, Semaphore};

/// Backend whose reads stop between fetching and returning
struct PausingRepository {
    inner: MemoryTransactionRepository,
    fetched: Notify,
    release: Semaphore,
}

impl PausingRepository {
    async fn pause(&self) {
        self.fetched.notify_one();
        let _permit = self.release.acquire().await;
    }
}

#[async_trait]
impl TransactionRepository for PausingRepository {
    async fn create(&self, transaction: &Transaction) -> Result<usize> {
        self.inner.create(transaction).await
    }

    async fn update(&self, transaction: &mut Transaction) -> Result<usize> {
        self.inner.update(transaction).await
    }

    async fn delete(&self, transaction: &Transaction) -> Result<usize> {
        self.inner.delete(transaction).await
    }

    async fn find_by_xid(&self, xid: &TransactionXid) -> Result<Option<Transaction>> {
        let found = self.inner.find_by_xid(xid).await;
        self.pause().await;
        found
    }

    async fn find_all_unmodified_since(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        let found = self.inner.find_all_unmodified_since(since).await;
        self.pause().await;
        found
    }
}

struct Fixture {
    backend: Arc<PausingRepository>,
    repository: Arc<CachingTransactionRepository<Arc<PausingRepository>>>,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    let clock = ManualClock::default();
    let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
    let backend = Arc::new(PausingRepository {
        inner: MemoryTransactionRepository::with_time_provider(time.clone()),
        fetched: Notify::new(),
        release: Semaphore::new(0),
    });
    let repository = Arc::new(CachingTransactionRepository::with_config(
        backend.clone(),
        &CacheConfig::default(),
        time,
    ));
    Fixture {
        backend,
        repository,
        clock,
    }
}

#[tokio::test]
async fn test_delete_during_miss_read_is_not_resurrected() {
    let f = fixture();
    let transaction = Transaction::new_root(f.clock.now_utc());
    f.backend.inner.create(&transaction).await.unwrap();

    let reader = {
        let repository = f.repository.clone();
        let xid = *transaction.xid();
        tokio::spawn(async move { repository.find_by_xid(&xid).await })
    };
    f.backend.fetched.notified().await;

    // The read fetched its copy; delete while it is still in flight
    f.backend.release.add_permits(1);
    assert_eq!(f.repository.delete(&transaction).await.unwrap(), 1);

    let stale = reader.await.unwrap().unwrap();
    assert!(stale.is_some());
    assert_eq!(f.repository.stats().await.entries, 0);

    f.backend.release.add_permits(1);
    let found = f.repository.find_by_xid(transaction.xid()).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn test_delete_during_scan_is_not_resurrected() {
    let f = fixture();
    let transaction = Transaction::new_root(f.clock.now_utc());
    f.backend.inner.create(&transaction).await.unwrap();
    f.clock.advance_ms(1_000);

    let scanner = {
        let repository = f.repository.clone();
        let since = f.clock.now_utc();
        tokio::spawn(async move { repository.find_all_unmodified_since(since).await })
    };
    f.backend.fetched.notified().await;

    f.backend.release.add_permits(1);
    assert_eq!(f.repository.delete(&transaction).await.unwrap(), 1);

    assert_eq!(scanner.await.unwrap().unwrap().len(), 1);
    assert_eq!(f.repository.stats().await.entries, 0);
}

#[tokio::test]
async fn test_unrelated_reads_still_cache() {
    let f = fixture();
    let transaction = Transaction::new_root(f.clock.now_utc());
    f.backend.inner.create(&transaction).await.unwrap();

    f.backend.release.add_permits(1);
    f.repository.find_by_xid(transaction.xid()).await.unwrap();
    f.repository.find_by_xid(transaction.xid()).await.unwrap();

    assert_eq!(f.backend.inner.stats().await.reads, 1);
    assert_eq!(f.repository.stats().await.hits, 1);
}
