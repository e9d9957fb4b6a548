//! Transaction repository contract
//!
//! TigerStyle: Row counts are explicit; zero rows is a result, not an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tcc_core::{Result, Transaction, TransactionXid};

/// Persistence contract for transaction records
///
/// Every write of an existing record goes through [`update`](Self::update),
/// which is version-checked: the stored version must equal the version the
/// caller read. Of two concurrent updaters holding the same version, exactly
/// one affects a row.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Insert a new record
    ///
    /// Returns 0 if a record with the same Xid already exists.
    async fn create(&self, transaction: &Transaction) -> Result<usize>;

    /// Optimistically update a record
    ///
    /// On success the stored version is incremented and `transaction` is
    /// updated with the new version and last-update time. Returns 0, leaving
    /// `transaction` untouched, when the stored version differs or the record
    /// is gone.
    async fn update(&self, transaction: &mut Transaction) -> Result<usize>;

    /// Remove a record
    async fn delete(&self, transaction: &Transaction) -> Result<usize>;

    /// Look up a record; absent is not an error
    async fn find_by_xid(&self, xid: &TransactionXid) -> Result<Option<Transaction>>;

    /// All records whose last update is strictly before `since`
    async fn find_all_unmodified_since(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>>;
}

#[async_trait]
impl<R> TransactionRepository for Arc<R>
where
    R: TransactionRepository + ?Sized,
{
    async fn create(&self, transaction: &Transaction) -> Result<usize> {
        (**self).create(transaction).await
    }

    async fn update(&self, transaction: &mut Transaction) -> Result<usize> {
        (**self).update(transaction).await
    }

    async fn delete(&self, transaction: &Transaction) -> Result<usize> {
        (**self).delete(transaction).await
    }

    async fn find_by_xid(&self, xid: &TransactionXid) -> Result<Option<Transaction>> {
        (**self).find_by_xid(xid).await
    }

    async fn find_all_unmodified_since(&self, since: DateTime<Utc>) -> Result<Vec<Transaction>> {
        (**self).find_all_unmodified_since(since).await
    }
}
