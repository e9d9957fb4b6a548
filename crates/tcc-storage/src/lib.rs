//! tcc Storage
//!
//! Persistence for TCC transaction records.
//!
//! # Overview
//!
//! Defines the [`TransactionRepository`] contract and provides:
//! - [`MemoryTransactionRepository`] (for testing and single-process use)
//! - [`CachingTransactionRepository`], a decorator adding a bounded,
//!   idle-expiring cache in front of any backend
//!
//! Production backends implement [`TransactionRepository`] themselves.

pub mod cached;
pub mod memory;
pub mod repository;

pub use cached::{CacheStats, CachingTransactionRepository};
pub use memory::{MemoryRepositoryStats, MemoryTransactionRepository};
pub use repository::TransactionRepository;
