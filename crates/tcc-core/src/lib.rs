//! tcc Core
//!
//! Core types, errors, and configuration for the tcc Try-Confirm-Cancel coordinator.
//!
//! # Overview
//!
//! A business operation spanning several services runs a tentative Try step
//! everywhere, then every participant is driven to Confirm or Cancel. This
//! crate holds the values that flow through that protocol: transaction
//! identifiers, the transaction record and its status machine, participants,
//! the propagated context and the editors that bind it into calls.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `TRANSACTION_STACK_DEPTH_MAX`)
//! - Assertions on invariants
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod context;
pub mod delay_cancel;
pub mod error;
pub mod io;
pub mod occ;
pub mod participant;
pub mod telemetry;
pub mod transaction;
pub mod xid;

pub use config::{CacheConfig, RecoveryConfig, TccConfig};
pub use constants::*;
pub use context::{
    DefaultTransactionContextEditor, NullTransactionContextEditor, Propagation,
    TransactionContext, TransactionContextEditor,
};
pub use delay_cancel::DelayCancelSet;
pub use error::{Error, Result};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use occ::Version;
pub use participant::{InvocationContext, Participant};
pub use telemetry::{init_telemetry, TelemetryConfig};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use xid::TransactionXid;
