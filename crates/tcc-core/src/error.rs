//! Error types for tcc
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for tcc operations
pub type Result<T> = std::result::Result<T, Error>;

/// tcc error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Propagation Errors
    // =========================================================================
    #[error("Illegal transaction context: no active transaction while propagation is mandatory for method {method}")]
    IllegalTransactionContext { method: String },

    #[error("No existed transaction: {xid}")]
    NoExistedTransaction { xid: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Optimistic lock conflict: {xid}, version {version}")]
    OptimisticLock { xid: String, version: u64 },

    #[error("Storage operation failed: {operation} {xid}, reason: {reason}")]
    StorageFailed {
        operation: String,
        xid: String,
        reason: String,
    },

    // =========================================================================
    // Termination Errors
    // =========================================================================
    #[error("Confirming failed: {xid}, reason: {reason}")]
    ConfirmingFailed { xid: String, reason: String },

    #[error("Cancelling failed: {xid}, reason: {reason}")]
    CancellingFailed { xid: String, reason: String },

    // =========================================================================
    // Dispatch Errors
    // =========================================================================
    #[error("System failure invoking {target}::{method}: {reason}")]
    SystemFailure {
        target: String,
        method: String,
        reason: String,
    },

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("Illegal state: {reason}")]
    IllegalState { reason: String },

    #[error("Illegal status transition for {xid}: {from} -> {to}")]
    IllegalStatusTransition {
        xid: String,
        from: String,
        to: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },
}

impl Error {
    /// Create an illegal state error
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::IllegalState {
            reason: reason.into(),
        }
    }

    /// Create a no existed transaction error
    pub fn no_existed_transaction(xid: impl ToString) -> Self {
        Self::NoExistedTransaction {
            xid: xid.to_string(),
        }
    }

    /// Create a confirming failed error
    pub fn confirming_failed(xid: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConfirmingFailed {
            xid: xid.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a cancelling failed error
    pub fn cancelling_failed(xid: impl ToString, reason: impl Into<String>) -> Self {
        Self::CancellingFailed {
            xid: xid.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a system failure error
    pub fn system_failure(
        target: impl Into<String>,
        method: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SystemFailure {
            target: target.into(),
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error means the transaction has already been resolved elsewhere
    pub fn is_no_existed_transaction(&self) -> bool {
        matches!(self, Self::NoExistedTransaction { .. })
    }

    /// Check if this error is an optimistic lock conflict
    pub fn is_optimistic_lock(&self) -> bool {
        matches!(self, Self::OptimisticLock { .. })
    }

    /// Check if this error is retriable
    ///
    /// Retriable errors leave the transaction record in the store for the recovery pass.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::OptimisticLock { .. }
                | Self::ConfirmingFailed { .. }
                | Self::CancellingFailed { .. }
                | Self::StorageFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::confirming_failed("g-1:b-1", "participant down");
        assert!(err.to_string().contains("g-1:b-1"));
        assert!(err.to_string().contains("participant down"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::OptimisticLock {
            xid: "x".into(),
            version: 3
        }
        .is_retriable());
        assert!(Error::cancelling_failed("x", "boom").is_retriable());
        assert!(!Error::illegal_state("unbalanced").is_retriable());
        assert!(!Error::no_existed_transaction("x").is_retriable());
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::no_existed_transaction("x").is_no_existed_transaction());
        assert!(!Error::internal("x").is_no_existed_transaction());
        assert!(Error::OptimisticLock {
            xid: "x".into(),
            version: 0
        }
        .is_optimistic_lock());
    }
}
