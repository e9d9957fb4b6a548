//! Transaction context propagation
//!
//! TigerStyle: The context is an immutable value; editors are the only way it
//! enters or leaves a call's arguments.
//!
//! The root side writes a [`TransactionContext`] into the arguments of every
//! participant call, the provider side reads it back out. Each transport has
//! its own [`TransactionContextEditor`]; the core never depends on one.

use crate::constants::TRANSACTION_CONTEXT_PARAM_TYPE;
use crate::error::{Error, Result};
use crate::participant::InvocationContext;
use crate::transaction::TransactionStatus;
use crate::xid::TransactionXid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Propagation policy of a compensable operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active transaction, start a new one when none exists
    #[default]
    Required,
    /// Must run inside an existing transaction
    Mandatory,
    /// Join when a context is present, run without a transaction otherwise
    Supports,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Required => write!(f, "REQUIRED"),
            Propagation::Mandatory => write!(f, "MANDATORY"),
            Propagation::Supports => write!(f, "SUPPORTS"),
        }
    }
}

/// Cross-process transaction payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Branch Xid the receiving side operates on
    pub xid: TransactionXid,
    /// Phase the receiving side must execute
    pub status: TransactionStatus,
    /// Propagation policy of the originating call
    #[serde(default)]
    pub propagation: Propagation,
}

impl TransactionContext {
    /// Create a context
    pub fn new(xid: TransactionXid, status: TransactionStatus, propagation: Propagation) -> Self {
        Self {
            xid,
            status,
            propagation,
        }
    }

    /// Same context with another status (Confirm/Cancel fan-out)
    pub fn with_status(self, status: TransactionStatus) -> Self {
        Self { status, ..self }
    }
}

/// Injects and extracts a [`TransactionContext`] from a call's arguments
pub trait TransactionContextEditor: Send + Sync {
    /// Read the context carried by the call, if any
    fn get(&self, invocation: &InvocationContext) -> Result<Option<TransactionContext>>;

    /// Write the context into the call's arguments
    fn set(&self, context: &TransactionContext, invocation: &mut InvocationContext)
        -> Result<()>;
}

/// Binds the context into the argument declared as `TransactionContext`
///
/// Calls without such an argument carry no context; `set` leaves them untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransactionContextEditor;

impl TransactionContextEditor for DefaultTransactionContextEditor {
    fn get(&self, invocation: &InvocationContext) -> Result<Option<TransactionContext>> {
        let Some(position) = invocation.position_of(TRANSACTION_CONTEXT_PARAM_TYPE) else {
            return Ok(None);
        };

        match invocation.args.get(position) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone())
                .map(Some)
                .map_err(|e| Error::DeserializationFailed {
                    reason: format!(
                        "transaction context of {}::{}: {}",
                        invocation.target, invocation.method, e
                    ),
                }),
        }
    }

    fn set(
        &self,
        context: &TransactionContext,
        invocation: &mut InvocationContext,
    ) -> Result<()> {
        let Some(position) = invocation.position_of(TRANSACTION_CONTEXT_PARAM_TYPE) else {
            return Ok(());
        };

        let value = serde_json::to_value(context).map_err(|e| Error::SerializationFailed {
            reason: format!("transaction context {}: {}", context.xid, e),
        })?;

        if position >= invocation.args.len() {
            return Err(Error::illegal_state(format!(
                "{}::{} declares {} parameters but carries {} arguments",
                invocation.target,
                invocation.method,
                invocation.parameter_types.len(),
                invocation.args.len()
            )));
        }
        invocation.args[position] = value;
        Ok(())
    }
}

/// Editor for calls that never carry a context
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransactionContextEditor;

impl TransactionContextEditor for NullTransactionContextEditor {
    fn get(&self, _invocation: &InvocationContext) -> Result<Option<TransactionContext>> {
        Ok(None)
    }

    fn set(
        &self,
        _context: &TransactionContext,
        _invocation: &mut InvocationContext,
    ) -> Result<()> {
        Ok(())
    }
}
