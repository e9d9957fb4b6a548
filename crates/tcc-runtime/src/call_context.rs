//! Per-call transaction stack
//!
//! TigerStyle: The stack is carried explicitly through the call chain; it is
//! never global and never shared between business calls.
//!
//! Cloning a [`CallContext`] yields another handle to the same stack, so a
//! Try body and the nested compensable calls it makes all see the same
//! active transaction.

use std::sync::{Arc, Mutex, MutexGuard};
use tcc_core::constants::TRANSACTION_STACK_DEPTH_MAX;
use tcc_core::{Error, Result, Transaction, TransactionXid};

/// Handle to the LIFO stack of active transactions of one logical call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    stack: Arc<Mutex<Vec<Transaction>>>,
}

impl CallContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Transaction>>> {
        self.stack
            .lock()
            .map_err(|_| Error::internal("call context lock poisoned"))
    }

    /// Fail if another transaction cannot be pushed
    pub fn ensure_capacity(&self) -> Result<()> {
        let depth = self.lock()?.len();
        if depth >= TRANSACTION_STACK_DEPTH_MAX {
            return Err(Error::illegal_state(format!(
                "transaction stack depth {} reached max {}",
                depth, TRANSACTION_STACK_DEPTH_MAX
            )));
        }
        Ok(())
    }

    /// Push a transaction on top
    pub fn push(&self, transaction: Transaction) -> Result<()> {
        let mut stack = self.lock()?;
        if stack.len() >= TRANSACTION_STACK_DEPTH_MAX {
            return Err(Error::illegal_state(format!(
                "transaction stack depth {} reached max {}",
                stack.len(),
                TRANSACTION_STACK_DEPTH_MAX
            )));
        }
        stack.push(transaction);
        Ok(())
    }

    /// Copy of the top transaction
    pub fn current(&self) -> Result<Option<Transaction>> {
        Ok(self.lock()?.last().cloned())
    }

    /// Copy of the top transaction, `IllegalState` if none
    pub fn require_current(&self) -> Result<Transaction> {
        self.current()?
            .ok_or_else(|| Error::illegal_state("no active transaction in call context"))
    }

    /// Whether any transaction is active
    pub fn is_active(&self) -> Result<bool> {
        Ok(!self.lock()?.is_empty())
    }

    pub fn depth(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    /// Replace the top transaction with a newer copy of itself
    pub fn replace_top(&self, transaction: Transaction) -> Result<()> {
        let mut stack = self.lock()?;
        match stack.last_mut() {
            Some(top) if top.xid() == transaction.xid() => {
                *top = transaction;
                Ok(())
            }
            Some(top) => Err(Error::illegal_state(format!(
                "top of stack is {}, not {}",
                top.xid(),
                transaction.xid()
            ))),
            None => Err(Error::illegal_state(format!(
                "stack is empty, cannot replace {}",
                transaction.xid()
            ))),
        }
    }

    /// Pop the top transaction, which must be `xid`
    pub fn pop_if_top(&self, xid: &TransactionXid) -> Result<Transaction> {
        let mut stack = self.lock()?;
        match stack.last() {
            Some(top) if top.xid() == xid => {}
            Some(top) => {
                return Err(Error::illegal_state(format!(
                    "illegal transaction when clean after completion: top of stack is {}, not {}",
                    top.xid(),
                    xid
                )))
            }
            None => {
                return Err(Error::illegal_state(format!(
                    "illegal transaction when clean after completion: stack is empty, expected {}",
                    xid
                )))
            }
        }
        stack
            .pop()
            .ok_or_else(|| Error::internal("stack emptied while locked"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcc_core::{ManualClock, TimeProvider};

    fn transaction() -> Transaction {
        Transaction::new_root(ManualClock::default().now_utc())
    }

    #[test]
    fn test_lifo_push_pop() {
        let cx = CallContext::new();
        let outer = transaction();
        let inner = transaction();

        cx.push(outer.clone()).unwrap();
        cx.push(inner.clone()).unwrap();
        assert_eq!(cx.depth().unwrap(), 2);
        assert_eq!(cx.current().unwrap().unwrap().xid(), inner.xid());

        cx.pop_if_top(inner.xid()).unwrap();
        assert_eq!(cx.current().unwrap().unwrap().xid(), outer.xid());
        cx.pop_if_top(outer.xid()).unwrap();
        assert!(!cx.is_active().unwrap());
    }

    #[test]
    fn test_out_of_order_pop_is_illegal() {
        let cx = CallContext::new();
        let outer = transaction();
        let inner = transaction();
        cx.push(outer.clone()).unwrap();
        cx.push(inner.clone()).unwrap();

        let err = cx.pop_if_top(outer.xid()).unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));
        assert_eq!(cx.depth().unwrap(), 2);
    }

    #[test]
    fn test_pop_from_empty_is_illegal() {
        let cx = CallContext::new();
        assert!(cx.pop_if_top(transaction().xid()).is_err());
        assert!(cx.require_current().is_err());
    }

    #[test]
    fn test_clones_share_the_stack() {
        let cx = CallContext::new();
        let nested = cx.clone();
        cx.push(transaction()).unwrap();
        assert!(nested.is_active().unwrap());

        let other = CallContext::new();
        assert!(!other.is_active().unwrap());
    }

    #[test]
    fn test_replace_top_requires_same_xid() {
        let cx = CallContext::new();
        let mut tx = transaction();
        cx.push(tx.clone()).unwrap();

        tx.add_retried_count();
        cx.replace_top(tx.clone()).unwrap();
        assert_eq!(cx.current().unwrap().unwrap().retried_count(), 1);

        assert!(cx.replace_top(transaction()).is_err());
    }

    #[test]
    fn test_depth_limit() {
        let cx = CallContext::new();
        for _ in 0..TRANSACTION_STACK_DEPTH_MAX {
            cx.push(transaction()).unwrap();
        }
        assert!(cx.ensure_capacity().is_err());
        assert!(cx.push(transaction()).is_err());
    }
}
