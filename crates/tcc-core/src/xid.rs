//! Transaction identifiers
//!
//! TigerStyle: Immutable after creation, equality by byte content.

use crate::constants::XID_PART_LENGTH_BYTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Global transaction id plus branch qualifier
///
/// A root transaction gets a fresh global id and a fresh branch qualifier.
/// Every participant enlisted by the root gets a branch Xid that keeps the
/// global id and derives a new qualifier, so the provider side can find its
/// branch record again when Confirm or Cancel arrives.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct TransactionXid {
    global_id: Uuid,
    branch_qualifier: Uuid,
}

impl TransactionXid {
    /// Create an Xid for a new global transaction
    pub fn new_root() -> Self {
        Self {
            global_id: Uuid::new_v4(),
            branch_qualifier: Uuid::new_v4(),
        }
    }

    /// Derive a branch Xid under the same global transaction
    pub fn branch(&self) -> Self {
        let branch = Self {
            global_id: self.global_id,
            branch_qualifier: Uuid::new_v4(),
        };
        debug_assert!(branch.same_global(self));
        debug_assert_ne!(branch, *self);
        branch
    }

    /// Rebuild an Xid from its raw parts
    pub fn from_bytes(
        global_id: [u8; XID_PART_LENGTH_BYTES],
        branch_qualifier: [u8; XID_PART_LENGTH_BYTES],
    ) -> Self {
        Self {
            global_id: Uuid::from_bytes(global_id),
            branch_qualifier: Uuid::from_bytes(branch_qualifier),
        }
    }

    /// Raw global transaction id
    pub fn global_id(&self) -> &[u8; XID_PART_LENGTH_BYTES] {
        self.global_id.as_bytes()
    }

    /// Raw branch qualifier
    pub fn branch_qualifier(&self) -> &[u8; XID_PART_LENGTH_BYTES] {
        self.branch_qualifier.as_bytes()
    }

    /// Whether both Xids belong to the same global transaction
    pub fn same_global(&self, other: &TransactionXid) -> bool {
        self.global_id == other.global_id
    }
}

impl fmt::Display for TransactionXid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.global_id.simple(),
            self.branch_qualifier.simple()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_xids_are_unique() {
        let a = TransactionXid::new_root();
        let b = TransactionXid::new_root();
        assert_ne!(a, b);
        assert!(!a.same_global(&b));
    }

    #[test]
    fn test_branch_keeps_global_id() {
        let root = TransactionXid::new_root();
        let branch = root.branch();

        assert!(branch.same_global(&root));
        assert_eq!(branch.global_id(), root.global_id());
        assert_ne!(branch.branch_qualifier(), root.branch_qualifier());
    }

    #[test]
    fn test_equality_by_bytes() {
        let xid = TransactionXid::new_root();
        let rebuilt = TransactionXid::from_bytes(*xid.global_id(), *xid.branch_qualifier());
        assert_eq!(xid, rebuilt);
    }

    #[test]
    fn test_display_contains_both_parts() {
        let xid = TransactionXid::from_bytes([0xab; 16], [0x01; 16]);
        let shown = xid.to_string();
        assert!(shown.starts_with("abababab"));
        assert!(shown.ends_with("01010101"));
        assert_eq!(shown.len(), 65);
    }
}
