//! Transaction aggregate
//!
//! TigerStyle: Invariant-preserving mutation only, status moves forward only.
//!
//! ```text
//!            ┌──────────► Confirming
//!  Trying ───┤
//!            └──────────► Cancelling
//! ```
//!
//! Re-asserting the current status is allowed so a recovery pass can re-drive
//! a transaction that is stuck in Confirming or Cancelling.

use crate::constants::TRANSACTION_PARTICIPANTS_COUNT_MAX;
use crate::context::TransactionContext;
use crate::error::{Error, Result};
use crate::occ::Version;
use crate::participant::Participant;
use crate::xid::TransactionXid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a TCC transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Tentative Try step in progress
    Trying,
    /// Driving every participant to Confirm
    Confirming,
    /// Driving every participant to Cancel
    Cancelling,
}

impl TransactionStatus {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (TransactionStatus::Trying, _) => true,
            _ => false,
        }
    }

    /// Whether this status is one of the two terminal phases
    pub fn is_terminating(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Confirming | TransactionStatus::Cancelling
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Trying => write!(f, "TRYING"),
            TransactionStatus::Confirming => write!(f, "CONFIRMING"),
            TransactionStatus::Cancelling => write!(f, "CANCELLING"),
        }
    }
}

/// Whether a transaction started the global flow or joined it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Root,
    Branch,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Root => write!(f, "ROOT"),
            TransactionType::Branch => write!(f, "BRANCH"),
        }
    }
}

/// A TCC transaction record
///
/// `xid` and `transaction_type` never change. Participants are append-only
/// while Trying and frozen afterwards. `version` and `last_updated_at` are
/// owned by the repository and only move on a successful persisted update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    xid: TransactionXid,
    status: TransactionStatus,
    transaction_type: TransactionType,
    participants: Vec<Participant>,
    version: Version,
    retried_count: u32,
    created_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new ROOT transaction with a fresh Xid
    pub fn new_root(now: DateTime<Utc>) -> Self {
        Self::new(TransactionXid::new_root(), TransactionType::Root, now)
    }

    /// Create a BRANCH transaction for an inbound context
    ///
    /// The branch keeps the Xid the root derived when it enlisted this participant.
    pub fn new_branch(context: &TransactionContext, now: DateTime<Utc>) -> Self {
        Self::new(context.xid, TransactionType::Branch, now)
    }

    fn new(xid: TransactionXid, transaction_type: TransactionType, now: DateTime<Utc>) -> Self {
        Self {
            xid,
            status: TransactionStatus::Trying,
            transaction_type,
            participants: Vec::new(),
            version: Version::INITIAL,
            retried_count: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn xid(&self) -> &TransactionXid {
        &self.xid
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn is_root(&self) -> bool {
        self.transaction_type == TransactionType::Root
    }

    /// Participants in enlistment order
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn retried_count(&self) -> u32 {
        self.retried_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }

    /// Move to another status
    ///
    /// Returns `IllegalStatusTransition` for Confirming↔Cancelling or a return to Trying.
    pub fn change_status(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::IllegalStatusTransition {
                xid: self.xid.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Append a participant
    ///
    /// Only allowed while Trying and below the participant limit.
    pub fn enlist_participant(&mut self, participant: Participant) -> Result<()> {
        if self.status != TransactionStatus::Trying {
            return Err(Error::illegal_state(format!(
                "cannot enlist participant into {} while {}",
                self.xid, self.status
            )));
        }
        if self.participants.len() >= TRANSACTION_PARTICIPANTS_COUNT_MAX {
            return Err(Error::illegal_state(format!(
                "transaction {} already has {} participants (max {})",
                self.xid,
                self.participants.len(),
                TRANSACTION_PARTICIPANTS_COUNT_MAX
            )));
        }
        debug_assert!(participant.xid.same_global(&self.xid));

        self.participants.push(participant);
        Ok(())
    }

    /// Count one more recovery attempt
    pub fn add_retried_count(&mut self) {
        self.retried_count = self.retried_count.saturating_add(1);
    }

    /// Record a successful persisted update
    ///
    /// Called by repositories only, after the version check passed.
    pub fn mark_persisted(&mut self, version: Version, at: DateTime<Utc>) {
        debug_assert!(version >= self.version);
        self.version = version;
        self.last_updated_at = at;
    }

    /// Context to hand to a participant in the current phase
    pub fn context_for(&self, participant: &Participant) -> TransactionContext {
        TransactionContext::new(participant.xid, self.status, Default::default())
    }
}
