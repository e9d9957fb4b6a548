//! Delay-cancel error matching
//!
//! A business error in the delay-cancel set does not roll the ROOT
//! transaction back immediately. The record stays in Trying and the recovery
//! pass cancels it later, once it has been idle long enough.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type ErrorPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Set of error types that suppress the immediate rollback
///
/// An error matches when the error itself or its root cause matches one of
/// the registered predicates.
#[derive(Clone, Default)]
pub struct DelayCancelSet {
    entries: Vec<(String, ErrorPredicate)>,
}

impl DelayCancelSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an error type
    pub fn register<E>(&mut self)
    where
        E: StdError + Send + Sync + 'static,
    {
        self.register_with(std::any::type_name::<E>(), |err| err.is::<E>());
    }

    /// Register an error type (builder form)
    pub fn with<E>(mut self) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.register::<E>();
        self
    }

    /// Register a named predicate
    pub fn register_with<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(predicate)));
    }

    /// Whether the error or its root cause is in the set
    pub fn matches(&self, err: &anyhow::Error) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let outermost: &(dyn StdError + 'static) = err.as_ref();
        let root_cause = err.root_cause();

        self.entries
            .iter()
            .any(|(_, predicate)| predicate(outermost) || predicate(root_cause))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Names of the registered entries
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for DelayCancelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
