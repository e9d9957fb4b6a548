//! Participant and invocation descriptors
//!
//! TigerStyle: Plain serializable values, no behavior beyond construction.

use crate::constants::EDITOR_NAME_DEFAULT;
use crate::xid::TransactionXid;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A serializable method-call descriptor
///
/// Identifies a registered handler by `(target, method)` and carries the
/// arguments to call it with. Parameter types name each argument so a
/// context editor can find the slot that carries the transaction context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationContext {
    /// Handler target key (the factory/registry identity of the participant)
    pub target: String,
    /// Method name on the target
    pub method: String,
    /// Declared parameter types, one per argument
    #[serde(default)]
    pub parameter_types: Vec<String>,
    /// Argument values
    #[serde(default)]
    pub args: Vec<Value>,
}

impl InvocationContext {
    /// Create a descriptor with no arguments
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            parameter_types: Vec::new(),
            args: Vec::new(),
        }
    }

    /// Append a typed argument
    pub fn with_arg(mut self, parameter_type: impl Into<String>, value: Value) -> Self {
        self.parameter_types.push(parameter_type.into());
        self.args.push(value);
        debug_assert_eq!(self.parameter_types.len(), self.args.len());
        self
    }

    /// Whether this descriptor names no method (nothing to invoke)
    pub fn is_empty(&self) -> bool {
        self.method.is_empty()
    }

    /// Position of the first argument declared with the given type
    pub fn position_of(&self, parameter_type: &str) -> Option<usize> {
        self.parameter_types
            .iter()
            .position(|declared| declared == parameter_type)
    }
}

/// One enlisted unit of work
///
/// Confirm and Cancel must each be safe to invoke zero, one, or many times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    /// Branch Xid the participant was enlisted under
    pub xid: TransactionXid,
    /// Descriptor invoked on commit
    pub confirm: InvocationContext,
    /// Descriptor invoked on rollback
    pub cancel: InvocationContext,
    /// Name of the context editor used to bind the transaction context into the calls
    #[serde(default = "default_editor")]
    pub editor: String,
}

fn default_editor() -> String {
    EDITOR_NAME_DEFAULT.to_string()
}

impl Participant {
    /// Create a participant bound through the default context editor
    pub fn new(xid: TransactionXid, confirm: InvocationContext, cancel: InvocationContext) -> Self {
        Self {
            xid,
            confirm,
            cancel,
            editor: default_editor(),
        }
    }

    /// Use a different registered context editor
    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = editor.into();
        self
    }
}
