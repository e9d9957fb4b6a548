//! Participant invocation dispatcher
//!
//! TigerStyle: Explicit handler table, single attempt, every failure wrapped.
//!
//! Participants are described by serializable [`InvocationContext`] values.
//! The dispatcher resolves `(target, method)` through a registered-handler
//! table, binds the transaction context into the arguments with the named
//! context editor, and performs the call.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tcc_core::constants::{EDITOR_NAME_DEFAULT, EDITOR_NAME_NULL};
use tcc_core::{
    DefaultTransactionContextEditor, Error, InvocationContext, NullTransactionContextEditor,
    Result, TransactionContext, TransactionContextEditor,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Maximum number of handlers in one dispatcher
pub const DISPATCHER_HANDLERS_COUNT_MAX: usize = 10_000;

/// A callable participant endpoint
#[async_trait]
pub trait InvocationHandler: Send + Sync {
    /// Perform the call with the context already bound into `invocation`
    async fn invoke(&self, invocation: InvocationContext) -> anyhow::Result<Value>;
}

/// Handler backed by an async closure
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> InvocationHandler for FnHandler<F>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn invoke(&self, invocation: InvocationContext) -> anyhow::Result<Value> {
        (self.f)(invocation).await
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub invocations: u64,
    pub failures: u64,
}

type HandlerKey = (String, String);

/// Registered-handler table plus context editors
pub struct InvocationDispatcher {
    handlers: RwLock<HashMap<HandlerKey, Arc<dyn InvocationHandler>>>,
    editors: RwLock<HashMap<String, Arc<dyn TransactionContextEditor>>>,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl InvocationDispatcher {
    /// Create a dispatcher with the default and null editors registered
    pub fn new() -> Self {
        let mut editors: HashMap<String, Arc<dyn TransactionContextEditor>> = HashMap::new();
        editors.insert(
            EDITOR_NAME_DEFAULT.to_string(),
            Arc::new(DefaultTransactionContextEditor),
        );
        editors.insert(
            EDITOR_NAME_NULL.to_string(),
            Arc::new(NullTransactionContextEditor),
        );

        Self {
            handlers: RwLock::new(HashMap::new()),
            editors: RwLock::new(editors),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Register a handler for `(target, method)`
    pub async fn register<H>(
        &self,
        target: impl Into<String>,
        method: impl Into<String>,
        handler: H,
    ) -> Result<()>
    where
        H: InvocationHandler + 'static,
    {
        let key = (target.into(), method.into());
        let mut handlers = self.handlers.write().await;

        if handlers.len() >= DISPATCHER_HANDLERS_COUNT_MAX {
            return Err(Error::illegal_state(format!(
                "dispatcher is at capacity ({} handlers)",
                DISPATCHER_HANDLERS_COUNT_MAX
            )));
        }
        if handlers.contains_key(&key) {
            return Err(Error::illegal_state(format!(
                "handler {}::{} already registered",
                key.0, key.1
            )));
        }

        info!(handler_target = %key.0, handler_method = %key.1, "Registering participant handler");
        handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    /// Register an async closure as the handler for `(target, method)`
    pub async fn register_fn<F, Fut>(
        &self,
        target: impl Into<String>,
        method: impl Into<String>,
        f: F,
    ) -> Result<()>
    where
        F: Fn(InvocationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(target, method, FnHandler { f }).await
    }

    /// Remove a handler
    pub async fn unregister(&self, target: &str, method: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        handlers
            .remove(&(target.to_string(), method.to_string()))
            .is_some()
    }

    /// Register (or replace) a named context editor
    pub async fn register_editor<E>(&self, name: impl Into<String>, editor: E)
    where
        E: TransactionContextEditor + 'static,
    {
        let name = name.into();
        debug!(editor = %name, "Registering context editor");
        self.editors.write().await.insert(name, Arc::new(editor));
    }

    /// Look up a context editor by name
    pub async fn editor(&self, name: &str) -> Result<Arc<dyn TransactionContextEditor>> {
        let editors = self.editors.read().await;
        editors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::illegal_state(format!("unknown context editor '{}'", name)))
    }

    /// Bind a context into a copy of `invocation`
    pub async fn bind(
        &self,
        context: &TransactionContext,
        invocation: &InvocationContext,
        editor: &str,
    ) -> Result<InvocationContext> {
        let editor = self.editor(editor).await?;
        let mut bound = invocation.clone();
        editor.set(context, &mut bound)?;
        Ok(bound)
    }

    /// Invoke a participant descriptor
    ///
    /// Single attempt. Any failure to resolve, bind, or call is returned as
    /// `SystemFailure`. An empty method name is a no-op returning `null`.
    pub async fn invoke(
        &self,
        context: &TransactionContext,
        invocation: &InvocationContext,
        editor: &str,
    ) -> Result<Value> {
        if invocation.is_empty() {
            return Ok(Value::Null);
        }
        self.invocations.fetch_add(1, Ordering::Relaxed);

        let result = self.invoke_inner(context, invocation, editor).await;
        if let Err(e) = &result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                handler_target = %invocation.target,
                method = %invocation.method,
                xid = %context.xid,
                status = %context.status,
                error = %e,
                "Participant invocation failed"
            );
        }
        result
    }

    async fn invoke_inner(
        &self,
        context: &TransactionContext,
        invocation: &InvocationContext,
        editor: &str,
    ) -> Result<Value> {
        let system_failure = |reason: String| {
            Error::system_failure(invocation.target.clone(), invocation.method.clone(), reason)
        };

        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&(invocation.target.clone(), invocation.method.clone()))
                .cloned()
        }
        .ok_or_else(|| system_failure("no handler registered".to_string()))?;

        let bound = self
            .bind(context, invocation, editor)
            .await
            .map_err(|e| system_failure(e.to_string()))?;

        debug!(
            handler_target = %invocation.target,
            method = %invocation.method,
            xid = %context.xid,
            status = %context.status,
            "Invoking participant"
        );
        handler
            .invoke(bound)
            .await
            .map_err(|e| system_failure(format!("{:#}", e)))
    }

    /// Dispatcher statistics
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for InvocationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tcc_core::constants::TRANSACTION_CONTEXT_PARAM_TYPE;
    use tcc_core::{Propagation, TransactionStatus, TransactionXid};

    fn confirming() -> TransactionContext {
        TransactionContext::new(
            TransactionXid::new_root().branch(),
            TransactionStatus::Confirming,
            Propagation::Required,
        )
    }

    fn confirm_call() -> InvocationContext {
        InvocationContext::new("inventory", "confirm_reserve")
            .with_arg(TRANSACTION_CONTEXT_PARAM_TYPE, Value::Null)
            .with_arg("u64", json!(3))
    }

    #[tokio::test]
    async fn test_invoke_binds_context_and_calls_handler() {
        let dispatcher = InvocationDispatcher::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        dispatcher
            .register_fn("inventory", "confirm_reserve", move |call| {
                let sink = sink.clone();
                async move {
                    *sink.lock().unwrap() = Some(call);
                    Ok(json!("done"))
                }
            })
            .await
            .unwrap();

        let context = confirming();
        let result = dispatcher
            .invoke(&context, &confirm_call(), EDITOR_NAME_DEFAULT)
            .await
            .unwrap();
        assert_eq!(result, json!("done"));

        let call = seen.lock().unwrap().clone().unwrap();
        let bound = DefaultTransactionContextEditor.get(&call).unwrap();
        assert_eq!(bound, Some(context));
        assert_eq!(call.args[1], json!(3));
        assert_eq!(dispatcher.stats().invocations, 1);
    }

    #[tokio::test]
    async fn test_empty_method_is_noop() {
        let dispatcher = InvocationDispatcher::new();
        let result = dispatcher
            .invoke(
                &confirming(),
                &InvocationContext::new("inventory", ""),
                EDITOR_NAME_DEFAULT,
            )
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
        assert_eq!(dispatcher.stats().invocations, 0);
    }

    #[tokio::test]
    async fn test_unknown_handler_is_system_failure() {
        let dispatcher = InvocationDispatcher::new();
        let err = dispatcher
            .invoke(&confirming(), &confirm_call(), EDITOR_NAME_DEFAULT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SystemFailure { ref target, .. } if target == "inventory"));
        assert_eq!(dispatcher.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_unknown_editor_is_system_failure() {
        let dispatcher = InvocationDispatcher::new();
        dispatcher
            .register_fn("inventory", "confirm_reserve", |_| async { Ok(Value::Null) })
            .await
            .unwrap();

        let err = dispatcher
            .invoke(&confirming(), &confirm_call(), "grpc-metadata")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SystemFailure { .. }));
    }

    #[tokio::test]
    async fn test_handler_error_is_wrapped() {
        let dispatcher = InvocationDispatcher::new();
        dispatcher
            .register_fn("inventory", "confirm_reserve", |_| async {
                Err(anyhow::anyhow!("warehouse offline"))
            })
            .await
            .unwrap();

        let err = dispatcher
            .invoke(&confirming(), &confirm_call(), EDITOR_NAME_DEFAULT)
            .await
            .unwrap_err();
        match err {
            Error::SystemFailure { reason, .. } => assert!(reason.contains("warehouse offline")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let dispatcher = InvocationDispatcher::new();
        dispatcher
            .register_fn("a", "b", |_| async { Ok(Value::Null) })
            .await
            .unwrap();
        let err = dispatcher
            .register_fn("a", "b", |_| async { Ok(Value::Null) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState { .. }));

        assert!(dispatcher.unregister("a", "b").await);
        assert!(!dispatcher.unregister("a", "b").await);
    }

    #[tokio::test]
    async fn test_null_editor_leaves_arguments_alone() {
        let dispatcher = InvocationDispatcher::new();
        let bound = dispatcher
            .bind(&confirming(), &confirm_call(), EDITOR_NAME_NULL)
            .await
            .unwrap();
        assert_eq!(bound, confirm_call());
    }
}
