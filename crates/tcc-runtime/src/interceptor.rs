//! Compensable protocol handler
//!
//! TigerStyle: Classification is a pure function; each role has one flow.
//!
//! Every compensable call is classified by its propagation, whether a
//! transaction is already active in its [`CallContext`], and whether it
//! carries an inbound [`TransactionContext`]:
//!
//! | active | inbound | propagation | role     |
//! |--------|---------|-------------|----------|
//! | no     | no      | Required    | ROOT     |
//! | no     | yes     | any         | PROVIDER |
//! | no     | no      | Mandatory   | error    |
//! | *      | *       | otherwise   | NONE     |

use crate::call_context::CallContext;
use crate::manager::TransactionManager;
use std::future::Future;
use std::sync::Arc;
use tcc_core::constants::EDITOR_NAME_DEFAULT;
use tcc_core::{
    DelayCancelSet, Error, InvocationContext, Propagation, TransactionContext, TransactionStatus,
    TransactionXid,
};
use tracing::{debug, error, warn};

/// Role of a compensable call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodRole {
    /// Starts a new global transaction
    Root,
    /// Joins a global transaction started elsewhere
    Provider,
    /// Runs without transaction handling
    Normal,
}

/// Classify a call
pub fn classify(
    propagation: Propagation,
    is_transaction_active: bool,
    inbound: Option<&TransactionContext>,
) -> MethodRole {
    match (is_transaction_active, inbound, propagation) {
        (false, None, Propagation::Required) => MethodRole::Root,
        (false, Some(_), _) => MethodRole::Provider,
        _ => MethodRole::Normal,
    }
}

/// Static per-operation configuration
#[derive(Debug, Clone)]
pub struct CompensableMethod {
    pub propagation: Propagation,
    /// Run the confirm sweep on the terminate pool
    pub async_confirm: bool,
    /// Run the cancel sweep on the terminate pool
    pub async_cancel: bool,
    /// Errors that skip the immediate rollback of a ROOT transaction
    pub delay_cancel: DelayCancelSet,
    /// Context editor used to read the inbound context
    pub editor: String,
}

impl Default for CompensableMethod {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            async_confirm: false,
            async_cancel: false,
            delay_cancel: DelayCancelSet::default(),
            editor: EDITOR_NAME_DEFAULT.to_string(),
        }
    }
}

impl CompensableMethod {
    pub fn required() -> Self {
        Self::default()
    }

    pub fn mandatory() -> Self {
        Self {
            propagation: Propagation::Mandatory,
            ..Self::default()
        }
    }

    pub fn supports() -> Self {
        Self {
            propagation: Propagation::Supports,
            ..Self::default()
        }
    }

    pub fn with_async_confirm(mut self, async_confirm: bool) -> Self {
        self.async_confirm = async_confirm;
        self
    }

    pub fn with_async_cancel(mut self, async_cancel: bool) -> Self {
        self.async_cancel = async_cancel;
        self
    }

    pub fn with_delay_cancel(mut self, delay_cancel: DelayCancelSet) -> Self {
        self.delay_cancel = delay_cancel;
        self
    }

    pub fn with_editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = editor.into();
        self
    }
}

/// Drives ROOT and PROVIDER flows around a business call
pub struct CompensableInterceptor {
    manager: Arc<TransactionManager>,
    /// Process-wide delay-cancel errors, checked in addition to the per-method set
    delay_cancel: DelayCancelSet,
}

impl CompensableInterceptor {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self::with_delay_cancel(manager, DelayCancelSet::default())
    }

    pub fn with_delay_cancel(manager: Arc<TransactionManager>, delay_cancel: DelayCancelSet) -> Self {
        Self {
            manager,
            delay_cancel,
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Run `proceed` under the protocol dictated by `method`
    ///
    /// `invocation` describes the intercepted call; the inbound context is
    /// read from it with the method's editor. The Try body receives a handle
    /// to the same call context. For Confirming/Cancelling deliveries the
    /// body is not run and `T::default()` is returned.
    pub async fn intercept<T, F, Fut>(
        &self,
        cx: &CallContext,
        method: &CompensableMethod,
        invocation: &InvocationContext,
        proceed: F,
    ) -> anyhow::Result<T>
    where
        T: Default,
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let editor = self.manager.dispatcher().editor(&method.editor).await?;
        let inbound = editor.get(invocation)?;
        let is_active = self.manager.is_transaction_active(cx)?;

        if method.propagation == Propagation::Mandatory && !is_active && inbound.is_none() {
            return Err(Error::IllegalTransactionContext {
                method: invocation.method.clone(),
            }
            .into());
        }

        let role = classify(method.propagation, is_active, inbound.as_ref());
        debug!(method = %invocation.method, ?role, "Compensable call classified");

        match (role, inbound) {
            (MethodRole::Root, _) => self.root_method_proceed(cx, method, proceed).await,
            (MethodRole::Provider, Some(context)) => {
                self.provider_method_proceed(cx, method, &context, proceed)
                    .await
            }
            _ => proceed(cx.clone()).await,
        }
    }

    async fn root_method_proceed<T, F, Fut>(
        &self,
        cx: &CallContext,
        method: &CompensableMethod,
        proceed: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let transaction = self.manager.begin(cx).await?;
        let xid = *transaction.xid();

        let result = match proceed(cx.clone()).await {
            Ok(value) => self
                .manager
                .commit(cx, method.async_confirm)
                .await
                .map(|()| value)
                .map_err(anyhow::Error::from),
            Err(business) => {
                if self.is_delay_cancel(method, &business) {
                    warn!(%xid, error = %business, "Delay-cancel error, rollback left to recovery");
                } else if let Err(e) = self.manager.rollback(cx, method.async_cancel).await {
                    error!(%xid, error = %e, "Rollback failed after Try error");
                }
                Err(business)
            }
        };

        self.finish(cx, &xid, result)
    }

    async fn provider_method_proceed<T, F, Fut>(
        &self,
        cx: &CallContext,
        method: &CompensableMethod,
        context: &TransactionContext,
        proceed: F,
    ) -> anyhow::Result<T>
    where
        T: Default,
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match context.status {
            TransactionStatus::Trying => {
                let transaction = self.manager.propagation_new_begin(cx, context).await?;
                let result = proceed(cx.clone()).await;
                self.finish(cx, transaction.xid(), result)
            }
            TransactionStatus::Confirming | TransactionStatus::Cancelling => {
                let transaction = match self.manager.propagation_exist_begin(cx, context).await {
                    Ok(transaction) => transaction,
                    Err(e) if e.is_no_existed_transaction() => {
                        debug!(xid = %context.xid, status = %context.status, "Branch already resolved");
                        return Ok(T::default());
                    }
                    Err(e) => return Err(e.into()),
                };

                let terminated = if context.status == TransactionStatus::Confirming {
                    self.manager.commit(cx, method.async_confirm).await
                } else {
                    self.manager.rollback(cx, method.async_cancel).await
                };
                let result = terminated
                    .map(|()| T::default())
                    .map_err(anyhow::Error::from);
                self.finish(cx, transaction.xid(), result)
            }
        }
    }

    fn is_delay_cancel(&self, method: &CompensableMethod, err: &anyhow::Error) -> bool {
        method.delay_cancel.matches(err) || self.delay_cancel.matches(err)
    }

    /// Pop the transaction and merge a cleanup failure into the call result
    ///
    /// A call error wins over a cleanup error.
    fn finish<T>(
        &self,
        cx: &CallContext,
        xid: &TransactionXid,
        result: anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        match (self.manager.clean_after_completion(cx, xid), result) {
            (Ok(()), result) => result,
            (Err(cleanup), Ok(_)) => Err(cleanup.into()),
            (Err(cleanup), Err(e)) => {
                error!(%xid, error = %cleanup, "Cleanup failed after call error");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_root() {
        assert_eq!(
            classify(Propagation::Required, false, None),
            MethodRole::Root
        );
    }

    #[test]
    fn test_classify_provider_for_any_propagation() {
        let context = TransactionContext::new(
            TransactionXid::new_root().branch(),
            TransactionStatus::Trying,
            Propagation::Required,
        );
        for propagation in [
            Propagation::Required,
            Propagation::Mandatory,
            Propagation::Supports,
        ] {
            assert_eq!(
                classify(propagation, false, Some(&context)),
                MethodRole::Provider
            );
        }
    }

    #[test]
    fn test_classify_normal() {
        let context = TransactionContext::new(
            TransactionXid::new_root(),
            TransactionStatus::Trying,
            Propagation::Required,
        );
        // Supports without a context
        assert_eq!(
            classify(Propagation::Supports, false, None),
            MethodRole::Normal
        );
        // Nested inside an active transaction
        assert_eq!(
            classify(Propagation::Required, true, None),
            MethodRole::Normal
        );
        assert_eq!(
            classify(Propagation::Required, true, Some(&context)),
            MethodRole::Normal
        );
    }

    #[test]
    fn test_method_builders() {
        let method = CompensableMethod::mandatory()
            .with_async_confirm(true)
            .with_editor("null");
        assert_eq!(method.propagation, Propagation::Mandatory);
        assert!(method.async_confirm);
        assert!(!method.async_cancel);
        assert_eq!(method.editor, "null");
        assert_eq!(CompensableMethod::supports().propagation, Propagation::Supports);
    }
}
