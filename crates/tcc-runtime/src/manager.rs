//! Transaction manager
//!
//! TigerStyle: Every status change is persisted before any participant is
//! called; a record is deleted only after its sweep succeeded.
//!
//! ```text
//!  begin / propagation_new_begin ──► create ──► push
//!  commit   ──► Confirming ──► update ──► sweep: confirm p1..pn ──► delete
//!  rollback ──► Cancelling ──► update ──► sweep: cancel  p1..pn ──► delete
//!  clean_after_completion ──► pop (must be top)
//! ```
//!
//! A failed sweep leaves the record in the store with its terminating status;
//! only the recovery pass retries it.

use crate::call_context::CallContext;
use crate::dispatcher::InvocationDispatcher;
use std::sync::Arc;
use tcc_core::{
    Error, InvocationContext, Participant, Propagation, RecoveryConfig, Result, TimeProvider,
    Transaction, TransactionContext, TransactionStatus, TransactionXid, WallClockTime,
};
use tcc_storage::TransactionRepository;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

/// Which sweep to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Sweep {
    Confirm,
    Cancel,
}

impl Sweep {
    pub(crate) fn status(self) -> TransactionStatus {
        match self {
            Sweep::Confirm => TransactionStatus::Confirming,
            Sweep::Cancel => TransactionStatus::Cancelling,
        }
    }

    fn failed(self, xid: &TransactionXid, reason: impl Into<String>) -> Error {
        match self {
            Sweep::Confirm => Error::confirming_failed(xid, reason),
            Sweep::Cancel => Error::cancelling_failed(xid, reason),
        }
    }
}

/// Drives transactions through their lifecycle
///
/// Cloning is cheap and every clone shares the repository, the dispatcher
/// and the async terminate pool.
#[derive(Clone)]
pub struct TransactionManager {
    repository: Arc<dyn TransactionRepository>,
    dispatcher: Arc<InvocationDispatcher>,
    time: Arc<dyn TimeProvider>,
    terminate_permits: Arc<Semaphore>,
    terminate_pool_size: usize,
}

impl TransactionManager {
    /// Create a manager with the default recovery configuration and wall-clock time
    pub fn new(
        repository: Arc<dyn TransactionRepository>,
        dispatcher: Arc<InvocationDispatcher>,
    ) -> Self {
        Self::with_config(
            repository,
            dispatcher,
            &RecoveryConfig::default(),
            Arc::new(WallClockTime::new()),
        )
    }

    /// Create a manager with an explicit configuration and time provider
    pub fn with_config(
        repository: Arc<dyn TransactionRepository>,
        dispatcher: Arc<InvocationDispatcher>,
        config: &RecoveryConfig,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        assert!(
            config.async_terminate_pool_size > 0,
            "terminate pool must have at least one slot"
        );

        Self {
            repository,
            dispatcher,
            time,
            terminate_permits: Arc::new(Semaphore::new(config.async_terminate_pool_size)),
            terminate_pool_size: config.async_terminate_pool_size,
        }
    }

    pub fn repository(&self) -> &Arc<dyn TransactionRepository> {
        &self.repository
    }

    pub fn dispatcher(&self) -> &Arc<InvocationDispatcher> {
        &self.dispatcher
    }

    pub fn time(&self) -> &Arc<dyn TimeProvider> {
        &self.time
    }

    // =========================================================================
    // Begin
    // =========================================================================

    /// Start a new ROOT transaction
    #[instrument(skip(self, cx))]
    pub async fn begin(&self, cx: &CallContext) -> Result<Transaction> {
        cx.ensure_capacity()?;

        let transaction = Transaction::new_root(self.time.now_utc());
        self.persist_create(&transaction).await?;
        cx.push(transaction.clone())?;

        info!(xid = %transaction.xid(), "Root transaction started");
        Ok(transaction)
    }

    /// Start a BRANCH transaction for an inbound Trying context
    #[instrument(skip(self, cx, context), fields(xid = %context.xid))]
    pub async fn propagation_new_begin(
        &self,
        cx: &CallContext,
        context: &TransactionContext,
    ) -> Result<Transaction> {
        cx.ensure_capacity()?;

        let transaction = Transaction::new_branch(context, self.time.now_utc());
        self.persist_create(&transaction).await?;
        cx.push(transaction.clone())?;

        debug!("Branch transaction started");
        Ok(transaction)
    }

    /// Load the BRANCH transaction named by an inbound Confirming/Cancelling context
    ///
    /// Returns `NoExistedTransaction` if the record is gone, which means the
    /// branch was already resolved.
    #[instrument(skip(self, cx, context), fields(xid = %context.xid, status = %context.status))]
    pub async fn propagation_exist_begin(
        &self,
        cx: &CallContext,
        context: &TransactionContext,
    ) -> Result<Transaction> {
        if !context.status.is_terminating() {
            return Err(Error::illegal_state(format!(
                "existing branch {} joined with non-terminating status {}",
                context.xid, context.status
            )));
        }
        cx.ensure_capacity()?;

        let mut transaction = self
            .repository
            .find_by_xid(&context.xid)
            .await?
            .ok_or_else(|| Error::no_existed_transaction(context.xid))?;

        transaction.change_status(context.status)?;
        cx.push(transaction.clone())?;
        Ok(transaction)
    }

    // =========================================================================
    // Terminate
    // =========================================================================

    /// Confirm the current transaction
    ///
    /// The Confirming status is persisted first. With `async_commit` the
    /// sweep runs on the terminate pool and this returns right after the
    /// persist; a saturated pool is reported as `ConfirmingFailed`.
    #[instrument(skip(self, cx))]
    pub async fn commit(&self, cx: &CallContext, async_commit: bool) -> Result<()> {
        self.terminate(cx, Sweep::Confirm, async_commit).await
    }

    /// Cancel the current transaction
    ///
    /// Symmetric to [`commit`](Self::commit), reporting `CancellingFailed`.
    #[instrument(skip(self, cx))]
    pub async fn rollback(&self, cx: &CallContext, async_rollback: bool) -> Result<()> {
        self.terminate(cx, Sweep::Cancel, async_rollback).await
    }

    async fn terminate(&self, cx: &CallContext, sweep: Sweep, run_async: bool) -> Result<()> {
        let mut transaction = cx.require_current()?;
        transaction.change_status(sweep.status())?;
        self.persist_update(&mut transaction).await?;
        cx.replace_top(transaction.clone())?;

        if run_async {
            self.spawn_sweep(transaction, sweep)
        } else {
            self.run_sweep(transaction, sweep).await
        }
    }

    fn spawn_sweep(&self, transaction: Transaction, sweep: Sweep) -> Result<()> {
        let permit = match self.terminate_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(e) => {
                warn!(xid = %transaction.xid(), ?sweep, "Terminate pool rejected sweep");
                return Err(sweep.failed(transaction.xid(), format!("terminate pool: {}", e)));
            }
        };

        let manager = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            // Failure is already logged by the sweep; the record stays for recovery.
            let _ = manager.run_sweep(transaction, sweep).await;
        });
        Ok(())
    }

    /// Invoke every participant in enlistment order, then delete the record
    pub(crate) async fn run_sweep(&self, transaction: Transaction, sweep: Sweep) -> Result<()> {
        debug_assert_eq!(transaction.status(), sweep.status());
        let xid = *transaction.xid();

        for participant in transaction.participants() {
            let context = transaction.context_for(participant);
            let invocation = match sweep {
                Sweep::Confirm => &participant.confirm,
                Sweep::Cancel => &participant.cancel,
            };

            if let Err(e) = self
                .dispatcher
                .invoke(&context, invocation, &participant.editor)
                .await
            {
                error!(%xid, ?sweep, participant = %participant.xid, error = %e, "Sweep failed, record kept for recovery");
                return Err(sweep.failed(&xid, e.to_string()));
            }
        }

        if let Err(e) = self.repository.delete(&transaction).await {
            error!(%xid, ?sweep, error = %e, "Delete after sweep failed, record kept for recovery");
            return Err(sweep.failed(&xid, e.to_string()));
        }

        info!(%xid, ?sweep, participants = transaction.participants().len(), "Transaction completed");
        Ok(())
    }

    /// Wait until no async sweep is in flight
    pub async fn wait_idle(&self) -> Result<()> {
        let permits = u32::try_from(self.terminate_pool_size)
            .map_err(|_| Error::internal("terminate pool size exceeds u32"))?;
        let _all = self
            .terminate_permits
            .acquire_many(permits)
            .await
            .map_err(|e| Error::internal(format!("terminate pool closed: {}", e)))?;
        Ok(())
    }

    /// Number of async sweeps currently running
    pub fn sweeps_in_flight(&self) -> usize {
        self.terminate_pool_size - self.terminate_permits.available_permits()
    }

    // =========================================================================
    // Participants
    // =========================================================================

    /// Append a participant to the current transaction and persist it
    #[instrument(skip(self, cx, participant), fields(participant = %participant.xid))]
    pub async fn enlist_participant(&self, cx: &CallContext, participant: Participant) -> Result<()> {
        let mut transaction = cx.require_current()?;
        transaction.enlist_participant(participant)?;
        self.persist_update(&mut transaction).await?;
        cx.replace_top(transaction)
    }

    /// Enlist a participant under a fresh branch Xid of the current transaction
    ///
    /// Returns the Trying context to send along with the participant's Try call.
    pub async fn enlist_branch(
        &self,
        cx: &CallContext,
        confirm: InvocationContext,
        cancel: InvocationContext,
        editor: &str,
    ) -> Result<TransactionContext> {
        let current = cx.require_current()?;
        let branch_xid = current.xid().branch();

        let participant = Participant::new(branch_xid, confirm, cancel).with_editor(editor);
        self.enlist_participant(cx, participant).await?;

        Ok(TransactionContext::new(
            branch_xid,
            TransactionStatus::Trying,
            Propagation::Required,
        ))
    }

    // =========================================================================
    // Completion / Inspection
    // =========================================================================

    /// Pop `xid` from the stack; `IllegalState` if it is not the top
    pub fn clean_after_completion(&self, cx: &CallContext, xid: &TransactionXid) -> Result<()> {
        cx.pop_if_top(xid)?;
        Ok(())
    }

    pub fn current_transaction(&self, cx: &CallContext) -> Result<Option<Transaction>> {
        cx.current()
    }

    pub fn is_transaction_active(&self, cx: &CallContext) -> Result<bool> {
        cx.is_active()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist_create(&self, transaction: &Transaction) -> Result<()> {
        match self.repository.create(transaction).await? {
            0 => Err(Error::StorageFailed {
                operation: "create".into(),
                xid: transaction.xid().to_string(),
                reason: "record already exists".into(),
            }),
            _ => Ok(()),
        }
    }

    /// Version-checked update; zero rows is an optimistic lock conflict
    pub(crate) async fn persist_update(&self, transaction: &mut Transaction) -> Result<()> {
        let read_version = transaction.version();
        match self.repository.update(transaction).await? {
            0 => Err(Error::OptimisticLock {
                xid: transaction.xid().to_string(),
                version: read_version.value(),
            }),
            _ => Ok(()),
        }
    }
}
