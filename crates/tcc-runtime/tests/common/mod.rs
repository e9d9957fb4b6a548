//! Shared fixtures for runtime integration tests

#![allow(dead_code)]

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tcc_core::constants::TRANSACTION_CONTEXT_PARAM_TYPE;
use tcc_core::{
    InvocationContext, ManualClock, TccConfig, TimeProvider, Transaction, TransactionStatus,
};
use tcc_runtime::{TccRuntime, TransactionManager};
use tcc_storage::{MemoryTransactionRepository, TransactionRepository};

/// Ordered record of participant calls
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// One process: runtime over an inspectable in-memory store and a manual clock
pub struct Node {
    pub runtime: TccRuntime,
    pub store: Arc<MemoryTransactionRepository>,
    pub clock: ManualClock,
    pub journal: Journal,
}

impl Node {
    pub fn new() -> Self {
        Self::with_config(TccConfig::default())
    }

    pub fn with_config(config: TccConfig) -> Self {
        let clock = ManualClock::default();
        let time: Arc<dyn TimeProvider> = Arc::new(clock.clone());
        let store = Arc::new(MemoryTransactionRepository::with_time_provider(time.clone()));
        let runtime = TccRuntime::builder()
            .with_config(config)
            .with_repository(store.clone())
            .with_time_provider(time)
            .build()
            .unwrap();

        Self {
            runtime,
            store,
            clock,
            journal: Journal::default(),
        }
    }

    pub fn manager(&self) -> Arc<TransactionManager> {
        self.runtime.manager().clone()
    }

    /// Handler that records `target::method` and succeeds
    pub async fn register_recording(&self, target: &str, method: &str) {
        let journal = self.journal.clone();
        let entry = format!("{}::{}", target, method);
        self.runtime
            .dispatcher()
            .register_fn(target, method, move |_| {
                let journal = journal.clone();
                let entry = entry.clone();
                async move {
                    journal.push(entry);
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            })
            .await
            .unwrap();
    }

    /// Handler that fails until `healthy` is set, then records and succeeds
    pub async fn register_flaky(&self, target: &str, method: &str, healthy: Arc<AtomicBool>) {
        let journal = self.journal.clone();
        let entry = format!("{}::{}", target, method);
        self.runtime
            .dispatcher()
            .register_fn(target, method, move |_| {
                let journal = journal.clone();
                let entry = entry.clone();
                let healthy = healthy.clone();
                async move {
                    if !healthy.load(Ordering::SeqCst) {
                        anyhow::bail!("{} unavailable", entry);
                    }
                    journal.push(entry);
                    Ok::<_, anyhow::Error>(Value::Null)
                }
            })
            .await
            .unwrap();
    }

    /// Every record in the backing store
    pub async fn records(&self) -> Vec<Transaction> {
        self.store
            .find_all_unmodified_since(chrono::DateTime::<chrono::Utc>::MAX_UTC)
            .await
            .unwrap()
    }

    pub async fn statuses(&self) -> Vec<TransactionStatus> {
        self.records().await.iter().map(|t| t.status()).collect()
    }

    /// Move past the recovery window
    pub fn advance_past_recover_duration(&self) {
        let secs = self.runtime.config().recovery.recover_duration_secs;
        self.clock.advance_ms(secs * 1000 + 1_000);
    }
}

/// Descriptor with a transaction context slot
pub fn call(target: &str, method: &str) -> InvocationContext {
    InvocationContext::new(target, method).with_arg(TRANSACTION_CONTEXT_PARAM_TYPE, Value::Null)
}

#[derive(Debug, thiserror::Error)]
#[error("inventory locked, retry later")]
pub struct InventoryLocked;
