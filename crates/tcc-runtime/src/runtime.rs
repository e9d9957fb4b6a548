//! Runtime wiring
//!
//! TigerStyle: Single entry point, explicit configuration, validated once.

use crate::dispatcher::InvocationDispatcher;
use crate::interceptor::CompensableInterceptor;
use crate::manager::TransactionManager;
use crate::recovery::TransactionRecovery;
use std::sync::Arc;
use tcc_core::{Result, TccConfig, TimeProvider, WallClockTime};
use tcc_storage::{CachingTransactionRepository, MemoryTransactionRepository, TransactionRepository};
use tracing::info;

/// Builder for a [`TccRuntime`]
pub struct TccRuntimeBuilder {
    config: TccConfig,
    repository: Option<Arc<dyn TransactionRepository>>,
    time: Option<Arc<dyn TimeProvider>>,
}

impl TccRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: TccConfig::default(),
            repository: None,
            time: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: TccConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the backing store (wrapped in the transaction cache on build)
    ///
    /// Defaults to an in-memory store.
    pub fn with_repository(mut self, repository: Arc<dyn TransactionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Set the time provider (defaults to wall-clock time)
    pub fn with_time_provider(mut self, time: Arc<dyn TimeProvider>) -> Self {
        self.time = Some(time);
        self
    }

    /// Validate the configuration and wire the components
    pub fn build(self) -> Result<TccRuntime> {
        self.config.validate()?;

        let time = self
            .time
            .unwrap_or_else(|| Arc::new(WallClockTime::new()) as Arc<dyn TimeProvider>);
        let backend = self.repository.unwrap_or_else(|| {
            Arc::new(MemoryTransactionRepository::with_time_provider(time.clone()))
                as Arc<dyn TransactionRepository>
        });
        let repository: Arc<dyn TransactionRepository> = Arc::new(
            CachingTransactionRepository::with_config(backend, &self.config.cache, time.clone()),
        );

        let dispatcher = Arc::new(InvocationDispatcher::new());
        let manager = Arc::new(TransactionManager::with_config(
            repository,
            dispatcher.clone(),
            &self.config.recovery,
            time,
        ));
        let interceptor = Arc::new(CompensableInterceptor::with_delay_cancel(
            manager.clone(),
            self.config.recovery.delay_cancel_exceptions.clone(),
        ));
        let recovery = Arc::new(TransactionRecovery::new(
            manager.clone(),
            self.config.recovery.clone(),
        ));

        info!(
            cache_entries_max = self.config.cache.entries_max,
            terminate_pool_size = self.config.recovery.async_terminate_pool_size,
            cron_expression = %self.config.recovery.cron_expression,
            "tcc runtime built"
        );

        Ok(TccRuntime {
            config: self.config,
            dispatcher,
            manager,
            interceptor,
            recovery,
        })
    }
}

impl Default for TccRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired TCC components for one process
pub struct TccRuntime {
    config: TccConfig,
    dispatcher: Arc<InvocationDispatcher>,
    manager: Arc<TransactionManager>,
    interceptor: Arc<CompensableInterceptor>,
    recovery: Arc<TransactionRecovery>,
}

impl TccRuntime {
    pub fn builder() -> TccRuntimeBuilder {
        TccRuntimeBuilder::new()
    }

    pub fn config(&self) -> &TccConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<InvocationDispatcher> {
        &self.dispatcher
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub fn interceptor(&self) -> &Arc<CompensableInterceptor> {
        &self.interceptor
    }

    pub fn recovery(&self) -> &Arc<TransactionRecovery> {
        &self.recovery
    }

    /// Wait for in-flight async sweeps to finish
    pub async fn shutdown(&self) -> Result<()> {
        info!("Draining tcc terminate pool");
        self.manager.wait_idle().await
    }
}
