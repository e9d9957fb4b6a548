//! tcc Runtime
//!
//! Transaction manager, protocol handler, dispatcher, and recovery for tcc.
//!
//! # Overview
//!
//! The runtime provides:
//! - A per-call transaction stack ([`CallContext`])
//! - Lifecycle orchestration ([`TransactionManager`])
//! - ROOT / PROVIDER classification and flows ([`CompensableInterceptor`])
//! - Participant calls through a registered-handler table ([`InvocationDispatcher`])
//! - A single recovery pass over stuck transactions ([`TransactionRecovery`])
//!
//! # TigerStyle
//! - Status persisted before any participant is called
//! - Bounded async terminate pool (no unbounded task spawning)
//! - Records deleted only after a successful sweep

pub mod call_context;
pub mod dispatcher;
pub mod interceptor;
pub mod manager;
pub mod recovery;
pub mod runtime;

pub use call_context::CallContext;
pub use dispatcher::{DispatcherStats, InvocationDispatcher, InvocationHandler};
pub use interceptor::{classify, CompensableInterceptor, CompensableMethod, MethodRole};
pub use manager::TransactionManager;
pub use recovery::{RecoveryReport, TransactionRecovery};
pub use runtime::{TccRuntime, TccRuntimeBuilder};
