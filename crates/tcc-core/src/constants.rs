//! TigerStyle constants for tcc
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Transaction Limits
// =============================================================================

/// Maximum depth of the per-call transaction stack (nested compensable calls)
pub const TRANSACTION_STACK_DEPTH_MAX: usize = 64;

/// Maximum number of participants enlisted in one transaction
pub const TRANSACTION_PARTICIPANTS_COUNT_MAX: usize = 1024;

/// Length of the global id and branch qualifier of an Xid in bytes
pub const XID_PART_LENGTH_BYTES: usize = 16;

// =============================================================================
// Cache Limits
// =============================================================================

/// Default idle expiry of a cached transaction in milliseconds (2 min)
pub const CACHE_EXPIRE_AFTER_ACCESS_MS_DEFAULT: u64 = 120 * 1000;

/// Maximum idle expiry of a cached transaction in milliseconds (1 hour)
pub const CACHE_EXPIRE_AFTER_ACCESS_MS_MAX: u64 = 60 * 60 * 1000;

/// Default maximum number of cached transactions
pub const CACHE_ENTRIES_COUNT_DEFAULT: usize = 1000;

/// Upper bound for the configurable number of cached transactions
pub const CACHE_ENTRIES_COUNT_MAX: usize = 1_000_000;

// =============================================================================
// Recovery Limits
// =============================================================================

/// Default number of recovery attempts before a transaction is abandoned to operators
pub const RECOVER_RETRY_COUNT_DEFAULT: u32 = 30;

/// Default age in seconds before an unmodified transaction is considered stuck (2 min)
pub const RECOVER_DURATION_SECS_DEFAULT: u64 = 120;

/// Default cron expression for the external recovery scheduler (every minute)
pub const RECOVER_CRON_EXPRESSION_DEFAULT: &str = "0 */1 * * * ?";

/// Default number of concurrent async Confirm/Cancel sweeps
pub const TERMINATE_POOL_SIZE_DEFAULT: usize = 1024;

/// Upper bound for the async Confirm/Cancel pool
pub const TERMINATE_POOL_SIZE_MAX: usize = 65_536;

// =============================================================================
// Context Editors
// =============================================================================

/// Parameter type name marking the argument that carries the transaction context
pub const TRANSACTION_CONTEXT_PARAM_TYPE: &str = "TransactionContext";

/// Name under which the default context editor is registered
pub const EDITOR_NAME_DEFAULT: &str = "default";

/// Name under which the no-op context editor is registered
pub const EDITOR_NAME_NULL: &str = "null";
