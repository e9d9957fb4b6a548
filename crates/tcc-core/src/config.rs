//! Configuration for tcc
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::delay_cancel::DelayCancelSet;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for tcc
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TccConfig {
    /// Transaction cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Recovery and termination configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl TccConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.recovery.validate()?;
        Ok(())
    }
}

/// Transaction cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Idle time after which a cached transaction is dropped (milliseconds)
    #[serde(default = "default_expire_after_access_ms")]
    pub expire_after_access_ms: u64,

    /// Maximum number of cached transactions
    #[serde(default = "default_entries_max")]
    pub entries_max: usize,
}

fn default_expire_after_access_ms() -> u64 {
    CACHE_EXPIRE_AFTER_ACCESS_MS_DEFAULT
}

fn default_entries_max() -> usize {
    CACHE_ENTRIES_COUNT_DEFAULT
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expire_after_access_ms: default_expire_after_access_ms(),
            entries_max: default_entries_max(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.expire_after_access_ms == 0
            || self.expire_after_access_ms > CACHE_EXPIRE_AFTER_ACCESS_MS_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "cache.expire_after_access_ms".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.expire_after_access_ms, CACHE_EXPIRE_AFTER_ACCESS_MS_MAX
                ),
            });
        }

        if self.entries_max == 0 || self.entries_max > CACHE_ENTRIES_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "cache.entries_max".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.entries_max, CACHE_ENTRIES_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}

/// Recovery and termination configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recovery attempts before a transaction is left to operators
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,

    /// Idle time before a transaction is considered stuck (seconds)
    #[serde(default = "default_recover_duration_secs")]
    pub recover_duration_secs: u64,

    /// Schedule for the external recovery driver (Quartz-style, 6 or 7 fields)
    ///
    /// Only the field count is validated here. Parsing the fields is left to
    /// the scheduler that drives recovery.
    #[serde(default = "default_cron_expression")]
    pub cron_expression: String,

    /// Concurrent async Confirm/Cancel sweeps
    #[serde(default = "default_async_terminate_pool_size")]
    pub async_terminate_pool_size: usize,

    /// Business errors that skip the immediate rollback
    #[serde(skip)]
    pub delay_cancel_exceptions: DelayCancelSet,
}

fn default_max_retry_count() -> u32 {
    RECOVER_RETRY_COUNT_DEFAULT
}

fn default_recover_duration_secs() -> u64 {
    RECOVER_DURATION_SECS_DEFAULT
}

fn default_cron_expression() -> String {
    RECOVER_CRON_EXPRESSION_DEFAULT.to_string()
}

fn default_async_terminate_pool_size() -> usize {
    TERMINATE_POOL_SIZE_DEFAULT
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            recover_duration_secs: default_recover_duration_secs(),
            cron_expression: default_cron_expression(),
            async_terminate_pool_size: default_async_terminate_pool_size(),
            delay_cancel_exceptions: DelayCancelSet::default(),
        }
    }
}

impl RecoveryConfig {
    /// Recover duration in milliseconds
    pub fn recover_duration_ms(&self) -> u64 {
        self.recover_duration_secs.saturating_mul(1000)
    }

    /// Age after which a BRANCH record is recovered by itself instead of by its root
    pub fn branch_recover_after_ms(&self) -> u64 {
        self.recover_duration_ms()
            .saturating_mul(u64::from(self.max_retry_count))
    }

    fn validate(&self) -> Result<()> {
        if self.recover_duration_secs == 0 {
            return Err(Error::InvalidConfiguration {
                field: "recovery.recover_duration_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }

        // Shape check only
        let fields = self.cron_expression.split_whitespace().count();
        if !(6..=7).contains(&fields) {
            return Err(Error::InvalidConfiguration {
                field: "recovery.cron_expression".into(),
                reason: format!(
                    "'{}' has {} fields, expected 6 or 7",
                    self.cron_expression, fields
                ),
            });
        }

        if self.async_terminate_pool_size == 0
            || self.async_terminate_pool_size > TERMINATE_POOL_SIZE_MAX
        {
            return Err(Error::InvalidConfiguration {
                field: "recovery.async_terminate_pool_size".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.async_terminate_pool_size, TERMINATE_POOL_SIZE_MAX
                ),
            });
        }

        Ok(())
    }
}
