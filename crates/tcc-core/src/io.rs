//! Time abstraction for deterministic testing
//!
//! TigerStyle: All wall-clock reads go through a trait.
//!
//! Transaction timestamps, cache idle expiry, and the recovery window all
//! depend on "now". Production code uses [`WallClockTime`]; tests use
//! [`ManualClock`], which only moves when told to.
//!
//! ```text
//!  Manager / Cache / Recovery
//!             │
//!       TimeProvider
//!        ┌────┴─────┐
//!  WallClockTime  ManualClock
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

/// Time provider abstraction
///
/// Never use `SystemTime::now()` or `chrono::Utc::now()` directly in
/// transaction code.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Get current time as a UTC timestamp
    fn now_utc(&self) -> DateTime<Utc> {
        millis_to_utc(self.now_ms())
    }
}

/// Convert milliseconds since epoch to a UTC timestamp, clamping to the epoch on overflow
pub fn millis_to_utc(ms: u64) -> DateTime<Utc> {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock
///
/// Time only advances through [`ManualClock::advance_ms`] or [`ManualClock::set_ms`].
/// Cloning shares the underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current_time_ms: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl ManualClock {
    /// Create a clock starting at the given millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Advance time by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Set the current time
    pub fn set_ms(&self, ms: u64) {
        self.current_time_ms.store(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl Default for ManualClock {
    /// Starts at 2024-01-01T00:00:00Z for predictable timestamps
    fn default() -> Self {
        Self::from_millis(1_704_067_200_000)
    }
}

#[async_trait]
impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms().saturating_add(ms);
        loop {
            let notified = self.notify.notified();
            if self.now_ms() >= target_ms {
                return;
            }
            notified.await;
        }
    }
}
