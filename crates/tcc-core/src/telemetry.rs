//! Telemetry infrastructure
//!
//! TigerStyle: Explicit telemetry configuration, one global subscriber.
//!
//! Installs a `tracing` subscriber with an `EnvFilter`. Transaction code only
//! emits events and spans; it never configures output itself.

use crate::error::{Error, Result};

/// Default log filter when `RUST_LOG` is unset
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Whether to output events to stdout
    pub stdout_enabled: bool,
    /// Log level filter
    pub log_level: String,
    /// Whether to include span targets in the output
    pub targets_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tcc".to_string(),
            stdout_enabled: true,
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            targets_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Hide event targets
    pub fn without_targets(mut self) -> Self {
        self.targets_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `TCC_SERVICE_NAME`: Service name (default: "tcc")
    /// - `RUST_LOG`: Log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("TCC_SERVICE_NAME").unwrap_or_else(|_| "tcc".to_string());
        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());

        Self {
            service_name,
            log_level,
            ..Default::default()
        }
    }
}

/// Initialize the global tracing subscriber
///
/// Fails if a global subscriber is already installed.
///
/// # Example
///
/// ```rust,ignore
/// use tcc_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// init_telemetry(TelemetryConfig::new("order-service").with_log_level("tcc=debug"))?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer().with_target(config.targets_enabled))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            reason: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        "Telemetry initialized"
    );

    Ok(())
}
