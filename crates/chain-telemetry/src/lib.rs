//! # Chain Telemetry
//!
//! Structured logging for the chain-state node, built on `tracing`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chain_telemetry::{init_logging, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! init_logging(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `QC_LOG_LEVEL` | `info` | Log level filter |
//! | `QC_LOG_JSON` | `false` | Emit JSON lines instead of pretty output |
//! | `QC_NETWORK` | `regtest` | Network tag in the service name |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Convenience macro for creating a span with component context.
#[macro_export]
macro_rules! subsystem_span {
    ($name:expr, $($field:tt)*) => {
        tracing::info_span!($name, $($field)*)
    };
}
