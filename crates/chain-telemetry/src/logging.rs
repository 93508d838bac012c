//! Structured logging setup.
//!
//! Logs are either pretty-printed for development or formatted as JSON with
//! consistent fields for log shipping:
//! - `timestamp`, `level`, `target`
//! - `subsystem`: Component emitting the event (chain_index, governor, ...)
//! - `block_height` / `block_hash` for block events

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global tracing subscriber.
///
/// Fails with [`TelemetryError::AlreadyInitialized`] if a subscriber is
/// already installed, which is common in test binaries; callers there may
/// ignore the error.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))?;

    if !config.console_output {
        return tracing_subscriber::registry()
            .with(env_filter)
            .try_init()
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()));
    }

    if config.json_logs {
        // JSON output for containers/production
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    } else {
        // Pretty output for development
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    }

    tracing::info!(
        service = %config.full_service_name(),
        json_logs = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

/// Helper to create structured log entries with consistent formatting.
#[macro_export]
macro_rules! log_event {
    ($level:ident, $subsystem:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a block-related event with standard fields.
#[macro_export]
macro_rules! log_block_event {
    ($level:ident, $subsystem:expr, $msg:expr, $block_height:expr, $block_hash:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            subsystem = $subsystem,
            block_height = $block_height,
            block_hash = %$block_hash,
            $($($field)*,)?
            $msg
        )
    };
}
