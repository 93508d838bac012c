//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output (for development)
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Network identifier (mainnet, testnet4, regtest)
    pub network: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "chainstate".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            network: "regtest".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QC_SERVICE_NAME`: Service name (default: chainstate)
    /// - `QC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `QC_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `QC_LOG_JSON`: Enable JSON logs (default: false in dev, true in containers)
    /// - `QC_NETWORK`: Network name (default: regtest)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("QC_SERVICE_NAME").unwrap_or_else(|_| "chainstate".to_string()),

            log_level: env::var("QC_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("QC_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("QC_LOG_JSON")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            network: env::var("QC_NETWORK").unwrap_or_else(|_| "regtest".to_string()),
        }
    }

    /// Get the full service name including the network.
    pub fn full_service_name(&self) -> String {
        format!("{}-{}", self.service_name, self.network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "chainstate");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_full_service_name() {
        let mut config = TelemetryConfig::default();
        assert_eq!(config.full_service_name(), "chainstate-regtest");

        config.network = "mainnet".to_string();
        assert_eq!(config.full_service_name(), "chainstate-mainnet");
    }
}
