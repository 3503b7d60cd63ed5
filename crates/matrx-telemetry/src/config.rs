//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full
    /// `EnvFilter` directive string
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "matrx".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `MATRX_SERVICE_NAME`: Service name (default: matrx)
    /// - `MATRX_LOG_LEVEL`, `LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `MATRX_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `MATRX_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("MATRX_SERVICE_NAME").unwrap_or_else(|_| "matrx".to_string()),

            log_level: env::var("MATRX_LOG_LEVEL")
                .or_else(|_| env::var("LOG_LEVEL"))
                .or_else(|_| env::var("RUST_LOG"))
                .map(|v| v.to_lowercase())
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("MATRX_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("MATRX_JSON_LOGS")
                .map(|v| flag(&v))
                .unwrap_or(is_container),
        }
    }

    /// Environment configuration with a component-specific service name.
    pub fn for_component(component: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = format!("matrx-{component}");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "matrx");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_for_component() {
        let config = TelemetryConfig::for_component("renderer");
        assert_eq!(config.service_name, "matrx-renderer");
    }

    #[test]
    fn test_flag_values() {
        assert!(flag("TRUE"));
        assert!(flag("1"));
        assert!(!flag("off"));
        assert!(!flag(""));
    }
}
