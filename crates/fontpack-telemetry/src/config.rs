//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// Logging configuration.
    pub logging: LogConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }
}

/// Builder for [`TelemetryConfig`].
#[derive(Debug, Default)]
pub struct TelemetryConfigBuilder {
    log_level: Option<String>,
    json_logs: Option<bool>,
    metrics_enabled: Option<bool>,
}

impl TelemetryConfigBuilder {
    /// Creates a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log filter directive.
    #[must_use]
    pub fn log_level(mut self, level: &str) -> Self {
        self.log_level = Some(level.to_string());
        self
    }

    /// Selects JSON (`true`) or pretty (`false`) log output.
    #[must_use]
    pub fn json_logs(mut self, json: bool) -> Self {
        self.json_logs = Some(json);
        self
    }

    /// Enables or disables metrics.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> TelemetryConfig {
        let mut logging = match self.json_logs {
            Some(false) => LogConfig::development(),
            _ => LogConfig::production(),
        };
        if let Some(level) = self.log_level {
            logging.level = level;
        }

        let metrics = MetricsConfig {
            enabled: self.metrics_enabled.unwrap_or(true),
            ..MetricsConfig::default()
        };

        TelemetryConfig { logging, metrics }
    }
}
