//! Configuration for the fontpack server.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use fontpack_core::{DEFAULT_BASE_URL, DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use fontpack_telemetry::{LogConfig, MetricsConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Where `GET /` redirects to.
pub const DEFAULT_HOME_URL: &str = "https://github.com/jpillora/webfont-downloader";

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FontpackConfig {
    /// Listener settings.
    pub server: ServerSettings,
    /// Upstream font API settings.
    pub upstream: UpstreamSettings,
    /// Logging and metrics settings.
    pub telemetry: TelemetrySettings,
}

impl FontpackConfig {
    /// Create a new configuration builder.
    pub fn builder() -> FontpackConfigBuilder {
        FontpackConfigBuilder::default()
    }

    /// Load configuration from a TOML or JSON file.
    pub fn from_file(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ServerError::config(format!("failed to read config file: {e}")))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match extension {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
            _ => Err(ServerError::config(format!(
                "unsupported config format: {extension}"
            ))),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Variables are prefixed with `FONTPACK_`. The bare `PORT` variable is
    /// honoured as well; `FONTPACK_PORT` wins when both are set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in ["PORT", "FONTPACK_PORT"] {
            if let Some(port) = lookup(key).and_then(|p| p.parse().ok()) {
                self.server.listen_port = port;
            }
        }

        if let Some(addr) = lookup("FONTPACK_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Some(url) = lookup("FONTPACK_HOME_URL") {
            self.server.home_url = url;
        }

        if let Some(secs) = lookup("FONTPACK_REQUEST_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.server.request_timeout = Duration::from_secs(secs);
        }

        if let Some(url) = lookup("FONTPACK_UPSTREAM_URL") {
            self.upstream.base_url = url;
        }

        if let Some(secs) = lookup("FONTPACK_UPSTREAM_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.upstream.timeout = Duration::from_secs(secs);
        }

        if let Some(limit) = lookup("FONTPACK_CONCURRENCY").and_then(|s| s.parse().ok()) {
            self.upstream.concurrency = limit;
        }

        if let Some(level) = lookup("FONTPACK_LOG_LEVEL") {
            self.telemetry.log_level = level;
        }

        if let Some(json) = lookup("FONTPACK_JSON_LOGS").and_then(|s| s.parse().ok()) {
            self.telemetry.json_logs = json;
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ServerResult<()> {
        self.server
            .listen_addr
            .parse::<IpAddr>()
            .map_err(|e| ServerError::config(format!("invalid listen_addr: {e}")))?;

        if self.server.request_timeout.is_zero() {
            return Err(ServerError::config("request_timeout must be greater than zero"));
        }

        let base_url = &self.upstream.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ServerError::config(
                "upstream.base_url must start with http:// or https://",
            ));
        }

        if self.upstream.concurrency == 0 {
            return Err(ServerError::config("upstream.concurrency must be at least 1"));
        }
        if self.upstream.concurrency > MAX_CONCURRENCY {
            return Err(ServerError::config(format!(
                "upstream.concurrency must be at most {MAX_CONCURRENCY}"
            )));
        }

        Ok(())
    }

    /// Socket address to listen on.
    pub fn socket_addr(&self) -> ServerResult<SocketAddr> {
        let ip: IpAddr = self
            .server
            .listen_addr
            .parse()
            .map_err(|e| ServerError::config(format!("invalid listen_addr: {e}")))?;
        Ok(SocketAddr::new(ip, self.server.listen_port))
    }

    /// Telemetry setup derived from these settings.
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let base = if self.telemetry.json_logs {
            LogConfig::production()
        } else {
            LogConfig::development()
        };
        TelemetryConfig {
            logging: base.with_level(self.telemetry.log_level.clone()),
            metrics: MetricsConfig {
                enabled: self.telemetry.metrics_enabled,
                ..MetricsConfig::default()
            },
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to.
    pub listen_addr: String,
    /// Port to listen on.
    pub listen_port: u16,
    /// Time allowed for open connections to finish after shutdown starts.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Longest a bundle request may take before it is answered with an error.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Redirect target for `GET /`.
    pub home_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 3000,
            shutdown_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            home_url: DEFAULT_HOME_URL.to_string(),
        }
    }
}

/// Upstream font API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Stylesheet API base URL.
    pub base_url: String,
    /// Timeout for each outbound request.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Assets fetched concurrently per request.
    pub concurrency: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Log filter directive.
    pub log_level: String,
    /// JSON log lines instead of pretty output.
    pub json_logs: bool,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
        }
    }
}

/// Builder for `FontpackConfig`.
#[derive(Debug, Default)]
pub struct FontpackConfigBuilder {
    config: FontpackConfig,
}

impl FontpackConfigBuilder {
    /// Set the listen address.
    #[must_use]
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.server.listen_addr = addr.into();
        self
    }

    /// Set the listen port.
    #[must_use]
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.server.listen_port = port;
        self
    }

    /// Set the graceful shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.shutdown_timeout = timeout;
        self
    }

    /// Set the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.server.request_timeout = timeout;
        self
    }

    /// Set the redirect target for `GET /`.
    #[must_use]
    pub fn home_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.home_url = url.into();
        self
    }

    /// Set the upstream base URL.
    #[must_use]
    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.base_url = url.into();
        self
    }

    /// Set the outbound request timeout.
    #[must_use]
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.config.upstream.timeout = timeout;
        self
    }

    /// Set the asset concurrency limit.
    #[must_use]
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config.upstream.concurrency = limit;
        self
    }

    /// Set the log filter directive.
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.telemetry.log_level = level.into();
        self
    }

    /// Enable or disable metrics.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.config.telemetry.metrics_enabled = enabled;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerResult<FontpackConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Durations written as `"30s"`, `"500ms"`, `"2m"` or `"1h"`.
mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = if duration.subsec_millis() == 0 {
            format!("{}s", duration.as_secs())
        } else {
            format!("{}ms", duration.as_millis())
        };
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let invalid = || format!("invalid duration: {s:?}");
        let number = |n: &str| n.trim().parse::<u64>().map_err(|_| invalid());
        let scaled = |n: &str, unit: u64| number(n)?.checked_mul(unit).ok_or_else(invalid);

        if let Some(n) = s.strip_suffix("ms") {
            Ok(Duration::from_millis(number(n)?))
        } else if let Some(n) = s.strip_suffix('s') {
            Ok(Duration::from_secs(number(n)?))
        } else if let Some(n) = s.strip_suffix('m') {
            Ok(Duration::from_secs(scaled(n, 60)?))
        } else if let Some(n) = s.strip_suffix('h') {
            Ok(Duration::from_secs(scaled(n, 3600)?))
        } else {
            // Bare numbers are seconds.
            Ok(Duration::from_secs(number(s)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = FontpackConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0");
        assert_eq!(config.server.listen_port, 3000);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.upstream.base_url, "https://fonts.googleapis.com");
        assert_eq!(config.upstream.timeout, Duration::from_secs(30));
        assert_eq!(config.upstream.concurrency, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = FontpackConfig::builder()
            .listen_addr("127.0.0.1")
            .listen_port(9000)
            .upstream_url("http://127.0.0.1:8000")
            .concurrency(3)
            .build()
            .unwrap();

        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
        assert_eq!(config.upstream.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.upstream.concurrency, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(FontpackConfig::builder().concurrency(0).build().is_err());
        assert!(FontpackConfig::builder()
            .upstream_url("fonts.googleapis.com")
            .build()
            .is_err());
        assert!(FontpackConfig::builder().listen_addr("localhost").build().is_err());
        assert!(FontpackConfig::builder()
            .request_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(FontpackConfig::builder()
            .upstream_url("http://localhost:8000")
            .build()
            .is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "5000"),
            ("FONTPACK_UPSTREAM_URL", "http://mirror.test"),
            ("FONTPACK_UPSTREAM_TIMEOUT", "5"),
            ("FONTPACK_CONCURRENCY", "2"),
            ("FONTPACK_JSON_LOGS", "false"),
        ]
        .into_iter()
        .collect();

        let config = FontpackConfig::default()
            .with_overrides_from(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(config.server.listen_port, 5000);
        assert_eq!(config.upstream.base_url, "http://mirror.test");
        assert_eq!(config.upstream.timeout, Duration::from_secs(5));
        assert_eq!(config.upstream.concurrency, 2);
        assert!(!config.telemetry.json_logs);
    }

    #[test]
    fn test_fontpack_port_wins_over_port() {
        let config = FontpackConfig::default().with_overrides_from(|key| match key {
            "PORT" => Some("5000".to_string()),
            "FONTPACK_PORT" => Some("6000".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen_port, 6000);
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let config = FontpackConfig::default().with_overrides_from(|key| match key {
            "FONTPACK_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.server.listen_port, 3000);
    }

    #[test]
    fn test_toml_config() {
        let toml = r#"
[server]
listen_port = 8080
shutdown_timeout = "5s"
request_timeout = "2m"

[upstream]
base_url = "http://localhost:9000"
timeout = "1500ms"
concurrency = 4

[telemetry]
log_level = "debug"
"#;
        let config: FontpackConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_port, 8080);
        assert_eq!(config.server.listen_addr, "0.0.0.0");
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.server.request_timeout, Duration::from_secs(120));
        assert_eq!(config.upstream.timeout, Duration::from_millis(1500));
        assert_eq!(config.upstream.concurrency, 4);
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"upstream": {"concurrency": 16, "timeout": "10s"}}"#;
        let config: FontpackConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.upstream.concurrency, 16);
        assert_eq!(config.upstream.timeout, Duration::from_secs(10));
        assert_eq!(config.server.listen_port, 3000);
    }

    #[test]
    fn test_from_file_rejects_unknown_extension() {
        let err = FontpackConfig::from_file("fontpack.yaml").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_parse_duration() {
        use super::humantime_serde::parse_duration;
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 45s ").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_parse_duration_overflow_is_an_error() {
        use super::humantime_serde::parse_duration;
        let minutes = format!("{}m", u64::MAX / 2);
        let hours = format!("{}h", u64::MAX);
        assert!(parse_duration(&minutes).is_err());
        assert!(parse_duration(&hours).is_err());

        let toml = format!("[upstream]\ntimeout = \"{hours}\"\n");
        assert!(toml::from_str::<FontpackConfig>(&toml).is_err());
    }

    #[test]
    fn test_concurrency_upper_bound() {
        assert!(FontpackConfig::builder()
            .concurrency(MAX_CONCURRENCY)
            .build()
            .is_ok());
        let err = FontpackConfig::builder()
            .concurrency(MAX_CONCURRENCY + 1)
            .build()
            .unwrap_err();
        assert!(err.is_config());

        let mut config = FontpackConfig::default();
        config.upstream.concurrency = usize::MAX / 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_telemetry_config() {
        let mut config = FontpackConfig::default();
        config.telemetry.json_logs = false;
        config.telemetry.log_level = "warn".to_string();
        config.telemetry.metrics_enabled = false;

        let telemetry = config.telemetry_config();
        assert!(!telemetry.logging.json_format);
        assert_eq!(telemetry.logging.level, "warn");
        assert!(!telemetry.metrics.enabled);
    }
}
