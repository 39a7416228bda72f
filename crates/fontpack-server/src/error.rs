//! Error types for the fontpack server.
//!
//! These cover process-level failures only: configuration, binding and
//! telemetry setup. Per-request failures are [`fontpack_core::FontpackError`]
//! values and never escape the handler.

use fontpack_telemetry::TelemetryError;
use thiserror::Error;

/// Server startup and runtime errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Failed to bind the listening socket.
    #[error("Bind error: could not listen on {addr}: {reason}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// Failed to build the outbound HTTP client.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Telemetry initialization failed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a bind error.
    pub fn bind(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::Bind {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether the error was caused by invalid configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::config("upstream.concurrency must be at least 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: upstream.concurrency must be at least 1"
        );
        assert!(err.is_config());

        let err = ServerError::bind("0.0.0.0:3000", "address in use");
        assert_eq!(
            err.to_string(),
            "Bind error: could not listen on 0.0.0.0:3000: address in use"
        );
        assert!(!err.is_config());
    }

    #[test]
    fn test_from_telemetry_error() {
        let err: ServerError = TelemetryError::LoggingInit("already set".to_string()).into();
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: ServerError = io.into();
        assert!(matches!(err, ServerError::Io(_)));
    }
}
