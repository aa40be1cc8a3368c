//! Top-level error types
//!
//! Protocol-specific errors live next to their modules ([`crate::dns::DnsError`],
//! [`crate::sni::ProxyError`]); this module holds the configuration error and
//! the startup classification used by the supervisor.

use std::io;

use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path that was attempted
        path: String,
    },

    /// JSON parsing or serialization failed
    #[error("Configuration parse error: {0}")]
    ParseError(String),

    /// Semantic validation failed
    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    /// Underlying I/O failure
    #[error("Configuration I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Startup errors raised by the supervisor
///
/// Fatal errors abort the process with a non-zero exit code; non-fatal ones
/// disable a single front-end and let the rest of the gateway run.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration could not be loaded
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    /// A mandatory listener could not be bound
    #[error("failed to bind {listener}: {source}")]
    Bind {
        /// Human-readable listener name (e.g. "DoH 127.0.0.1:8080")
        listener: String,
        /// The bind failure
        #[source]
        source: io::Error,
    },
}

impl StartupError {
    /// Create a bind error for a named listener
    pub fn bind(listener: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            listener: listener.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound {
            path: "/etc/gateway.json".into(),
        };
        assert!(err.to_string().contains("/etc/gateway.json"));

        let err = ConfigError::ValidationError("host cannot be empty".into());
        assert!(err.to_string().contains("host cannot be empty"));
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: ConfigError = io_err.into();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_startup_bind_error() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        let err = StartupError::bind("DoT :853", io_err);
        assert!(err.to_string().contains("DoT :853"));
    }
}
