//! Error types for the synchronization engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while discovering or refreshing squadrons.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error that isn't a relay connection failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload or reference data error from the core crate.
    #[error(transparent)]
    Core(#[from] squadwatch_core::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bearer token could not be obtained.
    #[error("Token error: {0}")]
    Token(String),

    /// Every relay tried for one request failed to connect.
    #[error("Transport error: {attempts} relay attempts failed, last: {last_error}")]
    Transport { attempts: usize, last_error: String },

    /// Upstream answered 418: global maintenance.
    #[error("Upstream is down for maintenance")]
    UpstreamMaintenance,

    /// Upstream answered with a status code we have no handling for.
    #[error("Unknown upstream status {code}: {body}")]
    UnknownStatus { code: u16, body: String },

    /// A registered observer failed.
    #[error("Hook '{observer}' failed: {reason}")]
    Hook { observer: String, reason: String },
}

impl Error {
    /// Whether the failure is upstream-wide and the current pass should stop,
    /// to be retried later, rather than the process.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamMaintenance | Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_display() {
        let err = Error::UnknownStatus {
            code: 503,
            body: "<html>bad gateway</html>".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("bad gateway"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::UpstreamMaintenance.is_retryable());
        assert!(
            Error::Transport {
                attempts: 2,
                last_error: "connection refused".to_string()
            }
            .is_retryable()
        );
        assert!(
            !Error::UnknownStatus {
                code: 500,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!Error::Config("missing token".to_string()).is_retryable());
    }

    #[test]
    fn test_from_core_error() {
        let err: Error = squadwatch_core::Error::UnknownTag(7).into();
        assert!(matches!(err, Error::Core(_)));
        assert_eq!(err.to_string(), "unknown squadron tag 7");
    }
}
