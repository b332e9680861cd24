//! Error handling for the mining client
//!
//! A single error type covers codec, protocol, connection and search failures.
//! Each variant carries enough context to be logged on its own, and
//! [`Error::is_transient`] tells the driver loop which ones it may shrug off.

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining client
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Target record could not be decoded
    #[error("Malformed target record: {message}")]
    MalformedRecord { message: String },

    /// Well-formed JSON that matches none of the known message shapes
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Outbound message exceeds the send ceiling
    #[error("Payload size {size} exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Every value of the nonce window has been searched
    #[error("Nonce space exhausted for {width}-byte window")]
    NonceSpaceExhausted { width: usize },

    /// Pool answered a submission with result=false or an error
    #[error("Submission {id} rejected: {reason}")]
    SubmissionRejected { id: u64, reason: String },

    /// Stratum protocol errors
    #[error("Stratum error: {message}")]
    Stratum { message: String },

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    Disconnected,

    /// Background listener ended
    #[error("Listener failed: {message}")]
    ListenerFailed { message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// External process errors
    #[error("External process error: {message}")]
    ExternalProcess { message: String },

    /// Search worker errors
    #[error("Worker error: {message}")]
    Worker { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a malformed record error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a stratum error
    pub fn stratum(message: impl Into<String>) -> Self {
        Self::Stratum {
            message: message.into(),
        }
    }

    /// Create a listener failure
    pub fn listener(message: impl Into<String>) -> Self {
        Self::ListenerFailed {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an external process error
    pub fn external_process(message: impl Into<String>) -> Self {
        Self::ExternalProcess {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
        }
    }

    /// Check if the error leaves the session usable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout { .. } | Error::Parse { .. } | Error::SubmissionRejected { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config { .. } => "config",
            Error::MalformedRecord { .. } => "record",
            Error::Parse { .. } => "parse",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::NonceSpaceExhausted { .. } => "nonce_space_exhausted",
            Error::SubmissionRejected { .. } => "submission_rejected",
            Error::Stratum { .. } => "stratum",
            Error::Disconnected => "disconnected",
            Error::ListenerFailed { .. } => "listener",
            Error::Timeout { .. } => "timeout",
            Error::ExternalProcess { .. } => "external_process",
            Error::Worker { .. } => "worker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::PayloadTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(err.to_string(), "Payload size 2048 exceeds limit of 1024 bytes");

        let err = Error::NonceSpaceExhausted { width: 4 };
        assert_eq!(err.to_string(), "Nonce space exhausted for 4-byte window");

        let err = Error::config("missing address");
        assert_eq!(err.to_string(), "Configuration error: missing address");
    }

    #[test]
    fn test_error_conversions() {
        let io_err = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::timeout("read").is_transient());
        assert!(Error::parse("unknown method").is_transient());
        assert!(Error::SubmissionRejected {
            id: 4,
            reason: "stale".into()
        }
        .is_transient());

        assert!(!Error::PayloadTooLarge { size: 2000, limit: 1024 }.is_transient());
        assert!(!Error::NonceSpaceExhausted { width: 2 }.is_transient());
        assert!(!Error::Disconnected.is_transient());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::malformed("truncated").category(), "record");
        assert_eq!(Error::Disconnected.category(), "disconnected");
        assert_eq!(Error::listener("panicked").category(), "listener");
    }
}
