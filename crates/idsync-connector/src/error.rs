//! Connector error types
//!
//! Error definitions with transient/permanent classification.

use thiserror::Error;

/// Error that can occur while reading from a connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    // Connection errors (usually transient)
    /// Failed to establish connection to the external system.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connection timed out.
    #[error("connection timeout after {timeout_secs} seconds")]
    ConnectionTimeout { timeout_secs: u64 },

    /// External system is temporarily unavailable.
    #[error("target system unavailable: {message}")]
    TargetUnavailable { message: String },

    // Permanent errors
    /// Invalid credentials provided.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Object class not known by the external system.
    #[error("object class '{object_class}' not found in schema")]
    ObjectClassNotFound { object_class: String },

    /// The sync token is no longer accepted by the source.
    #[error("invalid sync token: {message}")]
    InvalidSyncToken { message: String },

    /// A record returned by the source could not be interpreted.
    #[error("invalid data: {message}")]
    InvalidData { message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ConnectorError {
    /// Create a connection failed error without an underlying cause.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Check if this error is transient and the operation could succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectorError::ConnectionFailed { .. }
                | ConnectorError::ConnectionTimeout { .. }
                | ConnectorError::TargetUnavailable { .. }
        )
    }

    /// Get an error code for logging and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            ConnectorError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            ConnectorError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            ConnectorError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            ConnectorError::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ConnectorError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            ConnectorError::ObjectClassNotFound { .. } => "OBJECT_CLASS_NOT_FOUND",
            ConnectorError::InvalidSyncToken { .. } => "INVALID_SYNC_TOKEN",
            ConnectorError::InvalidData { .. } => "INVALID_DATA",
            ConnectorError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ConnectorError::connection_failed("refused").is_transient());
        assert!(ConnectorError::ConnectionTimeout { timeout_secs: 30 }.is_transient());
        assert!(!ConnectorError::AuthenticationFailed.is_transient());
        assert!(!ConnectorError::invalid_data("bad record").is_transient());
    }

    #[test]
    fn test_error_display_and_code() {
        let err = ConnectorError::ObjectClassNotFound {
            object_class: "posixGroup".to_string(),
        };
        assert!(err.to_string().contains("posixGroup"));
        assert_eq!(err.error_code(), "OBJECT_CLASS_NOT_FOUND");
    }
}
