//! Error types for dlp-sentinel

use thiserror::Error;

/// Errors that can occur while classifying, tagging, or responding
#[derive(Debug, Error)]
pub enum SentinelError {
    /// A call to a cloud API failed
    #[error("{service} {operation} failed: {reason}")]
    ExternalService {
        service: String,
        operation: String,
        reason: String,
    },

    /// No configured text encoding could decode the object
    #[error("No text encoding could decode object '{key}'")]
    ContentDecode { key: String },

    /// Classification job did not reach a terminal state in time
    #[error("Classification job '{job_id}' did not finish within {waited_secs}s")]
    JobTimeout { job_id: String, waited_secs: u64 },

    /// Findings were requested for a job that did not complete
    #[error("Classification job '{job_id}' ended as {status}; findings are not final")]
    JobIncomplete { job_id: String, status: String },

    /// Tag write failed or was rejected
    #[error("Failed to tag object '{key}': {reason}")]
    Tagging { key: String, reason: String },

    /// Access event is missing required fields
    #[error("Malformed access event, missing: {}", missing.join(", "))]
    MalformedEvent { missing: Vec<String> },

    /// A pattern rule could not be compiled
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse failure
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl SentinelError {
    /// Shorthand for an `ExternalService` error
    pub fn external(
        service: impl Into<String>,
        operation: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::ExternalService {
            service: service.into(),
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_display() {
        let err = SentinelError::external("s3", "GetObjectTagging", "AccessDenied");
        assert_eq!(err.to_string(), "s3 GetObjectTagging failed: AccessDenied");
    }

    #[test]
    fn test_malformed_event_lists_fields() {
        let err = SentinelError::MalformedEvent {
            missing: vec!["userIdentity.arn".to_string(), "eventName".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Malformed access event, missing: userIdentity.arn, eventName"
        );
    }
}
