//! Error types for the Notion sink.

use thiserror::Error;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Errors that can occur while mapping, resolving or writing a record.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The API asked us to back off (429) or failed on its side (5xx).
    #[error("retriable API error: {message}")]
    Retriable {
        /// HTTP status code.
        status: u16,
        /// Error message, prefixed with the status code.
        message: String,
    },

    /// The token was rejected (401/403).
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The request body was rejected (400/422) or could not be built.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Any other 4xx response.
    #[error("fatal API error: {0}")]
    Fatal(String),

    /// The container schema declares a property type the mapper cannot encode.
    #[error("unsupported property type '{kind}' for property '{property}'")]
    UnsupportedPropertyType {
        /// Property name.
        property: String,
        /// Type tag as reported by the API.
        kind: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SinkError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the whole operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Retriable { .. } => true,
            SinkError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true if no further record can succeed in this session.
    pub fn halts_session(&self) -> bool {
        matches!(
            self,
            SinkError::InvalidCredentials(_) | SinkError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SinkError::Retriable {
            status: 429,
            message: "429: rate_limited".into()
        }
        .is_retryable());
        assert!(SinkError::transport_retryable("connection reset").is_retryable());
        assert!(!SinkError::transport_fatal("invalid certificate").is_retryable());
        assert!(!SinkError::InvalidPayload("bad".into()).is_retryable());
        assert!(!SinkError::Fatal("404: not found".into()).is_retryable());
    }

    #[test]
    fn session_halting_errors() {
        assert!(SinkError::InvalidCredentials("401: unauthorized".into()).halts_session());
        assert!(SinkError::Config("token is required".into()).halts_session());
        assert!(!SinkError::InvalidPayload("400: bad".into()).halts_session());
        assert!(!SinkError::UnsupportedPropertyType {
            property: "Tags".into(),
            kind: "multi_select".into()
        }
        .halts_session());
    }

    #[test]
    fn error_display() {
        let err = SinkError::UnsupportedPropertyType {
            property: "Tags".into(),
            kind: "multi_select".into(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported property type 'multi_select' for property 'Tags'"
        );

        let err = SinkError::InvalidCredentials("401: API token is invalid.".into());
        assert!(err.to_string().contains("401"));
    }
}
