//! Error types for the sagebot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`TurnError`] is the
//! terminal error of a single user turn.

use thiserror::Error;

/// The top-level error type for sagebot operations outside a turn.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Action error: {0}")]
    Action(#[from] ActionError),

    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of a single call against the model API.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Upstream unavailable: {message} (status: 503)")]
    Unavailable { message: String },

    #[error("Rate limited by provider{}: {message}", retry_hint(.retry_after_secs))]
    RateLimited {
        retry_after_secs: Option<u64>,
        message: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

fn retry_hint(secs: &Option<u64>) -> String {
    match secs {
        Some(s) => format!(", retry after {s}s"),
        None => String::new(),
    }
}

impl ProviderError {
    /// The HTTP status this failure corresponds to, if it came from an HTTP response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Unavailable { .. } => Some(503),
            Self::RateLimited { .. } => Some(429),
            Self::ApiError { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Only "service unavailable" is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Failures at the action boundary.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Invalid arguments for {action}: {reason}")]
    InvalidArguments { action: String, reason: String },

    #[error("Action {action} failed: {reason}")]
    HandlerFailure { action: String, reason: String },
}

impl ActionError {
    pub fn failure(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailure {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum KnowledgeError {
    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Category of a turn-terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UnknownAction,
    InvalidArguments,
    UpstreamUnavailable,
    UpstreamRateLimited,
    Upstream,
    StreamInterrupted,
    DeadlineExceeded,
}

/// The error that ends a user turn.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error(transparent)]
    Action(ActionError),

    #[error("Upstream unavailable after {attempts} attempt(s): {source}")]
    UpstreamExhausted {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Upstream(ProviderError),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Turn exceeded its deadline of {0}s")]
    DeadlineExceeded(u64),
}

impl TurnError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Action(ActionError::UnknownAction(_)) => ErrorCategory::UnknownAction,
            Self::Action(_) => ErrorCategory::InvalidArguments,
            Self::UpstreamExhausted { .. } => ErrorCategory::UpstreamUnavailable,
            Self::Upstream(ProviderError::RateLimited { .. }) => {
                ErrorCategory::UpstreamRateLimited
            }
            Self::Upstream(ProviderError::Unavailable { .. }) => {
                ErrorCategory::UpstreamUnavailable
            }
            Self::Upstream(ProviderError::StreamInterrupted(_)) | Self::StreamInterrupted(_) => {
                ErrorCategory::StreamInterrupted
            }
            Self::Upstream(_) => ErrorCategory::Upstream,
            Self::DeadlineExceeded(_) => ErrorCategory::DeadlineExceeded,
        }
    }

    /// The single text fragment written to the caller when a turn fails.
    pub fn terminal_fragment(&self) -> String {
        match self {
            Self::Upstream(ProviderError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            }) => format!("\n❌ Error: the assistant is busy, please retry in {secs}s.\n"),
            Self::Upstream(ProviderError::RateLimited { .. }) => {
                "\n❌ Error: the assistant is busy, please retry shortly.\n".into()
            }
            Self::DeadlineExceeded(_) => {
                "\n❌ Error: the response took too long or the connection was lost.\n".into()
            }
            _ => "\n❌ Error: the answer could not be completed.\n".into(),
        }
    }
}

impl From<ActionError> for TurnError {
    fn from(e: ActionError) -> Self {
        Self::Action(e)
    }
}

impl From<ProviderError> for TurnError {
    fn from(e: ProviderError) -> Self {
        Self::Upstream(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 400,
            message: "function response turn must follow a function call turn".into(),
        });
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("function call"));
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(ProviderError::Unavailable { message: "overloaded".into() }.is_retryable());
        assert!(
            !ProviderError::RateLimited {
                retry_after_secs: Some(22),
                message: "quota".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::Network("reset".into()).is_retryable());
        assert!(
            !ProviderError::ApiError {
                status_code: 500,
                message: "boom".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn rate_limit_mentions_retry_delay() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(22),
            message: "quota exceeded".into(),
        };
        assert!(err.to_string().contains("retry after 22s"));
        assert_eq!(err.status_code(), Some(429));

        let turn = TurnError::from(err);
        assert_eq!(turn.category(), ErrorCategory::UpstreamRateLimited);
        assert!(turn.terminal_fragment().contains("22s"));
    }

    #[test]
    fn turn_error_categories() {
        assert_eq!(
            TurnError::from(ActionError::UnknownAction("launchRocket".into())).category(),
            ErrorCategory::UnknownAction
        );
        assert_eq!(
            TurnError::from(ActionError::invalid("scrapePage", "missing url")).category(),
            ErrorCategory::InvalidArguments
        );
        assert_eq!(
            TurnError::UpstreamExhausted {
                attempts: 5,
                source: ProviderError::Unavailable { message: "x".into() }
            }
            .category(),
            ErrorCategory::UpstreamUnavailable
        );
        assert_eq!(
            TurnError::DeadlineExceeded(15).category(),
            ErrorCategory::DeadlineExceeded
        );
    }
}
