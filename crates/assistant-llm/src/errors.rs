use crate::model::{ConversationId, ProviderKind, TurnId};

/// Classified failure of one streaming call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum StreamFailure {
    /// The caller cancelled the stream.
    #[error("stream cancelled")]
    Cancelled,
    /// No data arrived within the stream timeout.
    #[error("stream timed out")]
    Timeout,
    /// Connection or stream I/O failed.
    #[error("network error: {0}")]
    Network(String),
    /// Provider asked us to slow down.
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },
    /// Credential was rejected by the provider.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// Request could not be built from the provider configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Provider returned a non-success status or reported an error in-stream.
    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },
}

impl StreamFailure {
    /// Failures that a fresh attempt may resolve.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Short machine-readable code used in logs and audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed => "auth",
            Self::InvalidConfiguration(_) => "invalid_configuration",
            Self::Provider { status, .. } if *status >= 500 => "provider_5xx",
            Self::Provider { .. } => "provider_4xx",
        }
    }
}

/// Errors returned by a conversation store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    #[error("turn not found: {0}")]
    TurnNotFound(TurnId),
    #[error("storage failure: {0}")]
    Backend(String),
}

/// Top-level error of the conversation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    /// Terminal failure of the provider stream after retries.
    #[error(transparent)]
    Stream(StreamFailure),
    /// The selected provider lacks a usable credential or endpoint.
    #[error("provider not configured: {0}")]
    NotConfigured(ProviderKind),
    /// Message content was empty or otherwise unusable.
    #[error("content rejected: {0}")]
    ContentRejected(String),
    /// Owning conversation record could not be loaded.
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    /// Conversation belongs to a different owner.
    #[error("access denied to conversation {0}")]
    AccessDenied(ConversationId),
    /// A response is already streaming for this conversation.
    #[error("a response is already streaming")]
    StreamInProgress,
    /// Persisting conversation state failed.
    #[error(transparent)]
    Store(StoreError),
}

impl AssistantError {
    /// Terse message safe to show to the user.
    ///
    /// Provider response bodies never appear here.
    pub fn user_message(&self) -> String {
        match self {
            Self::Stream(failure) => match failure {
                StreamFailure::Cancelled => "Response cancelled.".into(),
                StreamFailure::Timeout => {
                    "The assistant took too long to respond. Please try again.".into()
                }
                StreamFailure::Network(_) => {
                    "Network connection lost. Check your connection and try again.".into()
                }
                StreamFailure::RateLimited {
                    retry_after: Some(seconds),
                } => format!("Too many requests. Try again in {seconds} seconds."),
                StreamFailure::RateLimited { retry_after: None } => {
                    "Too many requests. Try again shortly.".into()
                }
                StreamFailure::AuthenticationFailed => {
                    "The API key was rejected. Update it in settings.".into()
                }
                StreamFailure::InvalidConfiguration(_) => {
                    "The assistant is not set up correctly. Check provider settings.".into()
                }
                StreamFailure::Provider { status, .. } if *status >= 500 => {
                    "The assistant service is unavailable right now. Please try again.".into()
                }
                StreamFailure::Provider { .. } => {
                    "The assistant could not process this request.".into()
                }
            },
            Self::NotConfigured(kind) => {
                format!("{} is not configured. Add it in settings.", kind.display_name())
            }
            Self::ContentRejected(_) => "Please enter a message.".into(),
            Self::ConversationNotFound(_) | Self::AccessDenied(_) => {
                "This conversation is unavailable.".into()
            }
            Self::StreamInProgress => "Please wait for the current response to finish.".into(),
            Self::Store(_) => "The conversation could not be saved.".into(),
        }
    }

    /// Returns the stream failure when this error came from a provider call.
    pub fn stream_failure(&self) -> Option<&StreamFailure> {
        match self {
            Self::Stream(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<StreamFailure> for AssistantError {
    fn from(value: StreamFailure) -> Self {
        Self::Stream(value)
    }
}

impl From<StoreError> for AssistantError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::ConversationNotFound(id) => Self::ConversationNotFound(id),
            other => Self::Store(other),
        }
    }
}
