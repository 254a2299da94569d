use std::fmt;

use thiserror::Error;

/// Errors raised while serving a generation or encoding request.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported backend family: {0}")]
    UnsupportedBackend(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("no tactic found in backend output: {0}")]
    Extraction(String),

    #[error("{backend} call failed ({failure}): {message}")]
    BackendCall {
        backend: String,
        failure: CallFailure,
        message: String,
    },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Classification of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailure {
    /// The call did not complete within the adapter's timeout.
    Timeout,
    /// The connection could not be established or was reset.
    Connect,
    /// The backend answered with a non-success HTTP status.
    Status(u16),
    /// The backend answered but the body could not be understood.
    Decode,
}

impl CallFailure {
    /// Whether repeating the identical request may succeed.
    ///
    /// Rate limiting, server errors and transport hiccups are transient.
    /// Authentication, validation and decode failures are not.
    pub fn is_retryable(self) -> bool {
        match self {
            CallFailure::Timeout | CallFailure::Connect => true,
            CallFailure::Status(code) => matches!(code, 408 | 409 | 429) || code >= 500,
            CallFailure::Decode => false,
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Timeout => write!(f, "timeout"),
            CallFailure::Connect => write!(f, "connection error"),
            CallFailure::Status(code) => write!(f, "status {code}"),
            CallFailure::Decode => write!(f, "undecodable response"),
        }
    }
}

impl AdapterError {
    pub fn backend_call(
        backend: impl Into<String>,
        failure: CallFailure,
        message: impl Into<String>,
    ) -> Self {
        AdapterError::BackendCall {
            backend: backend.into(),
            failure,
            message: message.into(),
        }
    }

    /// Short failure class for request logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::UnsupportedBackend(_) => "unsupported_backend",
            AdapterError::UnsupportedOperation(_) => "unsupported_operation",
            AdapterError::Extraction(_) => "extraction",
            AdapterError::BackendCall {
                failure: CallFailure::Timeout,
                ..
            } => "backend_timeout",
            AdapterError::BackendCall { .. } => "backend_call",
            AdapterError::UnknownModel(_) => "unknown_model",
            AdapterError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Whether a hosted adapter may retry the call that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::BackendCall { failure, .. } => failure.is_retryable(),
            _ => false,
        }
    }
}
