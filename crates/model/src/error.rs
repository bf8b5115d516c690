use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The credentials were rejected by the backend.
    Authentication,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The backend cannot perform the requested operation.
    UnsupportedOperation,
    /// The backend returned data that cannot be interpreted.
    MalformedResponse,
    /// Network-level failure (connection, timeout, broken stream, 5xx).
    Transport,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns `true` if a request failing with this kind may succeed when
    /// it's sent again later.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::RateLimitExceeded | ErrorKind::Transport)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Authentication => write!(f, "Authentication error"),
            ErrorKind::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ErrorKind::UnsupportedOperation => {
                write!(f, "Unsupported operation")
            }
            ErrorKind::MalformedResponse => write!(f, "Malformed response"),
            ErrorKind::Transport => write!(f, "Transport error"),
            ErrorKind::Other => write!(f, "Error"),
        }
    }
}
