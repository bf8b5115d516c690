use colloquy_model::{ErrorKind, ModelProviderError};
use thiserror::Error;

/// Errors produced by the conversation core.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A model provider call failed.
    #[error("{kind}: {message}")]
    Model {
        /// Classification of the provider failure.
        kind: ErrorKind,
        /// Message reported by the provider.
        message: String,
    },

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// A message would break the tool call pairing of the transcript.
    #[error("invalid transcript: {0}")]
    InvalidTranscript(String),
}

impl Error {
    /// Creates a model error.
    #[inline]
    pub fn model<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self::Model {
            kind,
            message: message.into(),
        }
    }

    /// Returns the provider error kind, if this is a model error.
    #[inline]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Model { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if the failed call may succeed when sent again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_retryable)
    }

    pub(crate) fn from_provider<E: ModelProviderError>(err: E) -> Self {
        Self::model(err.kind(), err.to_string())
    }
}
