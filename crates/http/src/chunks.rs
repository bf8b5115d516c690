use std::collections::VecDeque;

use bytes::Bytes;
use colloquy_model::ErrorKind;
use reqwest::Response;

use crate::error_kind_for_reqwest;

/// Failure while reading the body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    /// How the failure should be treated by callers.
    pub kind: ErrorKind,
    /// Description of the underlying failure.
    pub message: String,
}

/// An adapter for streaming byte chunks.
pub enum Chunks {
    /// Chunks read from a live HTTP response.
    Response(Response),
    /// Chunks replayed from memory, mostly for tests.
    VecDeque(VecDeque<Bytes>),
}

impl Chunks {
    pub fn from_response(response: Response) -> Self {
        Chunks::Response(response)
    }

    pub fn from_vec_deque(vec: VecDeque<Bytes>) -> Self {
        Chunks::VecDeque(vec)
    }

    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Chunks::Response(response) => {
                response.chunk().await.map_err(|err| Error {
                    kind: error_kind_for_reqwest(&err),
                    message: format!("{err}"),
                })
            }
            Chunks::VecDeque(vec) => {
                let chunk = vec.pop_front();
                Ok(chunk)
            }
        }
    }
}
