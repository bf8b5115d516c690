use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};

use crate::ToolCallRequest;
use crate::provider::ModelProviderError;

/// A streamed response from the model provider.
///
/// A response is one-shot: once it has completed (or failed) it will not
/// produce any more chunks. Dropping a response stops consuming it, but
/// does not guarantee the backend stops generating.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next chunk from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next chunk. Implementations will ensure that the current
    ///   task will be notified when the next chunk may be ready.
    /// - `Poll::Ready(Ok(Some(chunk)))` means the response has a chunk
    ///   to deliver, and may produce further chunks on subsequent
    ///   `poll_next_chunk` calls.
    /// - `Poll::Ready(Ok(None))` means the response has completed.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   processing the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Self::Error>>;
}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// The model has finished generating text.
    Stop,
    /// The model needs to call tools.
    ToolCalls,
    /// Length limits, safety filters, and anything else.
    Other,
}

/// Token usage reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the model.
    pub output_tokens: u64,
}

impl Usage {
    /// Adds `other` into `self`.
    #[inline]
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// A normalized piece of a streamed response.
///
/// Tool calls are delivered in three steps: a `ToolCallStart`, any number of
/// `ToolCallArgsDelta` carrying fragments of the JSON-encoded arguments, and
/// a `ToolCallComplete`. Chunks of one tool call share the same `index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseChunk {
    /// Received a text delta.
    TextDelta(String),
    /// The model started a tool call.
    ToolCallStart {
        /// Position of the call within the response.
        index: usize,
        /// Backend-provided id, if any.
        id: Option<String>,
        /// Name of the tool.
        name: String,
    },
    /// A fragment of the JSON-encoded arguments.
    ToolCallArgsDelta {
        /// Position of the call within the response.
        index: usize,
        /// The argument text to append.
        delta: String,
    },
    /// All arguments of the tool call have been delivered.
    ToolCallComplete {
        /// Position of the call within the response.
        index: usize,
    },
    /// The response has been completed.
    Done {
        /// Why the model stopped.
        finish_reason: FinishReason,
        /// Usage of this response, if reported.
        usage: Option<Usage>,
    },
}

/// A completely received, non-streaming response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerateResponse {
    /// Concatenated text of the response.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Usage of this response, if reported.
    pub usage: Option<Usage>,
    /// Why the model stopped.
    pub finish_reason: FinishReason,
}
