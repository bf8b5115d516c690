use colloquy_model::ToolCallRequest;

use crate::{Error, tool};

/// Something that happened while a message was processed.
#[derive(Clone, Debug, PartialEq)]
pub enum AgentEvent {
    /// A piece of model text, in the order it was streamed.
    Content(String),
    /// The model requested a tool call.
    ToolCallRequest(ToolCallRequest),
    /// A requested tool call has finished.
    ToolCallResponse(ToolCallResponse),
    /// The transcript was replaced by a summary.
    ChatCompressed(CompressionRecord),
    /// The caller cancelled the message. Nothing follows this event.
    UserCancelled,
    /// The message failed. Nothing follows this event.
    Error(String),
    /// The session has no model turns left. Nothing follows this event.
    MaxSessionTurnsReached,
}

/// The outcome of a tool call, as presented to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallResponse {
    /// The id of the answered [`ToolCallRequest`].
    pub id: String,
    /// The name of the called tool.
    pub name: String,
    /// Human-readable result, or the error reason.
    pub result_display: String,
    /// Set if the call failed.
    pub error: Option<String>,
}

impl ToolCallResponse {
    pub(crate) fn failed(call: &ToolCallRequest, err: &tool::Error) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result_display: err.reason().into_owned(),
            error: Some(err.to_string()),
        }
    }
}

/// Token counts around a compression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CompressionRecord {
    /// Estimate of the transcript before compression.
    pub original_token_count: u64,
    /// Estimate of the compressed transcript.
    pub new_token_count: u64,
}

/// How processing a message ended.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model finished without requesting more tools.
    Completed,
    /// The caller cancelled.
    Cancelled,
    /// A model call failed.
    Failed(Error),
    /// The model kept requesting tools until the per-message limit.
    IterationLimitReached,
    /// The session has no model turns left.
    SessionLimitReached,
}

impl TurnOutcome {
    /// Returns `true` if the message was fully processed.
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }
}
