use colloquy_model::{ErrorKind, FinishReason, ToolCallRequest, Usage};
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "text_delta")]
    TextDelta(String),
    /// Streamed as a start, one argument delta and a completion. An empty
    /// id is streamed as a call without a backend id.
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

/// The preset response for one streamed request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    #[serde(default)]
    pub failures: Option<u64>,
    /// The kind of the simulated failures.
    #[serde(default = "default_failure_kind")]
    pub failure_kind: ErrorKind,
    /// Overrides the finish reason derived from the events.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    /// Usage reported with the final chunk.
    #[serde(default)]
    pub usage: Option<Usage>,
    /// If set, the stream fails with this kind after the events instead
    /// of finishing.
    #[serde(default)]
    pub interruption: Option<ErrorKind>,
}

#[inline]
fn default_failure_kind() -> ErrorKind {
    ErrorKind::RateLimitExceeded
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: default_failure_kind(),
            finish_reason: None,
            usage: None,
            interruption: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` as a single delta.
    #[inline]
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::with_events([PresetEvent::TextDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the kind of the simulated failures.
    #[inline]
    pub fn with_failure_kind(mut self, kind: ErrorKind) -> Self {
        self.failure_kind = kind;
        self
    }

    /// Overrides the finish reason.
    #[inline]
    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = Some(finish_reason);
        self
    }

    /// Sets the reported usage.
    #[inline]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Makes the stream fail after its events.
    #[inline]
    pub fn interrupted_by(mut self, kind: ErrorKind) -> Self {
        self.interruption = Some(kind);
        self
    }
}
