use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// The author of a [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation, including tool results.
    User,
    /// The language model.
    Model,
}

/// One turn's contribution to the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored this message.
    pub role: Role,
    /// Ordered content of the message.
    pub parts: Vec<Part>,
}

impl Message {
    /// Creates a user message with a single text part.
    #[inline]
    pub fn user_text<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Creates a model message with a single text part.
    #[inline]
    pub fn model_text<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Returns the concatenated text parts of this message.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Iterates over the tool calls requested in this message.
    #[inline]
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallRequest> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Iterates over the tool results carried by this message.
    #[inline]
    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.parts.iter().filter_map(|part| match part {
            Part::ToolResult(result) => Some(result),
            _ => None,
        })
    }

    /// Returns `true` if the message has no parts, or only empty texts.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|part| match part {
            Part::Text(text) => text.is_empty(),
            _ => false,
        })
    }
}

/// A piece of message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Part {
    /// Plain text.
    Text(String),
    /// A tool invocation requested by the model.
    ToolCall(ToolCallRequest),
    /// The outcome of a tool invocation.
    ToolResult(ToolResult),
}

/// Describes a tool call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// The arguments to pass to the tool.
    pub args: Map<String, Value>,
}

impl ToolCallRequest {
    /// Creates an id for a call the backend did not name. Ids are unique
    /// within the process and unlikely to collide across processes.
    pub fn generate_id() -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let suffix = Uuid::new_v4().simple().to_string();
        format!("call_{millis}_{}", &suffix[..12])
    }
}

/// The result of calling a tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The identifier of the [`ToolCallRequest`] this result answers.
    pub tool_call_id: String,
    /// The name of the tool that was called.
    ///
    /// Some backends correlate results by name rather than by id.
    pub name: String,
    /// The output of the tool call.
    pub output: ToolOutput,
}

/// Payload of a [`ToolResult`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutput {
    /// The tool succeeded with this content.
    Success(String),
    /// The tool failed with this message.
    Error(String),
}

impl ToolOutput {
    /// Returns the content or the error message.
    #[inline]
    pub fn as_str(&self) -> &str {
        match self {
            ToolOutput::Success(content) => content,
            ToolOutput::Error(message) => message,
        }
    }

    /// Returns `true` if the output carries an error.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutput::Error(_))
    }
}
