//! The conversation history sent to the backend on every call.

use std::collections::HashSet;

use colloquy_model::{Message, Part, Role, estimate_token_count};

use crate::Error;

/// An ordered conversation history.
///
/// Every [`ToolResult`](colloquy_model::ToolResult) in a transcript answers
/// a tool call of an earlier model message. Messages that would break this
/// are rejected.
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    // Ids of all tool calls requested so far.
    call_ids: HashSet<String>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    pub fn push(&mut self, msg: Message) -> Result<(), Error> {
        check_message(&msg, &self.call_ids)?;
        self.call_ids
            .extend(msg.tool_calls().map(|call| call.id.clone()));
        self.messages.push(msg);
        Ok(())
    }

    /// Replaces the whole history. The transcript is left unchanged if
    /// `messages` are not consistent.
    pub fn replace(&mut self, messages: Vec<Message>) -> Result<(), Error> {
        let mut call_ids = HashSet::new();
        for msg in &messages {
            check_message(msg, &call_ids)?;
            call_ids.extend(msg.tool_calls().map(|call| call.id.clone()));
        }
        self.messages = messages;
        self.call_ids = call_ids;
        Ok(())
    }

    /// Removes all messages.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
        self.call_ids.clear();
    }

    /// Returns the messages in order.
    #[inline]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Returns the number of messages.
    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if there are no messages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the most recent model-authored message.
    #[inline]
    pub fn last_model_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|msg| msg.role == Role::Model)
    }

    /// Estimates the token count with the character heuristic.
    #[inline]
    pub fn estimated_tokens(&self) -> u64 {
        estimate_token_count(&self.messages)
    }
}

fn check_message(msg: &Message, call_ids: &HashSet<String>) -> Result<(), Error> {
    for part in &msg.parts {
        match (msg.role, part) {
            (Role::User, Part::ToolCall(call)) => {
                return Err(Error::InvalidTranscript(format!(
                    "tool call `{}` in a user message",
                    call.id
                )));
            }
            (Role::Model, Part::ToolResult(result)) => {
                return Err(Error::InvalidTranscript(format!(
                    "tool result `{}` in a model message",
                    result.tool_call_id
                )));
            }
            (Role::User, Part::ToolResult(result))
                if !call_ids.contains(&result.tool_call_id) =>
            {
                return Err(Error::InvalidTranscript(format!(
                    "tool result `{}` answers no tool call",
                    result.tool_call_id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
