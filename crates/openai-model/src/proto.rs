use colloquy_model::{
    ModelRequest, Role, ToolCallRequest, ToolDeclaration, ToolOutput,
    ToolResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionToolCall {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub id: Option<String>,
    pub r#type: Option<String>,
    pub function: Option<FunctionToolCall>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<CompletionUsage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Choice {
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub reasoning_content: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletion {
    pub choices: Vec<CompletionChoice>,
    pub usage: Option<CompletionUsage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<Embedding>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Embedding {
    pub index: usize,
    pub embedding: Vec<f32>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    stream: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EmbeddingRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

// -----------
// Conversions
// -----------

/// Tracks tool calls that have been sent in an assistant message but not
/// yet answered by a `tool` message.
#[derive(Default)]
struct ToolCallIds {
    pending: Vec<PendingCall>,
}

struct PendingCall {
    id: String,
    name: String,
    answered: bool,
}

impl ToolCallIds {
    /// Returns the wire id of a call. Calls without an id get one derived
    /// from their position, which is stable across requests.
    fn assign(
        &mut self,
        call: &ToolCallRequest,
        msg_idx: usize,
        call_idx: usize,
    ) -> String {
        let id = if call.id.is_empty() {
            format!("call_{msg_idx}_{call_idx}")
        } else {
            call.id.clone()
        };
        self.pending.push(PendingCall {
            id: id.clone(),
            name: call.name.clone(),
            answered: false,
        });
        id
    }

    fn resolve(&mut self, result: &ToolResult) -> Option<String> {
        let pending = self.pending.iter_mut().find(|p| {
            !p.answered
                && if result.tool_call_id.is_empty() {
                    p.name == result.name
                } else {
                    p.id == result.tool_call_id
                }
        })?;
        pending.answered = true;
        Some(pending.id.clone())
    }

    /// Closes the current tool call group, answering calls that never got
    /// a result so the backend does not reject the history.
    fn flush(&mut self, messages: &mut Vec<Message>) {
        for pending in self.pending.drain(..) {
            if pending.answered {
                continue;
            }
            warn!("tool call {} has no result, patching it", pending.id);
            messages.push(Message::Tool {
                tool_call_id: pending.id,
                content: "Error: the tool call was not executed.".to_owned(),
            });
        }
    }
}

#[inline]
pub fn create_request(
    req: &ModelRequest,
    stream: bool,
) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: req.model.clone(),
        messages: create_messages(req),
        tools: req.tools.iter().map(create_tool).collect(),
        temperature: req.config.temperature,
        max_tokens: req.config.max_output_tokens,
        stream_options: stream.then_some(StreamOptions {
            include_usage: true,
        }),
        stream,
    }
}

/// Rebuilds the complete message list from the transcript.
///
/// The output alternates roles: consecutive messages of the same role are
/// merged, tool results become `tool` messages right after the assistant
/// message requesting them, and empty messages are dropped.
fn create_messages(req: &ModelRequest) -> Vec<Message> {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system) = &req.config.system_instruction {
        if !system.is_empty() {
            messages.push(Message::System {
                content: system.clone(),
            });
        }
    }

    let mut ids = ToolCallIds::default();
    for (msg_idx, msg) in req.messages.iter().enumerate() {
        match msg.role {
            Role::Model => {
                let content = msg.text();
                let tool_calls: Vec<_> = msg
                    .tool_calls()
                    .enumerate()
                    .map(|(call_idx, call)| {
                        let id = ids.assign(call, msg_idx, call_idx);
                        create_tool_call(id, call)
                    })
                    .collect();
                push_assistant(&mut messages, &mut ids, content, tool_calls);
            }
            Role::User => {
                let mut orphans = Vec::new();
                for result in msg.tool_results() {
                    match ids.resolve(result) {
                        Some(tool_call_id) => messages.push(Message::Tool {
                            tool_call_id,
                            content: render_output(&result.output),
                        }),
                        None => orphans.push(format!(
                            "Result of tool `{}`: {}",
                            result.name,
                            render_output(&result.output)
                        )),
                    }
                }
                let mut content = msg.text();
                for orphan in orphans {
                    if !content.is_empty() {
                        content.push_str("\n\n");
                    }
                    content.push_str(&orphan);
                }
                push_user(&mut messages, &mut ids, content);
            }
        }
    }
    messages
}

fn push_user(messages: &mut Vec<Message>, ids: &mut ToolCallIds, content: String) {
    if content.is_empty() {
        return;
    }
    ids.flush(messages);
    if let Some(Message::User { content: prev }) = messages.last_mut() {
        prev.push_str("\n\n");
        prev.push_str(&content);
        return;
    }
    messages.push(Message::User { content });
}

fn push_assistant(
    messages: &mut Vec<Message>,
    ids: &mut ToolCallIds,
    content: String,
    tool_calls: Vec<ToolCall>,
) {
    if content.is_empty() && tool_calls.is_empty() {
        return;
    }
    // The calls of this message were registered already, flush only the
    // ones left over from earlier messages.
    let new_calls = tool_calls.len();
    let carried = ids.pending.len() - new_calls;
    if carried > 0 {
        let fresh = ids.pending.split_off(carried);
        ids.flush(messages);
        ids.pending = fresh;
    }

    if let Some(Message::Assistant {
        content: prev_content,
        tool_calls: prev_calls,
    }) = messages.last_mut()
    {
        if !content.is_empty() {
            let prev_content = prev_content.get_or_insert_default();
            prev_content.push_str(&content);
        }
        if !tool_calls.is_empty() {
            prev_calls.get_or_insert_default().extend(tool_calls);
        }
        return;
    }

    messages.push(Message::Assistant {
        content: (!content.is_empty()).then_some(content),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
    });
}

#[inline]
fn create_tool_call(id: String, call: &ToolCallRequest) -> ToolCall {
    ToolCall {
        index: None,
        id: Some(id),
        r#type: Some("function".to_owned()),
        function: Some(FunctionToolCall {
            name: Some(call.name.clone()),
            arguments: Some(
                serde_json::to_string(&call.args)
                    .unwrap_or_else(|_| "{}".to_owned()),
            ),
        }),
    }
}

#[inline]
fn render_output(output: &ToolOutput) -> String {
    match output {
        ToolOutput::Success(content) => content.clone(),
        ToolOutput::Error(message) => format!("Error: {message}"),
    }
}

#[inline]
fn create_tool(tool: &ToolDeclaration) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}
