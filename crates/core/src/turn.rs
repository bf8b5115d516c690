//! A single model call: sending the request, streaming the response, and
//! collecting requested tool calls.

use std::collections::BTreeMap;
use std::mem;

use colloquy_model::{
    ErrorKind, FinishReason, Message, ModelRequest, Part, ResponseChunk, Role,
    ToolCallRequest, Usage,
};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::RetryOptions;
use crate::event::{AgentEvent, ToolCallResponse};
use crate::model_client::{ModelClient, ModelStream};
use crate::retry::with_retry;
use crate::{Error, tool};

/// What a turn needs from its session.
pub(crate) struct TurnContext<'a> {
    pub client: &'a ModelClient,
    pub retry: &'a RetryOptions,
    pub cancel: &'a CancellationToken,
}

/// The completely received response of a turn.
#[derive(Debug)]
pub(crate) struct TurnResponse {
    /// Text first, then tool calls in the order they completed.
    pub message: Message,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: FinishReason,
    pub usage: Option<Usage>,
}

/// Runs one turn with `request`.
///
/// `model` is the active model and may be changed by the fallback hook.
/// Text is forwarded as it arrives, tool calls once their arguments are
/// complete.
pub(crate) async fn run_turn<H>(
    cx: &TurnContext<'_>,
    model: &mut String,
    request: ModelRequest,
    on_persistent_rate_limit: H,
    on_event: &mut (dyn FnMut(AgentEvent) + Send),
) -> Result<TurnResponse, Error>
where
    H: FnMut(&mut String, &Error) -> bool,
{
    trace!("turn state: sending");
    let open = with_retry(
        cx.retry,
        model,
        |model| {
            let mut req = request.clone();
            req.model.clone_from(model);
            cx.client.start_stream(&req)
        },
        on_persistent_rate_limit,
    );
    let (first, stream) = tokio::select! {
        biased;
        _ = cx.cancel.cancelled() => return Err(Error::Cancelled),
        result = open => result?,
    };

    trace!("turn state: streaming");
    let mut collector = ResponseCollector::default();
    let streamed = stream_response(cx, first, stream, &mut collector, on_event)
        .await
        .and_then(|()| collector.finish());
    let response = match streamed {
        Ok(response) => response,
        Err(err) => {
            abandon_calls(&collector.calls, &err, on_event);
            return Err(err);
        }
    };
    trace!(
        finish_reason = ?response.finish_reason,
        tool_calls = response.tool_calls.len(),
        "turn state: {}",
        if response.tool_calls.is_empty() {
            "done"
        } else {
            "awaiting tool results"
        }
    );
    Ok(response)
}

async fn stream_response(
    cx: &TurnContext<'_>,
    first: ResponseChunk,
    mut stream: ModelStream,
    collector: &mut ResponseCollector,
    on_event: &mut (dyn FnMut(AgentEvent) + Send),
) -> Result<(), Error> {
    let mut next = Some(first);
    loop {
        let chunk = match next.take() {
            Some(chunk) => chunk,
            None => {
                let chunk = tokio::select! {
                    biased;
                    _ = cx.cancel.cancelled() => return Err(Error::Cancelled),
                    result = stream.next_chunk() => result?,
                };
                match chunk {
                    Some(chunk) => chunk,
                    None => return Ok(()),
                }
            }
        };
        if let Some(event) = collector.push(chunk)? {
            on_event(event);
        }
    }
}

/// Answers the calls already announced to the caller of a turn that
/// failed, so every request gets a response.
fn abandon_calls(
    calls: &[ToolCallRequest],
    err: &Error,
    on_event: &mut (dyn FnMut(AgentEvent) + Send),
) {
    let reason = match err {
        Error::Cancelled => tool::Error::cancelled(),
        err => tool::Error::cancelled().with_reason(format!("response failed: {err}")),
    };
    for call in calls {
        on_event(AgentEvent::ToolCallResponse(ToolCallResponse::failed(call, &reason)));
    }
}

struct PendingCall {
    id: Option<String>,
    name: String,
    args: String,
}

/// Assembles normalized chunks into a message.
#[derive(Default)]
struct ResponseCollector {
    text: String,
    pending: BTreeMap<usize, PendingCall>,
    calls: Vec<ToolCallRequest>,
    finish: Option<(FinishReason, Option<Usage>)>,
}

impl ResponseCollector {
    /// Consumes a chunk, returning the event to report, if any.
    fn push(&mut self, chunk: ResponseChunk) -> Result<Option<AgentEvent>, Error> {
        if self.finish.is_some() {
            return Err(malformed("chunk after the end of the response"));
        }
        match chunk {
            ResponseChunk::TextDelta(text) => {
                if text.is_empty() {
                    return Ok(None);
                }
                self.text.push_str(&text);
                Ok(Some(AgentEvent::Content(text)))
            }
            ResponseChunk::ToolCallStart { index, id, name } => {
                let call = PendingCall {
                    id,
                    name,
                    args: String::new(),
                };
                if self.pending.insert(index, call).is_some() {
                    return Err(malformed(format!("tool call {index} started twice")));
                }
                Ok(None)
            }
            ResponseChunk::ToolCallArgsDelta { index, delta } => {
                let Some(call) = self.pending.get_mut(&index) else {
                    return Err(malformed(format!("arguments for unknown tool call {index}")));
                };
                call.args.push_str(&delta);
                Ok(None)
            }
            ResponseChunk::ToolCallComplete { index } => {
                let Some(call) = self.pending.remove(&index) else {
                    return Err(malformed(format!("completion of unknown tool call {index}")));
                };
                let call = ToolCallRequest {
                    id: call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(ToolCallRequest::generate_id),
                    args: parse_args(&call.name, &call.args)?,
                    name: call.name,
                };
                self.calls.push(call.clone());
                Ok(Some(AgentEvent::ToolCallRequest(call)))
            }
            ResponseChunk::Done {
                finish_reason,
                usage,
            } => {
                self.finish = Some((finish_reason, usage));
                Ok(None)
            }
        }
    }

    fn finish(&mut self) -> Result<TurnResponse, Error> {
        let Some((finish_reason, usage)) = self.finish else {
            return Err(Error::model(
                ErrorKind::Transport,
                "stream ended before the response completed",
            ));
        };
        if !self.pending.is_empty() {
            return Err(malformed("response ended with incomplete tool calls"));
        }

        let text = mem::take(&mut self.text);
        let calls = mem::take(&mut self.calls);
        let mut parts = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            parts.push(Part::Text(text));
        }
        parts.extend(calls.iter().cloned().map(Part::ToolCall));
        Ok(TurnResponse {
            message: Message {
                role: Role::Model,
                parts,
            },
            tool_calls: calls,
            finish_reason,
            usage,
        })
    }
}

#[inline]
fn malformed<S: Into<String>>(message: S) -> Error {
    Error::model(ErrorKind::MalformedResponse, message)
}

fn parse_args(name: &str, args: &str) -> Result<Map<String, Value>, Error> {
    if args.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(args) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(malformed(format!(
            "arguments of `{name}` are not an object: {other}"
        ))),
        Err(err) => Err(malformed(format!("invalid arguments of `{name}`: {err}"))),
    }
}
