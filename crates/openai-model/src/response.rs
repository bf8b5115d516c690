use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};

use colloquy_http::Sse;
use colloquy_model::{
    ErrorKind, FinishReason, ModelResponse, ResponseChunk, Usage,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::proto::{ChatCompletionChunk, CompletionUsage, ToolCall};

/// Streaming state of one tool call, keyed by the wire `index`.
struct PartialToolCall {
    wire_index: Option<u32>,
    id: Option<String>,
    name: String,
    // Argument text received before the name was known.
    buffered_args: String,
    started: bool,
}

struct PartialState {
    sse: Sse,
    id: Option<String>,
    tool_calls: Vec<PartialToolCall>,
    // Normalized chunks that are ready to be returned to the caller.
    queue: VecDeque<ResponseChunk>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    finished: bool,
    usage_counter: Arc<Mutex<Usage>>,
}

impl PartialState {
    fn tool_call_position(&mut self, wire_index: Option<u32>) -> usize {
        let existing = self
            .tool_calls
            .iter()
            .position(|t| wire_index.is_some() && t.wire_index == wire_index);
        match existing {
            Some(pos) => pos,
            None => {
                self.tool_calls.push(PartialToolCall {
                    wire_index,
                    id: None,
                    name: String::new(),
                    buffered_args: String::new(),
                    started: false,
                });
                self.tool_calls.len() - 1
            }
        }
    }

    fn patch_tool_call(&mut self, tool_call: ToolCall) {
        let index = self.tool_call_position(tool_call.index);
        let partial = &mut self.tool_calls[index];
        if let Some(id) = tool_call.id {
            partial.id.get_or_insert_default().push_str(&id);
        }
        let (name, arguments) = match tool_call.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };
        if let Some(name) = name {
            partial.name.push_str(&name);
        }
        if let Some(arguments) = arguments {
            partial.buffered_args.push_str(&arguments);
        }

        if !partial.started && !partial.name.is_empty() {
            partial.started = true;
            self.queue.push_back(ResponseChunk::ToolCallStart {
                index,
                id: partial.id.clone().filter(|id| !id.is_empty()),
                name: partial.name.clone(),
            });
        }
        if partial.started && !partial.buffered_args.is_empty() {
            self.queue.push_back(ResponseChunk::ToolCallArgsDelta {
                index,
                delta: std::mem::take(&mut partial.buffered_args),
            });
        }
    }

    fn complete_tool_calls(&mut self) -> Result<(), Error> {
        for (index, partial) in self.tool_calls.iter_mut().enumerate() {
            if !partial.started {
                return Err(Error::new(
                    "tool call without a function name",
                    ErrorKind::MalformedResponse,
                ));
            }
            if !partial.buffered_args.is_empty() {
                self.queue.push_back(ResponseChunk::ToolCallArgsDelta {
                    index,
                    delta: std::mem::take(&mut partial.buffered_args),
                });
            }
            self.queue
                .push_back(ResponseChunk::ToolCallComplete { index });
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        let finish_reason = self.finish_reason.unwrap_or(
            if self.tool_calls.is_empty() {
                FinishReason::Stop
            } else {
                FinishReason::ToolCalls
            },
        );
        if let Some(usage) = &self.usage {
            if let Ok(mut counter) = self.usage_counter.lock() {
                counter.accumulate(usage);
            }
        }
        self.queue.push_back(ResponseChunk::Done {
            finish_reason,
            usage: self.usage,
        });
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextChunk = Result<(Option<ResponseChunk>, PartialState), Error>;

pin_project! {
    /// A streamed chat completion.
    pub struct OpenAIResponse {
        next_chunk_fut: Option<PinnedFuture<NextChunk>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse, usage_counter: Arc<Mutex<Usage>>) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            tool_calls: Default::default(),
            queue: Default::default(),
            finish_reason: None,
            usage: None,
            finished: false,
            usage_counter,
        };
        let next_chunk_fut = async move { next_chunk(partial_state).await };
        Self {
            next_chunk_fut: Some(Box::pin(next_chunk_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Self::Error>> {
        let this = self.project();
        let Some(next_chunk_fut) = this.next_chunk_fut else {
            // The stream has been exhausted.
            return Poll::Ready(Ok(None));
        };
        let (chunk, partial_state) =
            match ready!(next_chunk_fut.as_mut().poll(cx)) {
                Ok((Some(chunk), partial_state)) => (chunk, partial_state),
                Ok((None, _)) => {
                    *this.next_chunk_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_chunk_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next chunk.
        let next_chunk_fut = async move { next_chunk(partial_state).await };
        *this.next_chunk_fut = Some(Box::pin(next_chunk_fut));

        Poll::Ready(Ok(Some(chunk)))
    }
}

#[inline]
pub(crate) fn map_finish_reason(
    finish_reason: &str,
    has_tool_calls: bool,
) -> FinishReason {
    match finish_reason {
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "stop" if has_tool_calls => FinishReason::ToolCalls,
        "stop" => FinishReason::Stop,
        _ => FinishReason::Other,
    }
}

#[inline]
pub(crate) fn map_usage(usage: CompletionUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
    }
}

async fn next_chunk(
    mut partial_state: PartialState,
) -> Result<(Option<ResponseChunk>, PartialState), Error> {
    loop {
        if let Some(chunk) = partial_state.queue.pop_front() {
            return Ok((Some(chunk), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => {
                if partial_state.finish_reason.is_none() {
                    return Err(Error::new(
                        "stream ended before the response completed",
                        ErrorKind::Transport,
                    ));
                }
                partial_state.finish();
                continue;
            }
            Err(colloquy_http::SseError::ChunksError(err)) => {
                return Err(Error::new(err.message, err.kind));
            }
            Err(err) => {
                return Err(Error::new(
                    format!("{err:?}"),
                    ErrorKind::MalformedResponse,
                ));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            partial_state.finish();
            continue;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::MalformedResponse)
            })?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new(
                "chunk id mismatch",
                ErrorKind::MalformedResponse,
            ));
        };

        if let Some(usage) = chunk.usage {
            partial_state.usage = Some(map_usage(usage));
        }

        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                partial_state
                    .queue
                    .push_back(ResponseChunk::TextDelta(content));
            }
        }
        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            trace!("got reasoning content: {reasoning_content}");
        }
        if let Some(tool_calls) = choice.delta.tool_calls {
            for tool_call in tool_calls {
                partial_state.patch_tool_call(tool_call);
            }
        }

        // The order of chunks is important. Text and argument deltas of this
        // event go first, then completions of all tool calls.
        if let Some(finish_reason) = choice.finish_reason {
            partial_state.complete_tool_calls()?;
            partial_state.finish_reason = Some(map_finish_reason(
                &finish_reason,
                !partial_state.tool_calls.is_empty(),
            ));
        }
    }
}
