use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};

use colloquy_http::{Sse, SseError};
use colloquy_model::{
    ErrorKind, FinishReason, ModelResponse, ResponseChunk, Usage,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::proto::{self, GenerateContentResponse};

struct PartialState {
    sse: Sse,
    queue: VecDeque<ResponseChunk>,
    tool_call_count: usize,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    finished: bool,
    usage_counter: Arc<Mutex<Usage>>,
}

impl PartialState {
    /// Queues the chunks of one streamed `GenerateContentResponse`.
    ///
    /// Function calls always arrive whole, so each one is expanded into a
    /// start, a single argument delta and a completion.
    fn push_response(
        &mut self,
        resp: GenerateContentResponse,
    ) -> Result<(), Error> {
        if let Some(usage) = resp.usage_metadata {
            self.usage = Some(proto::map_usage(usage));
        }
        let Some(candidate) = resp.candidates.into_iter().next() else {
            return Ok(());
        };
        for part in candidate.content.parts {
            if part.thought == Some(true) {
                continue;
            }
            if let Some(text) = part.text {
                if !text.is_empty() {
                    self.queue.push_back(ResponseChunk::TextDelta(text));
                }
            }
            if let Some(call) = part.function_call {
                let index = self.tool_call_count;
                self.tool_call_count += 1;
                let args = serde_json::to_string(&call.args).map_err(|err| {
                    Error::new(format!("{err}"), ErrorKind::MalformedResponse)
                })?;
                self.queue.push_back(ResponseChunk::ToolCallStart {
                    index,
                    id: call.id.filter(|id| !id.is_empty()),
                    name: call.name,
                });
                self.queue
                    .push_back(ResponseChunk::ToolCallArgsDelta { index, delta: args });
                self.queue
                    .push_back(ResponseChunk::ToolCallComplete { index });
            }
        }
        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(reason);
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.finished = true;
        let has_tool_calls = self.tool_call_count > 0;
        let finish_reason = match self.finish_reason.as_deref() {
            Some(reason) => proto::map_finish_reason(reason, has_tool_calls),
            None if has_tool_calls => FinishReason::ToolCalls,
            None => FinishReason::Stop,
        };
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
    /// A streamed `streamGenerateContent` response.
    pub struct GeminiResponse {
        next_chunk_fut: Option<PinnedFuture<NextChunk>>,
    }
}

impl GeminiResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse, usage_counter: Arc<Mutex<Usage>>) -> Self {
        let partial_state = PartialState {
            sse,
            queue: Default::default(),
            tool_call_count: 0,
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

impl ModelResponse for GeminiResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Self::Error>> {
        let this = self.project();
        let Some(next_chunk_fut) = this.next_chunk_fut else {
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

        let next_chunk_fut = async move { next_chunk(partial_state).await };
        *this.next_chunk_fut = Some(Box::pin(next_chunk_fut));

        Poll::Ready(Ok(Some(chunk)))
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
                // A stream that was cut before saying why it stopped cannot
                // be trusted to be complete.
                if partial_state.finish_reason.is_none() {
                    return Err(Error::new(
                        "stream ended before the response completed",
                        ErrorKind::Transport,
                    ));
                }
                partial_state.finish();
                continue;
            }
            Err(SseError::ChunksError(err)) => {
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

        let resp = serde_json::from_str::<GenerateContentResponse>(&sse_event)
            .map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::MalformedResponse)
            })?;
        partial_state.push_response(resp)?;
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use colloquy_http::Chunks;
    use colloquy_model::ModelProviderError;

    use super::*;

    async fn collect(chunks: Vec<Bytes>) -> Result<Vec<ResponseChunk>, Error> {
        let sse = Sse::new(Chunks::from_vec_deque(chunks.into()));
        let mut resp =
            pin!(GeminiResponse::from_sse(sse, Arc::new(Mutex::default())));
        let mut out = vec![];
        while let Some(chunk) =
            poll_fn(|cx| resp.as_mut().poll_next_chunk(cx)).await?
        {
            out.push(chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_stream_with_function_call() {
        let chunks = collect(vec![Bytes::from_static(include_bytes!(
            "../fixtures/test_response.txt"
        ))])
        .await
        .unwrap();
        assert_eq!(chunks, vec![
            ResponseChunk::TextDelta("Let me ".to_owned()),
            ResponseChunk::TextDelta("check.".to_owned()),
            ResponseChunk::ToolCallStart {
                index: 0,
                id: None,
                name: "list_files".to_owned(),
            },
            ResponseChunk::ToolCallArgsDelta {
                index: 0,
                delta: r#"{"path":"."}"#.to_owned(),
            },
            ResponseChunk::ToolCallComplete { index: 0 },
            ResponseChunk::Done {
                finish_reason: FinishReason::ToolCalls,
                usage: Some(Usage {
                    input_tokens: 12,
                    output_tokens: 7,
                }),
            },
        ]);
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let err = collect(vec![Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hi\"}]}}]}\r\n\r\n",
        )])
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_thoughts_are_skipped() {
        let chunks = collect(vec![Bytes::from_static(
            b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"hmm\",\"thought\":true},{\"text\":\"4\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
        )])
        .await
        .unwrap();
        assert_eq!(chunks, vec![
            ResponseChunk::TextDelta("4".to_owned()),
            ResponseChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: None,
            },
        ]);
    }
}
