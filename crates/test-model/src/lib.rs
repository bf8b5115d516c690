//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use colloquy_model::{
    ErrorKind, FinishReason, GenerateResponse, Message, ModelCapabilities,
    ModelProvider, ModelProviderError, ModelRequest, ModelResponse,
    ResponseChunk, Usage, estimate_token_count,
};
use serde_json::Value;
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn unsupported(operation: &str) -> Self {
        Self::new(
            format!("{operation} is not enabled"),
            ErrorKind::UnsupportedOperation,
        )
    }
}

pub struct TestModelResponse {
    chunks: VecDeque<ResponseChunk>,
    interruption: Option<ErrorKind>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Self::Error>> {
        let this = self.get_mut();
        if this.chunks.is_empty() {
            if let Some(kind) = this.interruption.take() {
                return Poll::Ready(Err(Error::new("stream interrupted", kind)));
            }
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        Poll::Ready(Ok(this.chunks.pop_front()))
    }
}

#[derive(Default)]
struct Script {
    responses: VecDeque<PresetResponse>,
    // Failed attempts of the response at the front.
    attempts: u64,
    generate_responses: VecDeque<String>,
    json_responses: VecDeque<Value>,
    token_counts: VecDeque<u64>,
    requests: Vec<ModelRequest>,
    generate_requests: Vec<ModelRequest>,
    usage: Usage,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond. Streamed requests consume preset responses in
/// order, one-shot generations and structured outputs have queues of their
/// own. If there are not enough entries, an error will be returned.
///
/// Clones share the script, so it can still be extended after the provider
/// has been handed to an agent.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    capabilities: ModelCapabilities,
    delay: Option<Duration>,
}

impl TestModelProvider {
    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test must not hide the script from other clones.
        self.script.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Appends a response for the next streamed request.
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.script().responses.push_back(preset);
    }

    /// Appends the text returned by the next [`ModelProvider::generate`].
    #[inline]
    pub fn add_generate_response(&self, text: impl Into<String>) {
        self.script().generate_responses.push_back(text.into());
    }

    /// Appends the value returned by the next
    /// [`ModelProvider::generate_json`].
    #[inline]
    pub fn add_json_response(&self, value: Value) {
        self.script().json_responses.push_back(value);
    }

    /// Appends the result of the next [`ModelProvider::count_tokens`]. Only
    /// used when token counting is enabled, the heuristic answers otherwise.
    #[inline]
    pub fn add_token_count(&self, count: u64) {
        self.script().token_counts.push_back(count);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    #[inline]
    pub fn set_capabilities(&mut self, capabilities: ModelCapabilities) {
        self.capabilities = capabilities;
    }

    /// Returns all streamed requests received so far, failed ones included.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script().requests.clone()
    }

    /// Returns all one-shot and structured requests received so far.
    pub fn generate_requests(&self) -> Vec<ModelRequest> {
        self.script().generate_requests.clone()
    }

    /// Returns the number of streamed responses not consumed yet.
    pub fn remaining_responses(&self) -> usize {
        self.script().responses.len()
    }
}

fn preset_chunks(preset: &PresetResponse) -> VecDeque<ResponseChunk> {
    let mut chunks = VecDeque::new();
    let mut tool_call_count = 0;
    for event in &preset.events {
        match event {
            PresetEvent::TextDelta(text) => {
                chunks.push_back(ResponseChunk::TextDelta(text.clone()));
            }
            PresetEvent::ToolCall(call) => {
                let index = tool_call_count;
                tool_call_count += 1;
                chunks.push_back(ResponseChunk::ToolCallStart {
                    index,
                    id: (!call.id.is_empty()).then(|| call.id.clone()),
                    name: call.name.clone(),
                });
                chunks.push_back(ResponseChunk::ToolCallArgsDelta {
                    index,
                    delta: Value::Object(call.args.clone()).to_string(),
                });
                chunks.push_back(ResponseChunk::ToolCallComplete { index });
            }
        }
    }
    let finish_reason = preset.finish_reason.unwrap_or(if tool_call_count > 0 {
        FinishReason::ToolCalls
    } else {
        FinishReason::Stop
    });
    if preset.interruption.is_none() {
        chunks.push_back(ResponseChunk::Done {
            finish_reason,
            usage: preset.usage,
        });
    }
    chunks
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let mut script = self.script();
        script.requests.push(req.clone());

        let Some(preset) = script.responses.front() else {
            return ready(Err(Error::new("no enough steps", ErrorKind::Other)));
        };
        let failing = match preset.failures {
            Some(0) => true,
            Some(failures) => script.attempts < failures,
            None => false,
        };
        if failing {
            let kind = preset.failure_kind;
            script.attempts += 1;
            return ready(Err(Error::new("simulated failure", kind)));
        }

        let chunks = preset_chunks(preset);
        let interruption = preset.interruption;
        if let Some(usage) = preset.usage {
            script.usage.accumulate(&usage);
        }
        script.responses.pop_front();
        script.attempts = 0;

        ready(Ok(TestModelResponse {
            chunks,
            interruption,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        }))
    }

    fn generate(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<GenerateResponse, Self::Error>> + Send + 'static
    {
        let mut script = self.script();
        script.generate_requests.push(req.clone());
        let resp = match script.generate_responses.pop_front() {
            Some(text) => Ok(GenerateResponse {
                text,
                tool_calls: vec![],
                usage: None,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(Error::new("no generate response", ErrorKind::Other)),
        };
        ready(resp)
    }

    fn generate_json(
        &self,
        req: &ModelRequest,
        _schema: &Value,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send + 'static {
        if !self.capabilities.structured_output {
            return ready(Err(Error::unsupported("structured output")));
        }
        let mut script = self.script();
        script.generate_requests.push(req.clone());
        ready(script.json_responses.pop_front().ok_or_else(|| {
            Error::new("no structured response", ErrorKind::Other)
        }))
    }

    fn count_tokens(
        &self,
        _model: &str,
        messages: &[Message],
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'static {
        let scripted = if self.capabilities.token_counting {
            self.script().token_counts.pop_front()
        } else {
            None
        };
        ready(Ok(scripted.unwrap_or_else(|| estimate_token_count(messages))))
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        if !self.capabilities.embeddings {
            return ready(Err(Error::unsupported("embeddings")));
        }
        ready(Ok(texts.iter().map(|t| vec![t.len() as f32]).collect()))
    }

    fn usage(&self) -> Usage {
        self.script().usage
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use colloquy_model::{ToolCallRequest, ToolDeclaration};
    use serde_json::json;

    use super::*;

    async fn collect_response(resp: TestModelResponse) -> Vec<ResponseChunk> {
        let mut resp = pin!(resp);
        let mut chunks = vec![];
        while let Some(chunk) = poll_fn(|cx| resp.as_mut().poll_next_chunk(cx))
            .await
            .unwrap()
        {
            chunks.push(chunk);
        }
        chunks
    }

    fn request(text: &str) -> ModelRequest {
        ModelRequest {
            model: "test".to_owned(),
            messages: vec![Message::user_text(text)],
            config: Default::default(),
            tools: vec![ToolDeclaration {
                name: "read_file".to_owned(),
                description: "Reads a file".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filename": {
                            "type": "string",
                            "description": "The name of the file to read"
                        }
                    }
                }),
            }],
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let provider = TestModelProvider::default();
        provider.add_response(PresetResponse::with_events([
            PresetEvent::TextDelta("Hello, ".to_owned()),
            PresetEvent::TextDelta("world!".to_owned()),
        ]));
        provider.add_response(PresetResponse::with_events([
            PresetEvent::TextDelta("Sure.".to_owned()),
            PresetEvent::ToolCall(ToolCallRequest {
                id: String::new(),
                name: "read_file".to_owned(),
                args: json!({ "filename": "todo.txt" })
                    .as_object()
                    .cloned()
                    .unwrap(),
            }),
        ]));

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        assert_eq!(collect_response(resp).await, vec![
            ResponseChunk::TextDelta("Hello, ".to_owned()),
            ResponseChunk::TextDelta("world!".to_owned()),
            ResponseChunk::Done {
                finish_reason: FinishReason::Stop,
                usage: None,
            },
        ]);

        let resp = provider.send_request(&request("Check")).await.unwrap();
        assert_eq!(collect_response(resp).await, vec![
            ResponseChunk::TextDelta("Sure.".to_owned()),
            ResponseChunk::ToolCallStart {
                index: 0,
                id: None,
                name: "read_file".to_owned(),
            },
            ResponseChunk::ToolCallArgsDelta {
                index: 0,
                delta: r#"{"filename":"todo.txt"}"#.to_owned(),
            },
            ResponseChunk::ToolCallComplete { index: 0 },
            ResponseChunk::Done {
                finish_reason: FinishReason::ToolCalls,
                usage: None,
            },
        ]);

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining_responses(), 0);
        let err = provider.send_request(&request("More")).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[tokio::test]
    async fn test_failures() {
        let provider = TestModelProvider::default();
        provider.add_response(
            PresetResponse::with_text("ok")
                .with_failures(2)
                .with_failure_kind(ErrorKind::Transport),
        );

        for _ in 0..2 {
            let err = provider.send_request(&request("Hi")).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Transport);
        }
        assert!(provider.send_request(&request("Hi")).await.is_ok());
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_stream() {
        let provider = TestModelProvider::default();
        provider.add_response(
            PresetResponse::with_text("Partial").interrupted_by(ErrorKind::Transport),
        );

        let resp = provider.send_request(&request("Hi")).await.unwrap();
        let mut resp = pin!(resp);
        let chunk = poll_fn(|cx| resp.as_mut().poll_next_chunk(cx)).await;
        assert_eq!(chunk.unwrap(), Some(ResponseChunk::TextDelta("Partial".to_owned())));
        let err = poll_fn(|cx| resp.as_mut().poll_next_chunk(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        let chunk = poll_fn(|cx| resp.as_mut().poll_next_chunk(cx)).await;
        assert_eq!(chunk.unwrap(), None);
    }

    #[tokio::test]
    async fn test_optional_operations() {
        let mut provider = TestModelProvider::default();
        let req = request("Hi");
        let err = provider.generate_json(&req, &json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(
            provider.count_tokens("test", &req.messages).await.unwrap(),
            1
        );

        provider.set_capabilities(ModelCapabilities {
            structured_output: true,
            token_counting: true,
            embeddings: true,
        });
        provider.add_json_response(json!({ "next_speaker": "user" }));
        provider.add_token_count(42);
        let value = provider.generate_json(&req, &json!({})).await.unwrap();
        assert_eq!(value["next_speaker"], "user");
        assert_eq!(
            provider.count_tokens("test", &req.messages).await.unwrap(),
            42
        );
        let vectors = provider.embed(&["abc".to_owned()]).await.unwrap();
        assert_eq!(vectors, vec![vec![3.0]]);
    }
}
