//! A model provider for OpenAI-compatible chat completion APIs.
//!
//! These APIs have no conversation state, so every request carries the
//! complete transcript rebuilt under the backend's role alternation and
//! tool-result pairing rules.

#[macro_use]
extern crate tracing;

mod config;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex};

use colloquy_http::{Chunks, Sse, check_response, error_kind_for_reqwest};
use colloquy_model::{
    ErrorKind, FinishReason, GenerateResponse, ModelCapabilities,
    ModelProvider, ModelProviderError, ModelRequest, ToolCallRequest, Usage,
};
use reqwest::{Client, RequestBuilder, header};
use serde_json::{Map, Value};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use proto::{ChatCompletion, EmbeddingRequest, EmbeddingResponse};
pub use response::OpenAIResponse;

/// Error type for [`OpenAIProvider`].
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

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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
            format!("{operation} is not supported by OpenAI-compatible APIs"),
            ErrorKind::UnsupportedOperation,
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::new(format!("{err}"), error_kind_for_reqwest(&err))
    }
}

impl From<(ErrorKind, String)> for Error {
    #[inline]
    fn from((kind, message): (ErrorKind, String)) -> Self {
        Self::new(message, kind)
    }
}

/// OpenAI-compatible model provider.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
    usage: Arc<Mutex<Usage>>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
            usage: Default::default(),
        }
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.config.base_url, path))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::CONTENT_TYPE, "application/json")
    }
}

impl ModelProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            structured_output: false,
            token_counting: false,
            embeddings: true,
        }
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, true);
        let resp_fut = self
            .post("/chat/completions")
            .header(header::ACCEPT, "text/event-stream")
            .json(&openai_req)
            .send();
        let usage = Arc::clone(&self.usage);

        async move {
            let resp = check_response(resp_fut.await?).await?;
            if !colloquy_http::is_event_stream(&resp) {
                return Err(Error::new(
                    format!(
                        "Unexpected content type: {:?}",
                        resp.headers().get(header::CONTENT_TYPE)
                    ),
                    ErrorKind::MalformedResponse,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(OpenAIResponse::from_sse(sse, usage))
        }
    }

    fn generate(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<GenerateResponse, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, false);
        let resp_fut = self.post("/chat/completions").json(&openai_req).send();
        let usage_counter = Arc::clone(&self.usage);

        async move {
            let resp = check_response(resp_fut.await?).await?;
            let completion: ChatCompletion = resp.json().await.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::MalformedResponse)
            })?;
            let usage = completion.usage.map(response::map_usage);
            if let (Some(usage), Ok(mut counter)) =
                (&usage, usage_counter.lock())
            {
                counter.accumulate(usage);
            }
            let Some(choice) = completion.choices.into_iter().next() else {
                return Err(Error::new(
                    "no choices in the completion",
                    ErrorKind::MalformedResponse,
                ));
            };

            let mut tool_calls = Vec::new();
            for call in choice.message.tool_calls.unwrap_or_default() {
                let function = call.function.unwrap_or(proto::FunctionToolCall {
                    name: None,
                    arguments: None,
                });
                tool_calls.push(ToolCallRequest {
                    id: call
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(ToolCallRequest::generate_id),
                    name: function.name.unwrap_or_default(),
                    args: parse_arguments(function.arguments.as_deref())?,
                });
            }
            let finish_reason = choice
                .finish_reason
                .as_deref()
                .map(|r| response::map_finish_reason(r, !tool_calls.is_empty()))
                .unwrap_or(FinishReason::Stop);

            Ok(GenerateResponse {
                text: choice.message.content.unwrap_or_default(),
                tool_calls,
                usage,
                finish_reason,
            })
        }
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        let resp_fut = self
            .post("/embeddings")
            .json(&EmbeddingRequest {
                model: &self.config.embedding_model,
                input: texts,
            })
            .send();
        let expected = texts.len();

        async move {
            let resp = check_response(resp_fut.await?).await?;
            let mut resp: EmbeddingResponse =
                resp.json().await.map_err(|err| {
                    Error::new(format!("{err}"), ErrorKind::MalformedResponse)
                })?;
            if resp.data.len() != expected {
                return Err(Error::new(
                    format!(
                        "expected {expected} embeddings, got {}",
                        resp.data.len()
                    ),
                    ErrorKind::MalformedResponse,
                ));
            }
            resp.data.sort_by_key(|e| e.index);
            Ok(resp.data.into_iter().map(|e| e.embedding).collect())
        }
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

fn parse_arguments(arguments: Option<&str>) -> Result<Map<String, Value>, Error> {
    let arguments = arguments.unwrap_or_default().trim();
    if arguments.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(arguments) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::new(
            format!("tool arguments are not an object: {other}"),
            ErrorKind::MalformedResponse,
        )),
        Err(err) => Err(Error::new(
            format!("invalid tool arguments: {err}"),
            ErrorKind::MalformedResponse,
        )),
    }
}
