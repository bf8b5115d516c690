//! A model provider for the Gemini `generateContent` family of APIs.
//!
//! Besides streaming and one-shot generation this backend supports
//! structured JSON output, native token counting and batch embeddings.

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
    ErrorKind, GenerateResponse, Message, ModelCapabilities, ModelProvider,
    ModelProviderError, ModelRequest, ToolCallRequest, Usage,
};
use reqwest::{Client, RequestBuilder, header};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use config::Credential;
pub use config::{GeminiConfig, GeminiConfigBuilder};
use proto::{
    BatchEmbedResponse, CountTokensResponse, GenerateContentResponse,
};
pub use response::GeminiResponse;

/// Error type for [`GeminiProvider`].
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
            format!("{operation} is not supported by Gemini"),
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

/// Gemini model provider.
#[derive(Clone, Debug)]
pub struct GeminiProvider {
    client: Client,
    config: Arc<GeminiConfig>,
    usage: Arc<Mutex<Usage>>,
}

impl GeminiProvider {
    /// Creates a new `GeminiProvider` with the given configuration.
    #[inline]
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
            usage: Default::default(),
        }
    }

    fn post<B: Serialize>(&self, model: &str, method: &str, body: &B) -> RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/models/{model}:{method}", self.config.base_url))
            .json(body);
        match &self.config.credential {
            Credential::ApiKey(key) => builder.header("x-goog-api-key", key),
            Credential::AccessToken(token) => {
                builder.header(header::AUTHORIZATION, format!("Bearer {token}"))
            }
        }
    }

    fn accumulate(&self, usage: &Usage) {
        if let Ok(mut counter) = self.usage.lock() {
            counter.accumulate(usage);
        }
    }
}

async fn read_json<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, Error> {
    let resp = check_response(resp).await?;
    resp.json()
        .await
        .map_err(|err| Error::new(format!("{err}"), ErrorKind::MalformedResponse))
}

impl ModelProvider for GeminiProvider {
    type Error = Error;
    type Response = GeminiResponse;

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            structured_output: true,
            token_counting: true,
            embeddings: true,
        }
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let gemini_req = proto::create_request(req);
        let resp_fut = self
            .post(&req.model, "streamGenerateContent?alt=sse", &gemini_req)
            .header(header::ACCEPT, "text/event-stream")
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
            let sse = Sse::new(Chunks::from_response(resp));
            Ok(GeminiResponse::from_sse(sse, usage))
        }
    }

    fn generate(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<GenerateResponse, Self::Error>> + Send + 'static
    {
        let gemini_req = proto::create_request(req);
        let resp_fut = self.post(&req.model, "generateContent", &gemini_req).send();
        let this = self.clone();

        async move {
            let resp: GenerateContentResponse = read_json(resp_fut.await?).await?;
            let resp = into_generate_response(resp)?;
            if let Some(usage) = &resp.usage {
                this.accumulate(usage);
            }
            Ok(resp)
        }
    }

    fn generate_json(
        &self,
        req: &ModelRequest,
        schema: &Value,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send + 'static {
        let gemini_req = proto::create_json_request(req, schema);
        let resp_fut = self.post(&req.model, "generateContent", &gemini_req).send();
        let this = self.clone();

        async move {
            let resp: GenerateContentResponse = read_json(resp_fut.await?).await?;
            let resp = into_generate_response(resp)?;
            if let Some(usage) = &resp.usage {
                this.accumulate(usage);
            }
            parse_json_text(&resp.text)
        }
    }

    fn count_tokens(
        &self,
        model: &str,
        messages: &[Message],
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'static {
        let body = proto::create_count_tokens_request(messages);
        let resp_fut = self.post(model, "countTokens", &body).send();

        async move {
            let resp: CountTokensResponse = read_json(resp_fut.await?).await?;
            Ok(resp.total_tokens)
        }
    }

    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        let model = &self.config.embedding_model;
        let body = proto::create_embed_request(model, texts);
        let resp_fut = self.post(model, "batchEmbedContents", &body).send();
        let expected = texts.len();

        async move {
            let resp: BatchEmbedResponse = read_json(resp_fut.await?).await?;
            if resp.embeddings.len() != expected {
                return Err(Error::new(
                    format!(
                        "expected {expected} embeddings, got {}",
                        resp.embeddings.len()
                    ),
                    ErrorKind::MalformedResponse,
                ));
            }
            Ok(resp.embeddings.into_iter().map(|e| e.values).collect())
        }
    }

    fn usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

fn into_generate_response(
    resp: GenerateContentResponse,
) -> Result<GenerateResponse, Error> {
    let usage = resp.usage_metadata.map(proto::map_usage);
    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Err(Error::new(
            "no candidates in the response",
            ErrorKind::MalformedResponse,
        ));
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.parts {
        if part.thought == Some(true) {
            continue;
        }
        if let Some(t) = part.text {
            text.push_str(&t);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolCallRequest {
                id: call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(ToolCallRequest::generate_id),
                name: call.name,
                args: call.args,
            });
        }
    }
    let finish_reason = proto::map_finish_reason(
        candidate.finish_reason.as_deref().unwrap_or("STOP"),
        !tool_calls.is_empty(),
    );

    Ok(GenerateResponse {
        text,
        tool_calls,
        usage,
        finish_reason,
    })
}

fn parse_json_text(text: &str) -> Result<Value, Error> {
    let text = text.trim();
    // Some models wrap JSON output in a markdown fence despite the mime type.
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|t| t.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(text);
    serde_json::from_str(text).map_err(|err| {
        debug!("invalid structured output: {text:?}");
        Error::new(
            format!("response is not valid JSON: {err}"),
            ErrorKind::MalformedResponse,
        )
    })
}
