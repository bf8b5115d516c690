use std::error::Error;
use std::future::ready;

use serde_json::Value;

use crate::error::ErrorKind;
use crate::message::Message;
use crate::request::ModelRequest;
use crate::response::{GenerateResponse, ModelResponse, Usage};
use crate::tokens::estimate_token_count;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Creates an error of [`ErrorKind::UnsupportedOperation`] kind.
    fn unsupported(operation: &str) -> Self
    where
        Self: Sized;
}

/// Optional features a provider may support.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModelCapabilities {
    /// The provider implements [`ModelProvider::generate_json`].
    pub structured_output: bool,
    /// The provider has a native token counting endpoint.
    pub token_counting: bool,
    /// The provider implements [`ModelProvider::embed`].
    pub embeddings: bool,
}

/// A type that represents a model provider, which is an entry for getting
/// model information, sampling requests, etc.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state (like usage counters), but callers
/// should not rely on it, and the provider should be prepared for being
/// dropped anytime.
///
/// All returned futures are independent of `self` and cancel safe: the
/// caller cancels an operation by dropping its future.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The streamed response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Returns the optional features of this provider.
    fn capabilities(&self) -> ModelCapabilities;

    /// Sends a request to the model and streams the response.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;

    /// Sends a request to the model and waits for the whole response.
    fn generate(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<GenerateResponse, Self::Error>> + Send + 'static;

    /// Sends a request whose output must be a JSON value conforming to
    /// `schema`.
    fn generate_json(
        &self,
        _req: &ModelRequest,
        _schema: &Value,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send + 'static {
        ready(Err(Self::Error::unsupported("structured output")))
    }

    /// Counts the tokens of `messages` for `model`.
    ///
    /// Providers without a counting endpoint use the default heuristic.
    fn count_tokens(
        &self,
        _model: &str,
        messages: &[Message],
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send + 'static {
        ready(Ok(estimate_token_count(messages)))
    }

    /// Produces one embedding vector for each text.
    fn embed(
        &self,
        _texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Self::Error>> + Send + 'static
    {
        ready(Err(Self::Error::unsupported("embeddings")))
    }

    /// Returns the usage accumulated by this provider so far.
    fn usage(&self) -> Usage {
        Usage::default()
    }
}
