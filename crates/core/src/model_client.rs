use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use colloquy_model::{
    ErrorKind, GenerateResponse, Message, ModelCapabilities, ModelProvider,
    ModelRequest, ModelResponse, ResponseChunk, Usage,
};
use serde_json::Value;
use tracing::Instrument;

use crate::Error;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Object-safe mirror of [`ModelProvider`] with provider errors converted.
trait DynProvider: Send + Sync {
    fn capabilities(&self) -> ModelCapabilities;

    fn send_request(&self, req: &ModelRequest) -> BoxFuture<Result<ModelStream, Error>>;

    fn generate(&self, req: &ModelRequest) -> BoxFuture<Result<GenerateResponse, Error>>;

    fn generate_json(
        &self,
        req: &ModelRequest,
        schema: &Value,
    ) -> BoxFuture<Result<Value, Error>>;

    fn count_tokens(
        &self,
        model: &str,
        messages: &[Message],
    ) -> BoxFuture<Result<u64, Error>>;

    fn embed(&self, texts: &[String]) -> BoxFuture<Result<Vec<Vec<f32>>, Error>>;

    fn usage(&self) -> Usage;
}

impl<P: ModelProvider> DynProvider for P {
    #[inline]
    fn capabilities(&self) -> ModelCapabilities {
        ModelProvider::capabilities(self)
    }

    fn send_request(&self, req: &ModelRequest) -> BoxFuture<Result<ModelStream, Error>> {
        let fut = ModelProvider::send_request(self, req);
        Box::pin(
            async move {
                let resp = fut.await.map_err(Error::from_provider)?;
                Ok(ModelStream {
                    inner: Box::pin(resp),
                })
            }
            .instrument(trace_span!("model client stream")),
        )
    }

    fn generate(&self, req: &ModelRequest) -> BoxFuture<Result<GenerateResponse, Error>> {
        let fut = ModelProvider::generate(self, req);
        Box::pin(
            async move { fut.await.map_err(Error::from_provider) }
                .instrument(trace_span!("model client generate")),
        )
    }

    fn generate_json(
        &self,
        req: &ModelRequest,
        schema: &Value,
    ) -> BoxFuture<Result<Value, Error>> {
        let fut = ModelProvider::generate_json(self, req, schema);
        Box::pin(async move { fut.await.map_err(Error::from_provider) })
    }

    fn count_tokens(
        &self,
        model: &str,
        messages: &[Message],
    ) -> BoxFuture<Result<u64, Error>> {
        let fut = ModelProvider::count_tokens(self, model, messages);
        Box::pin(async move { fut.await.map_err(Error::from_provider) })
    }

    fn embed(&self, texts: &[String]) -> BoxFuture<Result<Vec<Vec<f32>>, Error>> {
        let fut = ModelProvider::embed(self, texts);
        Box::pin(async move { fut.await.map_err(Error::from_provider) })
    }

    #[inline]
    fn usage(&self) -> Usage {
        ModelProvider::usage(self)
    }
}

trait DynResponse: Send {
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Error>>;
}

impl<R: ModelResponse> DynResponse for R {
    #[inline]
    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ResponseChunk>, Error>> {
        self.poll_next_chunk(cx).map_err(Error::from_provider)
    }
}

/// A type-erased streamed response.
pub struct ModelStream {
    inner: Pin<Box<dyn DynResponse>>,
}

impl ModelStream {
    /// Receives the next chunk, `None` once the response has completed.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe, no chunk is lost when the returned
    /// future is dropped before completion.
    #[inline]
    pub async fn next_chunk(&mut self) -> Result<Option<ResponseChunk>, Error> {
        poll_fn(|cx| self.inner.as_mut().poll_next(cx)).await
    }
}

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    provider: Arc<dyn DynProvider>,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        Self {
            provider: Arc::new(provider),
        }
    }

    #[inline]
    pub fn capabilities(&self) -> ModelCapabilities {
        self.provider.capabilities()
    }

    /// Opens a streamed response and waits for its first chunk.
    ///
    /// A stream that fails or ends before yielding anything is reported as
    /// an error of this call, so the whole operation can be retried.
    pub fn start_stream(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<(ResponseChunk, ModelStream), Error>>
    + Send
    + 'static
    + use<> {
        trace!("sending a request: {req:?}");
        let fut = self.provider.send_request(req);
        async move {
            let mut stream = fut.await?;
            match stream.next_chunk().await? {
                Some(chunk) => Ok((chunk, stream)),
                None => Err(Error::model(
                    ErrorKind::Transport,
                    "stream ended without any chunk",
                )),
            }
        }
    }

    #[inline]
    pub fn generate(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<GenerateResponse, Error>> + Send + 'static + use<> {
        self.provider.generate(req)
    }

    #[inline]
    pub fn generate_json(
        &self,
        req: &ModelRequest,
        schema: &Value,
    ) -> impl Future<Output = Result<Value, Error>> + Send + 'static + use<> {
        self.provider.generate_json(req, schema)
    }

    #[inline]
    pub fn count_tokens(
        &self,
        model: &str,
        messages: &[Message],
    ) -> impl Future<Output = Result<u64, Error>> + Send + 'static + use<> {
        self.provider.count_tokens(model, messages)
    }

    #[inline]
    pub fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, Error>> + Send + 'static + use<> {
        self.provider.embed(texts)
    }

    #[inline]
    pub fn usage(&self) -> Usage {
        self.provider.usage()
    }
}
