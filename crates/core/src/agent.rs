mod builder;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use colloquy_model::{
    GenerationConfig, Message, ModelCapabilities, ModelRequest, Part, Role,
    ToolCallRequest, ToolOutput, ToolResult, Usage,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};
use uuid::Uuid;

pub use builder::AgentBuilder;

use crate::compression::Compressor;
use crate::config::{AgentConfig, AuthType};
use crate::environment::EnvironmentContext;
use crate::event::{AgentEvent, CompressionRecord, ToolCallResponse, TurnOutcome};
use crate::model_client::ModelClient;
use crate::next_speaker::{NextSpeaker, check_next_speaker};
use crate::prompts::CONTINUE_PROMPT;
use crate::retry::{no_fallback, with_retry};
use crate::token_limit::token_limit;
use crate::tool::{self, ToolRegistry};
use crate::transcript::Transcript;
use crate::turn::{TurnContext, TurnResponse, run_turn};
use crate::Error;

/// Asked before switching models on persistent rate limiting, with the
/// current and the fallback model. Returns whether to switch.
pub type FallbackHook = Box<dyn FnMut(&str, &str) -> bool + Send + Sync>;

/// A conversation session, which owns the transcript and drives the loop
/// of model calls and tool executions for every user message.
///
/// Messages are processed one at a time, which is enforced by taking
/// `&mut self`. Hosts that need concurrent access should wrap the agent
/// in a mutex and keep a [`CancellationToken`] outside of it.
pub struct Agent {
    client: ModelClient,
    tools: Arc<dyn ToolRegistry>,
    config: AgentConfig,
    environment: Option<EnvironmentContext>,
    transcript: Transcript,
    model: String,
    session_turns_left: u32,
    session_id: Uuid,
    span: Span,
    on_fallback: Option<FallbackHook>,
}

impl Agent {
    fn from_builder(builder: AgentBuilder) -> Self {
        let AgentBuilder {
            model_client,
            config,
            tool_registry,
            tool_set,
            environment,
            span,
            on_fallback,
        } = builder;

        let tools = match tool_registry {
            Some(registry) => {
                if !tool_set.is_empty() {
                    warn!("ignoring {} tools added besides a registry", tool_set.len());
                }
                registry
            }
            None => Arc::new(tool_set),
        };
        let session_id = Uuid::new_v4();
        let mut agent = Self {
            client: model_client,
            tools,
            model: config.model.clone(),
            session_turns_left: config.max_session_turns,
            config,
            environment,
            transcript: Transcript::new(),
            session_id,
            span: span.unwrap_or_else(|| info_span!("agent", session = %session_id)),
            on_fallback,
        };
        agent.seed_transcript();
        agent
    }

    fn seed_transcript(&mut self) {
        let messages = match &self.environment {
            Some(environment) => environment.to_messages().into(),
            None => vec![],
        };
        if let Err(err) = self.transcript.replace(messages) {
            error!("failed to seed the transcript: {err}");
        }
    }

    /// Returns the id of this session, which is also recorded in the
    /// default tracing span.
    #[inline]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the model in use, which changes after a fallback.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the configuration the agent was built with.
    #[inline]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Returns the conversation history.
    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Returns the optional features of the backend.
    #[inline]
    pub fn capabilities(&self) -> ModelCapabilities {
        self.client.capabilities()
    }

    /// Returns the token usage reported by the backend so far.
    #[inline]
    pub fn usage(&self) -> Usage {
        self.client.usage()
    }

    /// Returns the number of model calls left in this session.
    #[inline]
    pub fn session_turns_left(&self) -> u32 {
        self.session_turns_left
    }

    /// Starts over: clears the transcript, restores the configured model
    /// and the session turn budget.
    pub fn reset(&mut self) {
        self.span.in_scope(|| info!("resetting the session"));
        self.model.clone_from(&self.config.model);
        self.session_turns_left = self.config.max_session_turns;
        self.seed_transcript();
    }

    /// Embeds `texts` with the backend's embedding model.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        with_retry(&self.config.retry, &mut (), |_| self.client.embed(texts), no_fallback)
            .instrument(self.span.clone())
            .await
    }

    /// Compresses the transcript if it is over the configured share of the
    /// context window, or unconditionally if `force` is set.
    ///
    /// Returns `None` if the transcript didn't change.
    pub async fn try_compress(
        &mut self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<CompressionRecord>, Error> {
        let span = self.span.clone();
        self.compress_transcript(force, cancel).instrument(span).await
    }

    async fn compress_transcript(
        &mut self,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<CompressionRecord>, Error> {
        let compressor = Compressor {
            client: &self.client,
            retry: &self.config.retry,
            model: &self.model,
            threshold: self.config.compression_threshold,
            context_window: self
                .config
                .context_window
                .unwrap_or_else(|| token_limit(&self.model)),
            environment: self.environment.as_ref(),
        };
        let compressed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = compressor.compress(self.transcript.messages(), force) => result?,
        };
        let Some((messages, record)) = compressed else {
            return Ok(None);
        };
        self.transcript.replace(messages)?;
        info!(
            "compressed the transcript from {} to {} tokens",
            record.original_token_count, record.new_token_count
        );
        Ok(Some(record))
    }

    /// Processes a user message until the model hands the conversation
    /// back, reporting progress through `on_event`.
    ///
    /// Cancelling `cancel` stops the message at the next chunk or between
    /// tool calls. A cancelled or failed message still leaves a consistent
    /// transcript behind, so the session can go on.
    pub async fn send_message<S: Into<String>>(
        &mut self,
        input: S,
        cancel: &CancellationToken,
        mut on_event: impl FnMut(AgentEvent) + Send,
    ) -> TurnOutcome {
        let span = self.span.clone();
        self.process_message(input.into(), cancel, &mut on_event)
            .instrument(span)
            .await
    }

    async fn process_message(
        &mut self,
        input: String,
        cancel: &CancellationToken,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> TurnOutcome {
        if self.session_turns_left == 0 {
            return session_limit_reached(on_event);
        }

        match self.compress_transcript(false, cancel).await {
            Ok(Some(record)) => on_event(AgentEvent::ChatCompressed(record)),
            Ok(None) => {}
            Err(Error::Cancelled) => return user_cancelled(on_event),
            Err(err) => warn!("skipped compression: {err}"),
        }

        debug!("user message: {input}");
        if let Err(err) = self.transcript.push(Message::user_text(input)) {
            return failed(err, on_event);
        }

        let mut iterations_left = self.config.max_tool_iterations;
        loop {
            if cancel.is_cancelled() {
                return user_cancelled(on_event);
            }
            if self.session_turns_left == 0 {
                return session_limit_reached(on_event);
            }
            if iterations_left == 0 {
                warn!(
                    "stopped after {} model calls for one message",
                    self.config.max_tool_iterations
                );
                return TurnOutcome::IterationLimitReached;
            }
            self.session_turns_left -= 1;
            iterations_left -= 1;

            let request = self.build_request();
            let response = match self.model_turn(request, cancel, on_event).await {
                Ok(response) => response,
                Err(Error::Cancelled) => return user_cancelled(on_event),
                Err(err) => return failed(err, on_event),
            };
            let TurnResponse {
                message,
                tool_calls,
                finish_reason,
                usage,
            } = response;
            debug!(?finish_reason, ?usage, "model turn finished");
            if !message.is_empty() {
                if let Err(err) = self.transcript.push(message) {
                    return failed(err, on_event);
                }
            }

            if tool_calls.is_empty() {
                match self.should_continue(cancel).await {
                    Ok(true) => {
                        debug!("model continues on its own");
                        if let Err(err) = self.transcript.push(Message::user_text(CONTINUE_PROMPT)) {
                            return failed(err, on_event);
                        }
                        continue;
                    }
                    Ok(false) => return TurnOutcome::Completed,
                    Err(_) => return user_cancelled(on_event),
                }
            }

            let (results, cancelled) = self.dispatch_tools(&tool_calls, cancel, on_event).await;
            let results = Message {
                role: Role::User,
                parts: results,
            };
            if let Err(err) = self.transcript.push(results) {
                return failed(err, on_event);
            }
            if cancelled {
                return user_cancelled(on_event);
            }
        }
    }

    fn build_request(&self) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages: self.transcript.messages().to_vec(),
            config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                system_instruction: self.config.system_instruction.clone(),
            },
            tools: self.tools.declarations(),
        }
    }

    async fn model_turn(
        &mut self,
        request: ModelRequest,
        cancel: &CancellationToken,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> Result<TurnResponse, Error> {
        let Self {
            client,
            config,
            model,
            on_fallback,
            ..
        } = self;
        let cx = TurnContext {
            client,
            retry: &config.retry,
            cancel,
        };
        let auth_type = config.auth_type;
        let fallback_model = &config.fallback_model;
        let on_persistent_rate_limit = |model: &mut String, err: &Error| {
            if auth_type != AuthType::Interactive || model == fallback_model {
                return false;
            }
            let Some(on_fallback) = on_fallback.as_mut() else {
                return false;
            };
            if !on_fallback(model.as_str(), fallback_model.as_str()) {
                info!("fallback to {fallback_model} declined");
                return false;
            }
            warn!("falling back from {model} to {fallback_model}: {err}");
            model.clone_from(fallback_model);
            true
        };
        run_turn(&cx, model, request, on_persistent_rate_limit, on_event).await
    }

    /// Returns `Err` only if cancelled.
    async fn should_continue(&self, cancel: &CancellationToken) -> Result<bool, Error> {
        if !self.config.next_speaker_check || !self.client.capabilities().structured_output {
            return Ok(false);
        }
        let check = check_next_speaker(&self.client, &self.config.retry, &self.model, &self.transcript);
        let speaker = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            speaker = check => speaker,
        };
        match speaker {
            Ok(speaker) => Ok(speaker == Some(NextSpeaker::Model)),
            Err(err) => {
                warn!("next speaker check failed: {err}");
                Ok(false)
            }
        }
    }

    /// Runs the calls in order and returns one result per call. The flag is
    /// set if the calls were cut short by cancellation.
    async fn dispatch_tools(
        &self,
        calls: &[ToolCallRequest],
        cancel: &CancellationToken,
        on_event: &mut (dyn FnMut(AgentEvent) + Send),
    ) -> (Vec<Part>, bool) {
        let mut parts = Vec::with_capacity(calls.len());
        for call in calls {
            let result = if cancel.is_cancelled() {
                // Pairs the call without running it.
                Err(tool::Error::cancelled())
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(tool::Error::cancelled()),
                    result = self.tools.execute(&call.name, call.args.clone(), cancel.clone()) => result,
                }
            };
            let (output, response) = match result {
                Ok(content) => (ToolOutput::Success(content.content), ToolCallResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    result_display: content.display,
                    error: None,
                }),
                Err(err) => {
                    debug!("tool `{}` failed: {err}", call.name);
                    (ToolOutput::Error(err.to_string()), ToolCallResponse::failed(call, &err))
                }
            };
            on_event(AgentEvent::ToolCallResponse(response));
            parts.push(Part::ToolResult(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            }));
        }
        (parts, cancel.is_cancelled())
    }
}

fn user_cancelled(on_event: &mut (dyn FnMut(AgentEvent) + Send)) -> TurnOutcome {
    info!("cancelled by the user");
    on_event(AgentEvent::UserCancelled);
    TurnOutcome::Cancelled
}

fn session_limit_reached(on_event: &mut (dyn FnMut(AgentEvent) + Send)) -> TurnOutcome {
    warn!("session turn limit reached");
    on_event(AgentEvent::MaxSessionTurnsReached);
    TurnOutcome::SessionLimitReached
}

fn failed(err: Error, on_event: &mut (dyn FnMut(AgentEvent) + Send)) -> TurnOutcome {
    error!("message failed: {err}");
    on_event(AgentEvent::Error(err.to_string()));
    TurnOutcome::Failed(err)
}
