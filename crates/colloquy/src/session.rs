use std::path::PathBuf;

use chrono::Local;
use colloquy_core::{
    Agent, AgentBuilder, AgentConfig, AgentEvent, CancellationToken, CompressionRecord,
    EnvironmentContext, Error as CoreError, TurnOutcome,
};
use colloquy_gemini_model::{GeminiConfigBuilder, GeminiProvider};
use colloquy_model::ModelProvider;
use colloquy_openai_model::{OpenAIConfigBuilder, OpenAIProvider};

use crate::settings::{Error, GeminiSettings, ProviderSettings, Settings};
use crate::tools::*;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    agent_builder: AgentBuilder,
    config: AgentConfig,
    working_dir: Option<PathBuf>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        let agent_builder = AgentBuilder::with_model_provider(provider);
        Self {
            agent_builder,
            config: AgentConfig::default(),
            working_dir: None,
        }
    }

    /// Creates a session builder with the provider and options described by
    /// `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self, Error> {
        let Settings {
            provider,
            agent: mut config,
        } = settings;
        config.auth_type = provider.auth_type();
        debug!(auth_type = ?config.auth_type, "creating a session from {provider:?}");

        let builder = match provider {
            ProviderSettings::Gemini(GeminiSettings {
                api_key,
                access_token,
                base_url,
                embedding_model,
            }) => {
                let mut config_builder = match (api_key, access_token) {
                    (Some(api_key), _) => GeminiConfigBuilder::with_api_key(api_key),
                    (None, Some(token)) => GeminiConfigBuilder::with_access_token(token),
                    (None, None) => return Err(Error::MissingCredential("gemini")),
                };
                if let Some(base_url) = base_url {
                    config_builder = config_builder.with_base_url(base_url);
                }
                if let Some(model) = embedding_model {
                    config_builder = config_builder.with_embedding_model(model);
                }
                Self::with_model_provider(GeminiProvider::new(config_builder.build()))
            }
            ProviderSettings::OpenAI(settings) => {
                if settings.api_key.is_empty() {
                    return Err(Error::MissingCredential("openai"));
                }
                let mut config_builder = OpenAIConfigBuilder::with_api_key(settings.api_key);
                if let Some(base_url) = settings.base_url {
                    config_builder = config_builder.with_base_url(base_url);
                }
                if let Some(model) = settings.embedding_model {
                    config_builder = config_builder.with_embedding_model(model);
                }
                Self::with_model_provider(OpenAIProvider::new(config_builder.build()))
            }
        };
        Ok(builder.with_config(config))
    }

    /// Sets the options of the conversation.
    #[inline]
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the system prompt for the model.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.system_instruction = Some(prompt.into());
        self
    }

    /// Tells the model which directory the user works in.
    #[inline]
    pub fn with_working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Attaches a callback that is asked before falling back to a cheaper
    /// model.
    #[inline]
    pub fn on_fallback(
        mut self,
        on_fallback: impl FnMut(&str, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.agent_builder = self.agent_builder.on_fallback(on_fallback);
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        let mut agent_builder = self
            .agent_builder
            .with_config(self.config)
            .with_tool(ListFilesTool::new());
        if let Some(working_dir) = self.working_dir {
            debug!("session works in {}", working_dir.display());
            agent_builder = agent_builder.with_environment(EnvironmentContext {
                working_dir,
                date: Local::now().format("%A, %B %-d, %Y").to_string(),
                platform: host_os().to_owned(),
                full_context: None,
            });
        }

        Session {
            agent: agent_builder.build(),
        }
    }
}

/// A chat session, like a window that displays messages and has a input box.
///
/// The session holds a fully configured agent that you can use directly, and it
/// is basically a wrapper around [`Agent`].
pub struct Session {
    agent: Agent,
}

impl Session {
    /// Sends a message to the session and waits until the model hands the
    /// conversation back.
    #[inline]
    pub async fn send_message(
        &mut self,
        message: &str,
        cancel: &CancellationToken,
        on_event: impl FnMut(AgentEvent) + Send,
    ) -> TurnOutcome {
        self.agent.send_message(message, cancel, on_event).await
    }

    /// Summarizes the conversation so far, regardless of its length.
    #[inline]
    pub async fn compress(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<CompressionRecord>, CoreError> {
        self.agent.try_compress(true, cancel).await
    }

    /// Starts a new conversation.
    #[inline]
    pub fn reset(&mut self) {
        self.agent.reset();
    }

    /// Returns the underlying agent.
    #[inline]
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[inline]
fn host_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        _ => "some other OS",
    }
}
