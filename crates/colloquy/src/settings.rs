//! Settings that select and configure the model provider.

use std::fmt::{self, Debug, Formatter};

use colloquy_core::{AgentConfig, AuthType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors of turning settings into a session.
#[derive(Debug, Error)]
pub enum Error {
    /// The provider has no usable credential.
    #[error("no credential configured for {0}")]
    MissingCredential(&'static str),
}

/// Everything needed to start a session.
///
/// Hosts load it from whatever source they use, the library never reads
/// environment variables or files by itself.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// The backend to talk to.
    pub provider: ProviderSettings,
    /// Options of the conversation.
    #[serde(default)]
    pub agent: AgentConfig,
}

/// The backend and its credentials, tagged by `provider`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum ProviderSettings {
    /// The Gemini API.
    #[serde(rename = "gemini")]
    Gemini(GeminiSettings),
    /// An OpenAI-compatible chat completions API.
    #[serde(rename = "openai")]
    OpenAI(OpenAISettings),
}

/// Settings of the Gemini API. Exactly one of `api_key` and `access_token`
/// should be set, the API key wins if both are.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    /// A raw API key.
    pub api_key: Option<String>,
    /// An OAuth access token from an interactive login.
    pub access_token: Option<String>,
    /// Overrides the default endpoint.
    pub base_url: Option<String>,
    /// Overrides the default embedding model.
    pub embedding_model: Option<String>,
}

/// Settings of an OpenAI-compatible API.
#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAISettings {
    /// The API key.
    pub api_key: String,
    /// Overrides the default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the default embedding model.
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl ProviderSettings {
    /// Returns how the session authenticates with these settings.
    ///
    /// Only sessions that went through an interactive login may fall back
    /// to a cheaper model.
    pub fn auth_type(&self) -> AuthType {
        match self {
            ProviderSettings::Gemini(GeminiSettings {
                api_key: None,
                access_token: Some(_),
                ..
            }) => AuthType::Interactive,
            _ => AuthType::ApiKey,
        }
    }
}

#[inline]
fn redact(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl Debug for ProviderSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProviderSettings::Gemini(settings) => f
                .debug_struct("Gemini")
                .field("api_key", &redact(&settings.api_key))
                .field("access_token", &redact(&settings.access_token))
                .field("base_url", &settings.base_url)
                .field("embedding_model", &settings.embedding_model)
                .finish(),
            ProviderSettings::OpenAI(settings) => f
                .debug_struct("OpenAI")
                .field("api_key", &"<redacted>")
                .field("base_url", &settings.base_url)
                .field("embedding_model", &settings.embedding_model)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_deserialize() {
        let settings: Settings = serde_json::from_value(json!({
            "provider": {
                "provider": "gemini",
                "access_token": "ya29.secret"
            },
            "agent": { "model": "gemini-2.5-pro", "max_tool_iterations": 5 }
        }))
        .unwrap();
        assert_eq!(settings.provider.auth_type(), AuthType::Interactive);
        assert_eq!(settings.agent.max_tool_iterations, 5);
        assert_eq!(settings.agent.max_session_turns, 100);

        let provider: ProviderSettings = serde_json::from_value(json!({
            "provider": "openai",
            "api_key": "sk-secret",
            "base_url": "http://localhost:8080/v1"
        }))
        .unwrap();
        assert_eq!(provider.auth_type(), AuthType::ApiKey);
        let debug = format!("{provider:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("localhost:8080"));
    }
}
