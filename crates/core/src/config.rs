//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the session authenticated with the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// A raw API key. Model fallback never applies.
    #[default]
    ApiKey,
    /// An interactive login flow.
    Interactive,
}

/// Options of the retry policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of a single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Randomization factor applied to every delay. Values above `1/3`
    /// are clamped, so delays never decrease.
    pub jitter: f64,
}

impl RetryOptions {
    /// Returns the delay before the first retry.
    #[inline]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Returns the upper bound of a single delay.
    #[inline]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.3,
        }
    }
}

/// Configuration of an [`Agent`](crate::Agent).
///
/// Every field has a default, so hosts can deserialize partial settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// The model used when the session starts.
    pub model: String,
    /// The model to downgrade to on persistent rate limiting.
    pub fallback_model: String,
    /// How the session authenticated.
    pub auth_type: AuthType,
    /// Sampling temperature, the backend default if unset.
    pub temperature: Option<f32>,
    /// Output token limit of a single response.
    pub max_output_tokens: Option<u32>,
    /// System instruction sent with every request.
    pub system_instruction: Option<String>,
    /// Model calls allowed until the session is reset.
    pub max_session_turns: u32,
    /// Model calls allowed for one user message.
    pub max_tool_iterations: u32,
    /// Fraction of the context window that triggers compression.
    pub compression_threshold: f64,
    /// Overrides the context window derived from the model name.
    pub context_window: Option<u64>,
    /// Whether to ask the model who speaks next after a text-only turn.
    pub next_speaker_check: bool,
    /// Retry policy of model calls.
    pub retry: RetryOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-pro".to_owned(),
            fallback_model: "gemini-2.5-flash".to_owned(),
            auth_type: AuthType::ApiKey,
            temperature: None,
            max_output_tokens: None,
            system_instruction: None,
            max_session_turns: 100,
            max_tool_iterations: 10,
            compression_threshold: 0.7,
            context_window: None,
            next_speaker_check: true,
            retry: RetryOptions::default(),
        }
    }
}
