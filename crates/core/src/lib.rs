//! The conversation core: transcript management, the loop of model calls
//! and tool executions, retries, compression, and configuration.
//!
//! Everything backend-specific is behind
//! [`ModelProvider`](colloquy_model::ModelProvider), so the core drives a
//! conversation the same way whatever wire contract is in use.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
mod compression;
mod config;
mod environment;
mod error;
mod event;
mod model_client;
mod next_speaker;
mod prompts;
pub mod retry;
mod token_limit;
pub mod tool;
mod transcript;
mod turn;

pub use agent::{Agent, AgentBuilder, FallbackHook};
pub use config::{AgentConfig, AuthType, RetryOptions};
pub use environment::EnvironmentContext;
pub use error::Error;
pub use event::{AgentEvent, CompressionRecord, ToolCallResponse, TurnOutcome};
pub use token_limit::{DEFAULT_TOKEN_LIMIT, token_limit};
pub use tokio_util::sync::CancellationToken;
pub use transcript::Transcript;
