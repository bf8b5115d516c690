//! A ready-to-use conversation session that assembles a model provider, the
//! conversation core, and a few built-in tools.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring conversations into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
mod settings;
pub mod tools;

pub use session::{Session, SessionBuilder};
pub use settings::{Error, GeminiSettings, OpenAISettings, ProviderSettings, Settings};

/// Re-exports of [`colloquy_core`] crate.
pub mod core {
    pub use colloquy_core::*;
}
