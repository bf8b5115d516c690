//! An abstraction layer for different LLM backends.
//!
//! This crate establishes an unified protocol for the conversation core to
//! interact with various supported backends, so that the core can drive a
//! conversation without knowing which wire contract is behind it.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. The only exception
//! is [`estimate_token_count`], the shared fallback for backends that have
//! no token counting endpoint.
//!
//! Provider implementations should live in their own crates.

#![deny(missing_docs)]

mod error;
mod message;
mod provider;
mod request;
mod response;
mod tokens;

pub use error::*;
pub use message::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use tokens::*;
