//! HTTP plumbing shared by the provider adapters: streaming byte chunks,
//! server-sent events, and mapping of transport failures onto
//! [`ErrorKind`].

#[macro_use]
extern crate tracing;

mod chunks;
mod sse;
mod status;

pub use chunks::{Chunks, Error as ChunksError};
pub use sse::{Error as SseError, Sse};
pub use status::{
    check_response, error_kind_for_reqwest, error_kind_for_status,
    is_event_stream,
};

#[doc(no_inline)]
pub use colloquy_model::ErrorKind;
