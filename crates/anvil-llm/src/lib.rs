//! Chat backend contract for anvil.
//!
//! The agent loop only ever talks to a model through [`ChatBackend`]. This crate
//! holds that trait, the transcript types it consumes, the error taxonomy it
//! reports, and an HTTP implementation for OpenAI-compatible chat servers.

pub mod backend;
pub mod errors;
pub mod http;
pub mod testing;
pub mod types;

pub use backend::*;
pub use errors::*;
pub use http::*;
pub use types::*;
