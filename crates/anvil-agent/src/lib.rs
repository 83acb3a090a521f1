//! Agent loop and tool-execution engine for anvil.
//!
//! A run takes one user message, asks the chat backend for the next action,
//! executes that action inside a sandboxed workspace, feeds the observation
//! back, and repeats until the model answers or the step limit is reached.
//! Filesystem mutations are staged in a [`ChangeBuffer`] unless auto-apply is on.

pub mod changes;
pub mod config;
pub mod errors;
pub mod events;
pub mod parser;
pub mod prompts;
pub mod session;
pub mod tools;
pub mod truncation;
pub mod turn;
pub mod workspace;

pub use changes::*;
pub use config::*;
pub use errors::*;
pub use events::*;
pub use parser::*;
pub use prompts::*;
pub use session::*;
pub use tools::*;
pub use truncation::*;
pub use turn::*;
pub use workspace::*;
