//! collab-debug - a shared debugging and editing session host
//!
//! One host process keeps a debugging session per project: breakpoints,
//! live variables and syntax diagnostics, fanned out to every editor. It
//! correlates completion/hover/definition/reference lookups with the
//! language backend and parks direct messages for users who are offline.

pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod ipc;
pub mod queue;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use ipc::protocol::ChannelEvent;
