//! Event channel between editors, the host and backends
//!
//! Uses Unix domain sockets on Unix/macOS and named pipes on Windows
//! via the interprocess crate.

pub mod channel;
pub mod client;
pub mod protocol;
pub mod transport;

pub use channel::{MemoryTransport, Recipient, Transport};
pub use client::HostClient;
