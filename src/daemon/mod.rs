//! Daemon mode - background process hosting collaborative sessions
//!
//! The daemon is spawned automatically by CLI commands. Editors and backends
//! connect to it over a local socket; it owns one session per project and
//! routes events between them.

pub mod handler;
pub mod hub;
mod server;

use crate::common::Result;

pub use handler::{handle_event, Flow, HostContext};
pub use hub::{Hub, Peer};

/// Run in daemon mode
///
/// This is the entry point when the binary is invoked with the hidden `daemon` command.
/// The daemon:
/// 1. Creates an IPC socket/pipe for client connections
/// 2. Performs the hello handshake and registers each connection
/// 3. Routes events to sessions, the correlator and the offline queue
/// 4. Times out stale lookups and exits when idle
pub async fn run() -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting session host daemon"
    );

    let daemon = server::Daemon::new().await?;
    daemon.run().await
}
