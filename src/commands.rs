//! CLI command definitions
//!
//! Defines the clap commands for the collab-debug CLI.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Show whether the host is running, and a project's session state
    Status {
        /// Project to report on
        project: Option<String>,
    },

    /// Toggle a breakpoint: adds one at file:line, or removes the one there
    #[command(alias = "b")]
    Break {
        /// Project the file belongs to
        project: String,

        /// Location: file:line
        location: String,

        /// Condition attached when the breakpoint is created
        #[arg(long, short)]
        condition: Option<String>,
    },

    /// Enable a breakpoint
    Enable {
        project: String,

        /// Breakpoint ID
        id: u32,
    },

    /// Disable a breakpoint without removing it
    Disable {
        project: String,

        /// Breakpoint ID
        id: u32,
    },

    /// Ask the backend for completions at uri:line:character
    Complete {
        project: String,
        position: String,

        /// Seconds to wait for the answer
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Ask the backend what is under uri:line:character
    Hover {
        project: String,
        position: String,

        /// Seconds to wait for the answer
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Find where the symbol at uri:line:character is defined
    Definition {
        project: String,
        position: String,

        /// Seconds to wait for the answer
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Find references to the symbol at uri:line:character
    References {
        project: String,
        position: String,

        /// Seconds to wait for the answer
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Send a message to a user; it is parked if they are offline
    Send {
        /// Recipient user ID
        to: String,

        /// Message body: JSON, or plain text
        message: String,
    },

    /// Stream a project's events, after any messages parked for you
    Watch {
        project: String,
    },

    /// Tear down a project's session
    Dispose {
        project: String,
    },

    /// Stop the host daemon
    Shutdown,

    /// [Internal] Run as the session host daemon
    #[command(hide = true)]
    Daemon,
}
