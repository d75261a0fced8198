//! collab-debug - a shared debugging and editing session host
//!
//! Editors, the language backend and this CLI all talk to one background
//! host over a local socket. The host keeps each project's breakpoints,
//! variables and diagnostics in sync, and parks messages for offline users.

use clap::Parser;
use collab_debug::common::logging;
use collab_debug::{cli, commands, daemon};
use commands::Commands;

#[derive(Parser)]
#[command(name = "collab-debug", about = "Shared debugging sessions for collaborative editors")]
#[command(version, long_about = None)]
struct Cli {
    /// User to act as (defaults to $USER)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

fn current_user(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon => {
            let log = logging::init_daemon();
            if let Some(path) = &log.path {
                tracing::info!(path = %path.display(), "Writing daemon log");
            }
            daemon::run().await
        }
        command => {
            logging::init_cli();
            cli::dispatch(command, &current_user(cli.user)).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
