//! Starting the session host on demand
//!
//! The host is this same binary run with the hidden `daemon` subcommand.
//! A host only counts as up once it has accepted a hello and answered a
//! status request; a socket file left behind by a crashed host does not.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::common::{paths, Error, Result};
use crate::ipc::protocol::{ChannelEvent, Role};
use crate::ipc::HostClient;

/// How long a freshly spawned host has to answer
const SPAWN_TIMEOUT_SECS: u64 = 5;

/// Delay between readiness checks while the host starts
const READY_POLL: Duration = Duration::from_millis(50);

/// How long a single readiness check waits for the status reply
const READY_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity used for readiness checks; it never joins a project
const READY_USER: &str = "collab-debug";

/// Make sure a host is answering, starting one if nothing listens
pub async fn ensure_daemon_running() -> Result<()> {
    match host_answers().await {
        Ok(()) => Ok(()),
        Err(Error::DaemonNotRunning) => spawn_daemon().await,
        Err(e) => Err(e),
    }
}

/// Say hello as a control client and wait for a status reply
async fn host_answers() -> Result<()> {
    let mut client = HostClient::connect(READY_USER, "", Role::Control).await?;
    client.send(&ChannelEvent::StatusRequest).await?;
    client
        .recv_until(READY_REPLY_TIMEOUT, |event| {
            matches!(event, ChannelEvent::Status { .. }).then_some(())
        })
        .await
}

/// Build the detached `daemon` command for `exe`
fn host_command(exe: &Path) -> Command {
    let mut command = Command::new(exe);
    // The host writes its own log file
    command
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x00000008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    command
}

async fn spawn_daemon() -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| Error::Internal(format!("Failed to locate own executable: {}", e)))?;

    // Nothing answered, so whatever socket is there belongs to a dead host
    paths::ensure_socket_dir()?;
    paths::remove_socket()?;

    let child = host_command(&exe)
        .spawn()
        .map_err(|e| Error::Internal(format!("Failed to spawn session host: {}", e)))?;
    tracing::debug!(pid = child.id(), exe = %exe.display(), "Spawned session host");

    let deadline = Instant::now() + Duration::from_secs(SPAWN_TIMEOUT_SECS);
    loop {
        tokio::time::sleep(READY_POLL).await;

        match host_answers().await {
            Ok(()) => {
                tracing::debug!("Session host is answering");
                return Ok(());
            }
            Err(e) if Instant::now() >= deadline => {
                tracing::debug!(error = %e, "Session host never answered");
                return Err(Error::DaemonSpawnTimeout(SPAWN_TIMEOUT_SECS));
            }
            Err(_) => continue,
        }
    }
}
