//! CLI command handling
//!
//! Dispatches CLI commands to the daemon and formats output.

mod spawn;

use std::time::Duration;

use colored::Colorize;

use crate::commands::Commands;
use crate::common::{split_numeric_suffix, Error, Result};
use crate::ipc::protocol::{
    Breakpoint, ChannelEvent, CorrelationId, LookupKind, LookupResult, Role, TextPosition,
};
use crate::ipc::HostClient;
use crate::session::SessionState;

/// How long to wait for the host to acknowledge a command
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatch a CLI command on behalf of `user`
pub async fn dispatch(command: Commands, user: &str) -> Result<()> {
    match command {
        Commands::Daemon => {
            // Should never happen - daemon mode is handled in main
            unreachable!("Daemon command should be handled in main")
        }

        Commands::Status { project } => {
            let project_id = project.clone().unwrap_or_default();
            match HostClient::connect(user, &project_id, Role::Control).await {
                Ok(mut client) => {
                    println!("Daemon: {}", "running".green());
                    if project.is_some() {
                        client.send(&ChannelEvent::StatusRequest).await?;
                        let status = client
                            .recv_until(REPLY_TIMEOUT, |event| match event {
                                ChannelEvent::Status { status } => Some(status),
                                _ => None,
                            })
                            .await?;

                        println!("Project: {}", status.project_id);
                        println!("State: {}", paint_state(&status.state));
                        println!("Breakpoints: {}", status.breakpoints);
                        println!("Diagnostics: {}", status.diagnostics);
                        println!("Variables: {}", status.variables);
                        println!("Pending requests: {}", status.pending_requests);
                        println!("Cached results: {}", status.cached_results);
                    }
                }
                Err(Error::DaemonNotRunning) => {
                    println!("Daemon: not running");
                }
                Err(e) => return Err(e),
            }

            Ok(())
        }

        Commands::Break {
            project,
            location,
            condition,
        } => {
            let (file_id, line_number) = split_numeric_suffix(&location)
                .ok_or_else(|| Error::InvalidLocation(location.clone()))?;
            let file_id = file_id.to_string();

            let mut client = control(user, &project).await?;
            client
                .send(&ChannelEvent::ToggleBreakpoint {
                    file_id: file_id.clone(),
                    line_number,
                    condition,
                })
                .await?;

            let breakpoints = client
                .recv_until(REPLY_TIMEOUT, |event| match event {
                    ChannelEvent::BreakpointSetChanged {
                        file_id: changed,
                        breakpoints,
                    } if changed == file_id => Some(breakpoints),
                    _ => None,
                })
                .await?;

            match breakpoints.iter().find(|bp| bp.line_number == line_number) {
                Some(bp) => println!("Breakpoint {} set at {}:{}", bp.id, file_id, line_number),
                None => println!("Breakpoint at {}:{} removed", file_id, line_number),
            }
            for bp in &breakpoints {
                print_breakpoint(bp);
            }

            Ok(())
        }

        Commands::Enable { project, id } => set_enabled(user, &project, id, true).await,

        Commands::Disable { project, id } => set_enabled(user, &project, id, false).await,

        Commands::Complete {
            project,
            position,
            timeout,
        } => lookup(user, &project, LookupKind::Completion, &position, timeout).await,

        Commands::Hover {
            project,
            position,
            timeout,
        } => lookup(user, &project, LookupKind::Hover, &position, timeout).await,

        Commands::Definition {
            project,
            position,
            timeout,
        } => lookup(user, &project, LookupKind::Definition, &position, timeout).await,

        Commands::References {
            project,
            position,
            timeout,
        } => lookup(user, &project, LookupKind::Reference, &position, timeout).await,

        Commands::Send { to, message } => {
            let body = serde_json::from_str(&message)
                .unwrap_or(serde_json::Value::String(message));

            let mut client = control(user, "").await?;
            client
                .send(&ChannelEvent::DirectMessage {
                    to_user: to.clone(),
                    from_user: None,
                    body,
                })
                .await?;
            client.send(&ChannelEvent::StatusRequest).await?;

            let failure = client
                .recv_until(REPLY_TIMEOUT, |event| match event {
                    ChannelEvent::DeliveryFailed { error, .. } => Some(Some(error)),
                    ChannelEvent::Status { .. } => Some(None),
                    _ => None,
                })
                .await?;

            match failure {
                Some(error) => Err(Error::from(error)),
                None => {
                    println!("Message for {} accepted", to);
                    Ok(())
                }
            }
        }

        Commands::Watch { project } => {
            spawn::ensure_daemon_running().await?;
            let mut client = HostClient::connect(user, &project, Role::Editor).await?;
            eprintln!("Watching project '{}' as {}. Press Ctrl+C to stop.", project, user);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = client.recv() => {
                        let event = event?;
                        let json = serde_json::to_string(&event)?;
                        println!("{} {}", event.name().cyan().bold(), json);
                    }
                }
            }

            Ok(())
        }

        Commands::Dispose { project } => {
            let mut client = control(user, &project).await?;
            client.send(&ChannelEvent::SessionDispose).await?;
            client.send(&ChannelEvent::StatusRequest).await?;

            let mut disposed = false;
            client
                .recv_until(REPLY_TIMEOUT, |event| match event {
                    ChannelEvent::SessionDispose => {
                        disposed = true;
                        None
                    }
                    ChannelEvent::Status { .. } => Some(()),
                    _ => None,
                })
                .await?;

            if disposed {
                println!("Session for '{}' disposed", project);
            } else {
                println!("No active session for '{}'", project);
            }
            Ok(())
        }

        Commands::Shutdown => {
            match HostClient::connect(user, "", Role::Control).await {
                Ok(mut client) => {
                    client.send(&ChannelEvent::Shutdown).await?;
                    // The host closes the connection once it has stopped accepting work
                    let _ = client.recv_until(REPLY_TIMEOUT, |_| None::<()>).await;
                    println!("Daemon stopped");
                }
                Err(Error::DaemonNotRunning) => {
                    println!("Daemon is not running");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        }
    }
}

/// Connect as a short-lived control client, starting the host if needed
async fn control(user: &str, project: &str) -> Result<HostClient> {
    spawn::ensure_daemon_running().await?;
    HostClient::connect(user, project, Role::Control).await
}

async fn set_enabled(user: &str, project: &str, id: u32, enabled: bool) -> Result<()> {
    let mut client = control(user, project).await?;
    client
        .send(&ChannelEvent::SetBreakpointEnabled {
            breakpoint_id: id,
            enabled,
        })
        .await?;
    client.send(&ChannelEvent::StatusRequest).await?;

    // The host answers in order, so a change for this id arrives before the status
    let mut found = false;
    client
        .recv_until(REPLY_TIMEOUT, |event| match event {
            ChannelEvent::BreakpointSetChanged { breakpoints, .. } => {
                found |= breakpoints.iter().any(|bp| bp.id == id);
                None
            }
            ChannelEvent::Status { .. } => Some(()),
            _ => None,
        })
        .await?;

    if !found {
        return Err(Error::BreakpointNotFound { id });
    }
    println!(
        "Breakpoint {} {}",
        id,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

async fn lookup(
    user: &str,
    project: &str,
    kind: LookupKind,
    position: &str,
    timeout: u64,
) -> Result<()> {
    let position = TextPosition::parse(position)?;
    let mut client = control(user, project).await?;

    let correlation_id = CorrelationId::new();
    client
        .send(&ChannelEvent::lookup_request(kind, correlation_id.clone(), position))
        .await?;

    let answer = client
        .recv_until(Duration::from_secs(timeout), |event| {
            if let ChannelEvent::RequestFailed {
                correlation_id: failed,
                error,
            } = &event
            {
                return (failed == &correlation_id).then(|| Err(Error::from(error.clone())));
            }
            match event.as_lookup_response() {
                Some((id, result)) if id == &correlation_id => Some(Ok(result)),
                _ => None,
            }
        })
        .await?;

    print_lookup(&answer?);
    Ok(())
}

fn paint_state(state: &SessionState) -> colored::ColoredString {
    let text = state.to_string();
    match state {
        SessionState::Idle => text.normal(),
        SessionState::Running => text.green(),
        SessionState::Paused { .. } => text.yellow(),
        SessionState::Stopped => text.red(),
    }
}

fn print_breakpoint(bp: &Breakpoint) {
    let marker = if bp.enabled { "●".red() } else { "○".dimmed() };
    print!("  {} {} {}:{}", marker, bp.id, bp.file_id, bp.line_number);
    if let Some(condition) = &bp.condition {
        print!(" if {}", condition);
    }
    if bp.hit_count > 0 {
        print!(" (hit {} times)", bp.hit_count);
    }
    println!();
}

fn print_lookup(result: &LookupResult) {
    match result {
        LookupResult::Completions(items) if items.is_empty() => println!("No completions"),
        LookupResult::Completions(items) => {
            for item in items {
                match &item.detail {
                    Some(detail) => println!("  {} {}", item.label.bold(), detail.dimmed()),
                    None => println!("  {}", item.label.bold()),
                }
            }
        }
        LookupResult::Hover(None) => println!("No hover information"),
        LookupResult::Hover(Some(hover)) => {
            if let Some(type_name) = &hover.type_name {
                println!("{}", type_name.cyan());
            }
            println!("{}", hover.contents);
        }
        LookupResult::Definitions(locations) | LookupResult::References(locations) => {
            if locations.is_empty() {
                println!("No locations found");
            }
            for loc in locations {
                println!("  {}:{}:{}", loc.uri, loc.line, loc.character);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        colored::control::set_override(false);
        assert_eq!(paint_state(&SessionState::Idle).to_string(), "idle");
        assert_eq!(paint_state(&SessionState::Stopped).to_string(), "stopped");
        let paused = SessionState::Paused {
            file_id: "src/main.rs".into(),
            line_number: 4,
        };
        assert_eq!(paint_state(&paused).to_string(), "paused at src/main.rs:4");
    }
}
