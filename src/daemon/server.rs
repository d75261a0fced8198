//! Daemon server - IPC listener and main event loop

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::traits::tokio::Listener as ListenerTrait;
use tokio::io::BufReader;
use tokio::time::Instant;

use crate::common::{config::Config, paths, Result};
use crate::ipc::protocol::{ChannelEvent, Role};
use crate::ipc::{transport, Recipient, Transport};
use crate::queue::build_queue;

use super::handler::{self, Flow, HostContext};

/// How long a new connection has to send its hello
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Housekeeping interval: request timeouts and idle accounting
const TICK: Duration = Duration::from_secs(1);

/// Main daemon server
pub struct Daemon {
    ctx: Arc<HostContext>,
}

impl Daemon {
    /// Create a daemon from the user's configuration file
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Ok(Self::with_config(config))
    }

    pub fn with_config(config: Config) -> Self {
        let queue = build_queue(&config.queue);
        Self {
            ctx: Arc::new(HostContext::new(config, queue)),
        }
    }

    /// Run the daemon main loop
    pub async fn run(&self) -> Result<()> {
        let listener = transport::create_listener().await?;
        tracing::info!("Daemon listening on {}", paths::socket_name());

        let idle_timeout = Duration::from_secs(self.ctx.config.daemon.idle_timeout_minutes * 60);
        let mut signals = Signals::new()?;
        let mut tick = tokio::time::interval(TICK);
        let mut idle_since = Instant::now();

        loop {
            tokio::select! {
                name = signals.recv() => {
                    tracing::info!("Received {}, shutting down gracefully", name);
                    break;
                }
                _ = self.ctx.shutdown.notified() => {
                    tracing::info!("Shutdown requested, exiting");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(stream) => {
                            tokio::spawn(serve_connection(self.ctx.clone(), stream));
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = tick.tick() => {
                    let now = Instant::now();
                    let reaped = self.ctx.sessions.reap_expired(now).await;
                    if reaped > 0 {
                        tracing::debug!(reaped, "Timed out pending lookups");
                    }

                    if !self.ctx.hub.is_empty() {
                        idle_since = now;
                    } else if now.duration_since(idle_since) > idle_timeout {
                        tracing::info!("Idle timeout reached, shutting down daemon");
                        break;
                    }
                }
            }
        }

        tracing::info!("Cleaning up daemon resources");
        self.ctx.sessions.dispose_all().await;

        paths::remove_socket()?;
        tracing::info!("Daemon shutdown complete");

        Ok(())
    }
}

/// Serve one client connection until it closes
async fn serve_connection(ctx: Arc<HostContext>, stream: transport::platform::Stream) {
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let hello = tokio::time::timeout(HANDSHAKE_TIMEOUT, transport::recv_event(&mut reader)).await;
    let (user_id, project_id, role) = match hello {
        Ok(Ok(ChannelEvent::Hello {
            user_id,
            project_id,
            role,
        })) => (user_id, project_id, role),
        Ok(Ok(other)) => {
            tracing::warn!(event = other.name(), "Connection did not start with hello; closing");
            return;
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Connection closed during handshake");
            return;
        }
        Err(_) => {
            tracing::debug!("Handshake timed out");
            return;
        }
    };

    let (peer, mut outbox) = ctx.hub.register(&user_id, &project_id, role);

    let writer_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            if let Err(e) = transport::send_event(&mut writer, &event).await {
                tracing::debug!(error = %e, "Write failed; dropping connection output");
                break;
            }
        }
    });

    if role == Role::Editor {
        let me = Recipient::Client(peer.id);
        ctx.dispatcher.flush_offline(&user_id, &me).await;

        // Bring a late joiner up to date
        if let Some(session) = ctx.sessions.get(&project_id).await {
            let session = session.lock().await;
            let mut files: Vec<&str> = session
                .breakpoints()
                .iter()
                .map(|bp| bp.file_id.as_str())
                .collect();
            files.sort_unstable();
            files.dedup();
            for file_id in files {
                let _ = ctx.hub.send(
                    &me,
                    &ChannelEvent::BreakpointSetChanged {
                        file_id: file_id.to_string(),
                        breakpoints: session.breakpoints().file(file_id).to_vec(),
                    },
                );
            }
            let _ = ctx.hub.send(
                &me,
                &ChannelEvent::Decorations {
                    decorations: session.decorations().clone(),
                },
            );
        }
    }

    loop {
        match transport::recv_event(&mut reader).await {
            Ok(event) => {
                if handler::handle_event(&ctx, &peer, event).await == Flow::Shutdown {
                    ctx.shutdown.notify_one();
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(client = peer.id, "Client disconnected");
                break;
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(client = peer.id, error = %e, "Ignoring malformed frame");
            }
            Err(e) => {
                tracing::error!(client = peer.id, "Error reading event: {}", e);
                break;
            }
        }
    }

    ctx.hub.unregister(peer.id);
    let cancelled = ctx.sessions.cancel_client(peer.id).await;
    if cancelled > 0 {
        tracing::debug!(client = peer.id, cancelled, "Dropped lookups nobody waits for");
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), writer_task).await;
}

/// Termination signals the daemon reacts to
#[cfg(unix)]
struct Signals {
    term: tokio::signal::unix::Signal,
    int: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            term: signal(SignalKind::terminate())?,
            int: signal(SignalKind::interrupt())?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.term.recv() => "SIGTERM",
            _ = self.int.recv() => "SIGINT (Ctrl+C)",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}
