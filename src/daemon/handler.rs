//! Event routing for the session host
//!
//! Translates inbound channel events into session, correlator and
//! dispatcher operations.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::common::config::Config;
use crate::common::error::WireError;
use crate::ipc::protocol::{ChannelEvent, Role, SessionStatus};
use crate::ipc::{Recipient, Transport};
use crate::queue::Dispatcher;
use crate::session::SessionRegistry;

use super::hub::{Hub, Peer};

/// Shared state of a running host
pub struct HostContext {
    pub hub: Arc<Hub>,
    pub sessions: SessionRegistry,
    pub dispatcher: Dispatcher,
    pub config: Config,
    pub shutdown: Notify,
}

impl HostContext {
    pub fn new(config: Config, queue: crate::queue::QueueHandle) -> Self {
        let hub = Arc::new(Hub::new());
        let sessions = SessionRegistry::new(
            hub.clone(),
            config.requests.timeout(),
            config.cache.max_entries,
        );
        let dispatcher = Dispatcher::new(hub.clone(), queue);

        Self {
            hub,
            sessions,
            dispatcher,
            config,
            shutdown: Notify::new(),
        }
    }

    fn reply(&self, peer: &Peer, event: &ChannelEvent) {
        if let Err(e) = self.hub.send(&Recipient::Client(peer.id), event) {
            tracing::debug!(client = peer.id, event = event.name(), error = %e, "Reply dropped");
        }
    }

    fn forward_to_backend(&self, peer: &Peer, event: &ChannelEvent) {
        let to = Recipient::Backend(peer.project_id.clone());
        if let Err(e) = self.hub.send(&to, event) {
            tracing::warn!(event = event.name(), error = %e, "Failed to forward to backend");
        }
    }
}

/// What the connection loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// Handle one event from an established connection
pub async fn handle_event(ctx: &Arc<HostContext>, peer: &Peer, event: ChannelEvent) -> Flow {
    tracing::trace!(client = peer.id, event = event.name(), "Received");

    if let Some((kind, correlation_id, position)) = event.as_lookup_request() {
        if peer.role == Role::Backend {
            tracing::debug!(client = peer.id, %kind, "Ignoring lookup request from backend");
            return Flow::Continue;
        }

        let session = ctx.sessions.get_or_create(&peer.project_id).await;
        let reply = session
            .lock()
            .await
            .request(kind, position.clone(), Some(peer.id));

        let ctx = ctx.clone();
        let peer = peer.clone();
        let correlation_id = correlation_id.clone();
        tokio::spawn(async move {
            let answer = match reply.resolve().await {
                Ok(result) => ChannelEvent::lookup_response(correlation_id, result),
                Err(e) => ChannelEvent::RequestFailed {
                    correlation_id,
                    error: WireError::from(&e),
                },
            };
            ctx.reply(&peer, &answer);
        });
        return Flow::Continue;
    }

    if let Some((correlation_id, result)) = event.as_lookup_response() {
        if let Some(session) = ctx.sessions.get(&peer.project_id).await {
            session.lock().await.on_lookup_response(correlation_id, result);
        }
        return Flow::Continue;
    }

    match event {
        ChannelEvent::Hello { .. } => {
            tracing::warn!(client = peer.id, "Ignoring repeated hello");
        }

        // === Breakpoints ===
        ChannelEvent::ToggleBreakpoint {
            file_id,
            line_number,
            condition,
        } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session
                .lock()
                .await
                .toggle_breakpoint_with(&file_id, line_number, condition);
        }

        ChannelEvent::SetBreakpointEnabled {
            breakpoint_id,
            enabled,
        } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session
                .lock()
                .await
                .set_breakpoint_enabled(breakpoint_id, enabled);
        }

        ChannelEvent::BreakpointHit { breakpoint_id } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session.lock().await.on_breakpoint_hit(breakpoint_id);
        }

        // === Editing state ===
        ChannelEvent::VariablesRequest { .. } => {
            ctx.forward_to_backend(peer, &event);
        }

        ChannelEvent::VariableUpdate { file_id, variables } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session.lock().await.on_variable_update(&file_id, variables);
        }

        ChannelEvent::SyntaxErrors { file_id, errors } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session.lock().await.on_syntax_errors(&file_id, errors);
        }

        ChannelEvent::Edit {
            file_id,
            version,
            changes,
        } => {
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            session
                .lock()
                .await
                .on_edit(&file_id, version, changes, Some(peer.id));
        }

        ChannelEvent::RequestFailed {
            correlation_id,
            error,
        } => {
            if let Some(session) = ctx.sessions.get(&peer.project_id).await {
                session
                    .lock()
                    .await
                    .on_lookup_failed(&correlation_id, &error.message);
            }
        }

        // === Lifecycle ===
        ChannelEvent::DebugStart
        | ChannelEvent::DebugResume
        | ChannelEvent::DebugStep
        | ChannelEvent::DebugStop => {
            if peer.role != Role::Backend {
                ctx.forward_to_backend(peer, &event);
            }
            let session = ctx.sessions.get_or_create(&peer.project_id).await;
            let mut session = session.lock().await;
            match event {
                ChannelEvent::DebugStart => session.on_debug_start(),
                ChannelEvent::DebugResume => session.on_debug_resume(),
                ChannelEvent::DebugStep => session.on_debug_step(),
                _ => session.on_debug_stop(),
            };
        }

        ChannelEvent::SessionDispose => {
            if ctx.sessions.dispose(&peer.project_id).await && peer.role != Role::Backend {
                ctx.forward_to_backend(peer, &event);
            }
        }

        ChannelEvent::StatusRequest => {
            let status = match ctx.sessions.get(&peer.project_id).await {
                Some(session) => session.lock().await.status(),
                None => SessionStatus::empty(&peer.project_id),
            };
            ctx.reply(peer, &ChannelEvent::Status { status });
        }

        ChannelEvent::Shutdown => {
            tracing::info!(client = peer.id, "Shutdown requested");
            return Flow::Shutdown;
        }

        // === Messaging ===
        ChannelEvent::DirectMessage { to_user, body, .. } => {
            let message = ChannelEvent::DirectMessage {
                to_user: to_user.clone(),
                from_user: Some(peer.user_id.clone()),
                body,
            };
            if let Err(e) = ctx.dispatcher.send_to_user(&to_user, &message).await {
                tracing::warn!(to_user = %to_user, error = %e, "Message could not be delivered or parked");
                ctx.reply(
                    peer,
                    &ChannelEvent::DeliveryFailed {
                        to_user,
                        error: WireError::from(&e),
                    },
                );
            }
        }

        // Host-authored events; clients never send these
        ChannelEvent::BreakpointSetChanged { .. }
        | ChannelEvent::Decorations { .. }
        | ChannelEvent::Status { .. }
        | ChannelEvent::DeliveryFailed { .. } => {
            tracing::debug!(client = peer.id, event = event.name(), "Ignoring host-only event");
        }

        // Handled above
        ChannelEvent::CompletionRequest { .. }
        | ChannelEvent::HoverRequest { .. }
        | ChannelEvent::DefinitionRequest { .. }
        | ChannelEvent::ReferenceRequest { .. }
        | ChannelEvent::CompletionResponse { .. }
        | ChannelEvent::HoverResponse { .. }
        | ChannelEvent::DefinitionResponse { .. }
        | ChannelEvent::ReferenceResponse { .. } => {}
    }

    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::ipc::protocol::{CompletionItem, CorrelationId, TextPosition};
    use crate::queue::MemoryQueue;

    fn context() -> Arc<HostContext> {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        Arc::new(HostContext::new(Config::default(), queue))
    }

    fn connect(ctx: &HostContext, user: &str, role: Role) -> (Peer, UnboundedReceiver<ChannelEvent>) {
        ctx.hub.register(user, "demo", role)
    }

    fn drain(rx: &mut UnboundedReceiver<ChannelEvent>) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_lookup_round_trip_uses_client_correlation_id() {
        let ctx = context();
        let (editor, mut editor_rx) = connect(&ctx, "alice", Role::Editor);
        let (backend, mut backend_rx) = connect(&ctx, "agent", Role::Backend);

        let client_id = CorrelationId::from("client-1");
        handle_event(
            &ctx,
            &editor,
            ChannelEvent::CompletionRequest {
                correlation_id: client_id.clone(),
                position: TextPosition::new("a.rs", 1, 2),
            },
        )
        .await;

        let request = backend_rx.recv().await.unwrap();
        let (_, host_id, _) = request.as_lookup_request().unwrap();
        assert_ne!(host_id, &client_id);

        let items = vec![CompletionItem {
            label: "println!".into(),
            kind: None,
            detail: None,
            insert_text: None,
        }];
        handle_event(
            &ctx,
            &backend,
            ChannelEvent::CompletionResponse {
                correlation_id: host_id.clone(),
                items: items.clone(),
            },
        )
        .await;

        let answer = editor_rx.recv().await.unwrap();
        assert_eq!(
            answer,
            ChannelEvent::CompletionResponse {
                correlation_id: client_id,
                items
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_without_backend_fails_fast() {
        let ctx = context();
        let (editor, mut editor_rx) = connect(&ctx, "alice", Role::Editor);

        handle_event(
            &ctx,
            &editor,
            ChannelEvent::HoverRequest {
                correlation_id: CorrelationId::from("h1"),
                position: TextPosition::new("a.rs", 1, 2),
            },
        )
        .await;

        let ChannelEvent::RequestFailed { correlation_id, error } = editor_rx.recv().await.unwrap() else {
            panic!("expected request-failed");
        };
        assert_eq!(correlation_id.as_str(), "h1");
        assert_eq!(error.code, "NOT_CONNECTED");
    }

    #[tokio::test]
    async fn test_toggle_reaches_every_editor() {
        let ctx = context();
        let (alice, mut alice_rx) = connect(&ctx, "alice", Role::Editor);
        let (_bob, mut bob_rx) = connect(&ctx, "bob", Role::Editor);

        handle_event(
            &ctx,
            &alice,
            ChannelEvent::ToggleBreakpoint {
                file_id: "f1".into(),
                line_number: 10,
                condition: None,
            },
        )
        .await;

        for events in [drain(&mut alice_rx), drain(&mut bob_rx)] {
            assert!(events
                .iter()
                .any(|e| matches!(e, ChannelEvent::BreakpointSetChanged { breakpoints, .. } if breakpoints.len() == 1)));
            assert!(events.iter().any(|e| matches!(e, ChannelEvent::Decorations { .. })));
        }
    }

    #[tokio::test]
    async fn test_direct_message_to_offline_user_is_parked() {
        let ctx = context();
        let (alice, mut alice_rx) = connect(&ctx, "alice", Role::Editor);

        handle_event(
            &ctx,
            &alice,
            ChannelEvent::DirectMessage {
                to_user: "bob".into(),
                from_user: None,
                body: json!("ping"),
            },
        )
        .await;
        assert!(drain(&mut alice_rx).is_empty());

        let parked = ctx.dispatcher.queue().drain("bob").await;
        assert_eq!(parked.len(), 1);
        let ChannelEvent::DirectMessage { from_user, .. } = parked[0].to_event().unwrap() else {
            panic!("expected direct-message");
        };
        assert_eq!(from_user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_status_and_shutdown() {
        let ctx = context();
        let (editor, mut editor_rx) = connect(&ctx, "alice", Role::Editor);

        assert_eq!(handle_event(&ctx, &editor, ChannelEvent::StatusRequest).await, Flow::Continue);
        let ChannelEvent::Status { status } = editor_rx.recv().await.unwrap() else {
            panic!("expected status");
        };
        assert_eq!(status.project_id, "demo");
        assert_eq!(status.breakpoints, 0);
        assert!(ctx.sessions.is_empty().await);

        assert_eq!(handle_event(&ctx, &editor, ChannelEvent::Shutdown).await, Flow::Shutdown);
    }

    #[tokio::test]
    async fn test_editor_debug_commands_reach_backend() {
        let ctx = context();
        let (editor, _editor_rx) = connect(&ctx, "alice", Role::Editor);
        let (_backend, mut backend_rx) = connect(&ctx, "agent", Role::Backend);

        handle_event(&ctx, &editor, ChannelEvent::DebugStart).await;
        assert_eq!(backend_rx.recv().await.unwrap(), ChannelEvent::DebugStart);

        let session = ctx.sessions.get("demo").await.unwrap();
        assert_eq!(session.lock().await.state(), &crate::session::SessionState::Running);
    }
}
