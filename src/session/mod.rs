//! Per-project editing and debugging session
//!
//! A session owns the breakpoint table, the latest variable snapshots and
//! diagnostics of every file, and the lookup correlator. Every state change
//! is announced to the project's editors and followed by a fresh
//! [`DecorationSet`](decorations::DecorationSet).

pub mod breakpoints;
pub mod correlator;
pub mod decorations;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::common::Error;
use crate::ipc::protocol::{
    ChannelEvent, ClientId, CorrelationId, FileId, LookupKind, LookupResult, ProjectId,
    SessionStatus, SyntaxError, TextEdit, TextPosition, VariableSnapshot,
};
use crate::ipc::{Recipient, Transport};

pub use breakpoints::{BreakpointTable, Toggled};
pub use correlator::{Correlator, Reply};
pub use decorations::DecorationSet;
pub use registry::SessionRegistry;

/// Debug session state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionState {
    /// Nothing has happened yet
    #[default]
    Idle,
    /// Program is running
    Running,
    /// Stopped at a breakpoint
    Paused { file_id: FileId, line_number: u32 },
    /// Explicitly stopped; only a new start leaves this state
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused {
                file_id,
                line_number,
            } => write!(f, "paused at {}:{}", file_id, line_number),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// What moved the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
enum Trigger {
    /// First breakpoint or first edit
    Activity,
    Start,
    Hit { file_id: FileId, line_number: u32 },
    Resume,
    Step,
    Stop,
}

/// Next state for `trigger`, or `None` when the transition is not allowed
fn next_state(state: &SessionState, trigger: Trigger) -> Option<SessionState> {
    use SessionState::*;

    match (state, trigger) {
        (Idle, Trigger::Activity) => Some(Running),
        (Idle | Stopped, Trigger::Start) => Some(Running),
        (Running, Trigger::Hit {
            file_id,
            line_number,
        }) => Some(Paused {
            file_id,
            line_number,
        }),
        (Paused { .. }, Trigger::Resume | Trigger::Step) => Some(Running),
        (Running | Paused { .. }, Trigger::Stop) => Some(Stopped),
        _ => None,
    }
}

/// One project's editing/debugging context
pub struct EditingSession {
    project_id: ProjectId,
    transport: Arc<dyn Transport>,
    state: SessionState,
    breakpoints: BreakpointTable,
    variables: HashMap<FileId, Vec<VariableSnapshot>>,
    diagnostics: HashMap<FileId, Vec<SyntaxError>>,
    correlator: Correlator,
    decorations: DecorationSet,
    disposed: bool,
}

impl EditingSession {
    pub fn new(
        project_id: &str,
        transport: Arc<dyn Transport>,
        request_timeout: Duration,
        cache_capacity: usize,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            transport,
            state: SessionState::Idle,
            breakpoints: BreakpointTable::new(),
            variables: HashMap::new(),
            diagnostics: HashMap::new(),
            correlator: Correlator::new(request_timeout, cache_capacity),
            decorations: DecorationSet::default(),
            disposed: false,
        }
    }

    // === Accessors ===

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn breakpoints(&self) -> &BreakpointTable {
        &self.breakpoints
    }

    /// Latest variable snapshots, per file
    pub fn variables(&self) -> impl Iterator<Item = (&FileId, &Vec<VariableSnapshot>)> {
        self.variables.iter()
    }

    pub fn variables_for(&self, file_id: &str) -> &[VariableSnapshot] {
        self.variables.get(file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Latest diagnostics, per file
    pub fn diagnostics(&self) -> impl Iterator<Item = (&FileId, &Vec<SyntaxError>)> {
        self.diagnostics.iter()
    }

    pub fn diagnostics_for(&self, file_id: &str) -> &[SyntaxError] {
        self.diagnostics.get(file_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decorations as last sent to the project
    pub fn decorations(&self) -> &DecorationSet {
        &self.decorations
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            project_id: self.project_id.clone(),
            state: self.state.clone(),
            breakpoints: self.breakpoints.len(),
            diagnostics: self.diagnostics.values().map(Vec::len).sum(),
            variables: self.variables.values().map(Vec::len).sum(),
            pending_requests: self.correlator.pending_len(),
            cached_results: self.correlator.cache_len(),
        }
    }

    // === Breakpoints ===

    pub fn toggle_breakpoint(&mut self, file_id: &str, line_number: u32) -> Toggled {
        self.toggle_breakpoint_with(file_id, line_number, None)
    }

    /// Toggle a breakpoint, attaching `condition` when one is created
    #[tracing::instrument(skip(self), fields(project = %self.project_id))]
    pub fn toggle_breakpoint_with(
        &mut self,
        file_id: &str,
        line_number: u32,
        condition: Option<String>,
    ) -> Toggled {
        let toggled = self.breakpoints.toggle(file_id, line_number, condition);
        tracing::debug!(?toggled, "Breakpoint toggled");

        if matches!(toggled, Toggled::Added(_)) {
            self.transition(Trigger::Activity);
        }
        self.publish_breakpoints(file_id);
        self.refresh_decorations();
        toggled
    }

    /// Enable or disable a breakpoint; unknown ids are dropped
    pub fn set_breakpoint_enabled(&mut self, breakpoint_id: u32, enabled: bool) -> bool {
        let Some(file_id) = self.breakpoints.set_enabled(breakpoint_id, enabled) else {
            tracing::warn!(
                project = %self.project_id,
                breakpoint_id,
                "Ignoring enable/disable for unknown breakpoint"
            );
            return false;
        };

        self.publish_breakpoints(&file_id);
        self.refresh_decorations();
        true
    }

    /// Handle a `breakpoint-hit` from the backend
    ///
    /// Unknown or disabled breakpoints, and hits while not running, are
    /// dropped without touching any state.
    #[tracing::instrument(skip(self), fields(project = %self.project_id))]
    pub fn on_breakpoint_hit(&mut self, breakpoint_id: u32) -> bool {
        match self.breakpoints.get(breakpoint_id) {
            None => {
                tracing::warn!("Ignoring hit for unknown breakpoint");
                return false;
            }
            Some(bp) if !bp.enabled => {
                tracing::debug!("Ignoring hit for disabled breakpoint");
                return false;
            }
            Some(_) if self.state != SessionState::Running => {
                tracing::debug!(state = %self.state, "Ignoring hit while not running");
                return false;
            }
            Some(_) => {}
        }

        let Some(bp) = self.breakpoints.record_hit(breakpoint_id) else {
            return false;
        };
        let file_id = bp.file_id.clone();
        let line_number = bp.line_number;
        tracing::info!(file_id = %file_id, line_number, hit_count = bp.hit_count, "Paused at breakpoint");

        self.transition(Trigger::Hit {
            file_id: file_id.clone(),
            line_number,
        });

        let request = ChannelEvent::VariablesRequest {
            file_id: file_id.clone(),
            line_number,
        };
        if let Err(e) = self.transport.send(&self.backend(), &request) {
            tracing::warn!(error = %e, "Failed to request variables");
        }

        self.publish_breakpoints(&file_id);
        self.refresh_decorations();
        true
    }

    // === Snapshots ===

    /// Replace the variable snapshots of one file
    pub fn on_variable_update(&mut self, file_id: &str, variables: Vec<VariableSnapshot>) {
        tracing::debug!(project = %self.project_id, file_id, count = variables.len(), "Variables updated");
        self.broadcast(&ChannelEvent::VariableUpdate {
            file_id: file_id.to_string(),
            variables: variables.clone(),
        });

        if variables.is_empty() {
            self.variables.remove(file_id);
        } else {
            self.variables.insert(file_id.to_string(), variables);
        }
        self.refresh_decorations();
    }

    /// Replace the diagnostics of one file
    pub fn on_syntax_errors(&mut self, file_id: &str, errors: Vec<SyntaxError>) {
        tracing::debug!(project = %self.project_id, file_id, count = errors.len(), "Diagnostics updated");
        self.broadcast(&ChannelEvent::SyntaxErrors {
            file_id: file_id.to_string(),
            errors: errors.clone(),
        });

        if errors.is_empty() {
            self.diagnostics.remove(file_id);
        } else {
            self.diagnostics.insert(file_id.to_string(), errors);
        }
        self.refresh_decorations();
    }

    /// Relay an edit to the project's other editors
    ///
    /// Concurrent edits are not merged; the last one applied wins.
    pub fn on_edit(
        &mut self,
        file_id: &str,
        version: u64,
        changes: Vec<TextEdit>,
        origin: Option<ClientId>,
    ) {
        tracing::trace!(project = %self.project_id, file_id, version, "Relaying edit");
        let to = match origin {
            Some(client) => Recipient::Peers(self.project_id.clone(), client),
            None => self.project(),
        };
        let event = ChannelEvent::Edit {
            file_id: file_id.to_string(),
            version,
            changes,
        };
        if let Err(e) = self.transport.send(&to, &event) {
            tracing::warn!(error = %e, "Failed to relay edit");
        }

        if self.transition(Trigger::Activity) {
            self.refresh_decorations();
        }
    }

    // === Lookups ===

    /// Ask the backend for the value under `position`
    pub fn inspect_variable(&mut self, position: TextPosition, owner: Option<ClientId>) -> Reply {
        self.request(LookupKind::Hover, position, owner)
    }

    /// Issue a completion/hover/definition/reference lookup
    pub fn request(
        &mut self,
        kind: LookupKind,
        position: TextPosition,
        owner: Option<ClientId>,
    ) -> Reply {
        if self.disposed {
            return Reply::failed(Error::session_disposed(&self.project_id));
        }
        let backend = self.backend();
        self.correlator
            .request(self.transport.as_ref(), &backend, kind, position, owner)
    }

    pub fn on_lookup_response(&mut self, correlation_id: &CorrelationId, result: LookupResult) -> bool {
        self.correlator.resolve(correlation_id, result)
    }

    pub fn on_lookup_failed(&mut self, correlation_id: &CorrelationId, message: &str) -> bool {
        self.correlator.fail(correlation_id, message)
    }

    /// Time out stale lookups
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        self.correlator.reap_expired(now)
    }

    /// Forget the lookups only `client` was waiting on
    pub fn cancel_client(&mut self, client: ClientId) -> usize {
        self.correlator.cancel_owner(client)
    }

    // === Lifecycle ===

    pub fn on_debug_start(&mut self) -> bool {
        self.lifecycle(Trigger::Start)
    }

    pub fn on_debug_resume(&mut self) -> bool {
        self.lifecycle(Trigger::Resume)
    }

    pub fn on_debug_step(&mut self) -> bool {
        self.lifecycle(Trigger::Step)
    }

    pub fn on_debug_stop(&mut self) -> bool {
        self.lifecycle(Trigger::Stop)
    }

    /// Tear the session down; only the first call has any effect
    #[tracing::instrument(skip(self), fields(project = %self.project_id))]
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;

        let project_id = self.project_id.clone();
        self.correlator
            .clear(|| Error::session_disposed(&project_id));
        self.breakpoints.clear();
        self.variables.clear();
        self.diagnostics.clear();
        self.state = SessionState::Idle;
        self.decorations = DecorationSet::default();

        tracing::info!("Session disposed");
        self.broadcast(&ChannelEvent::SessionDispose);
        true
    }

    // === Internals ===

    fn project(&self) -> Recipient {
        Recipient::Project(self.project_id.clone())
    }

    fn backend(&self) -> Recipient {
        Recipient::Backend(self.project_id.clone())
    }

    fn broadcast(&self, event: &ChannelEvent) {
        if let Err(e) = self.transport.send(&self.project(), event) {
            tracing::warn!(project = %self.project_id, event = event.name(), error = %e, "Broadcast failed");
        }
    }

    /// Send a file's authoritative breakpoint list to editors and backend
    fn publish_breakpoints(&self, file_id: &str) {
        let event = ChannelEvent::BreakpointSetChanged {
            file_id: file_id.to_string(),
            breakpoints: self.breakpoints.file(file_id).to_vec(),
        };
        self.broadcast(&event);
        if let Err(e) = self.transport.send(&self.backend(), &event) {
            tracing::debug!(project = %self.project_id, error = %e, "Backend not told about breakpoints");
        }
    }

    fn refresh_decorations(&mut self) {
        self.decorations = decorations::project(self);
        self.broadcast(&ChannelEvent::Decorations {
            decorations: self.decorations.clone(),
        });
    }

    /// Apply a transition; returns whether the state changed
    fn transition(&mut self, trigger: Trigger) -> bool {
        let label = format!("{:?}", trigger);
        match next_state(&self.state, trigger) {
            Some(next) => {
                tracing::debug!(project = %self.project_id, from = %self.state, to = %next, "State change");
                self.state = next;
                true
            }
            None => {
                tracing::debug!(project = %self.project_id, state = %self.state, trigger = %label, "Ignoring transition");
                false
            }
        }
    }

    fn lifecycle(&mut self, trigger: Trigger) -> bool {
        if !self.transition(trigger) {
            return false;
        }
        self.broadcast(&ChannelEvent::Status {
            status: self.status(),
        });
        self.refresh_decorations();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::ipc::protocol::{Breakpoint, Severity};
    use crate::ipc::MemoryTransport;

    fn setup() -> (Arc<MemoryTransport>, EditingSession) {
        let transport = Arc::new(MemoryTransport::new());
        transport.connect(Recipient::Backend("demo".into()));
        let session = EditingSession::new("demo", transport.clone(), Duration::from_secs(30), 16);
        (transport, session)
    }

    fn var(name: &str) -> VariableSnapshot {
        VariableSnapshot {
            name: name.into(),
            type_name: "i32".into(),
            value: json!(1),
            scope: "local".into(),
            line_number: 10,
        }
    }

    fn project_events(transport: &MemoryTransport) -> Vec<ChannelEvent> {
        transport.sent_to(&Recipient::Project("demo".into()))
    }

    #[test]
    fn test_state_machine_transitions() {
        use SessionState::*;
        let paused = Paused {
            file_id: "f".into(),
            line_number: 1,
        };
        let hit = || Trigger::Hit {
            file_id: "f".into(),
            line_number: 1,
        };

        assert_eq!(next_state(&Idle, Trigger::Activity), Some(Running));
        assert_eq!(next_state(&Idle, Trigger::Start), Some(Running));
        assert_eq!(next_state(&Stopped, Trigger::Start), Some(Running));
        assert_eq!(next_state(&Running, hit()), Some(paused.clone()));
        assert_eq!(next_state(&paused, Trigger::Resume), Some(Running));
        assert_eq!(next_state(&paused, Trigger::Step), Some(Running));
        assert_eq!(next_state(&paused, Trigger::Stop), Some(Stopped));
        assert_eq!(next_state(&Running, Trigger::Stop), Some(Stopped));

        assert_eq!(next_state(&Stopped, Trigger::Resume), None);
        assert_eq!(next_state(&Stopped, Trigger::Activity), None);
        assert_eq!(next_state(&Idle, hit()), None);
        assert_eq!(next_state(&Running, Trigger::Start), None);
        assert_eq!(next_state(&Idle, Trigger::Stop), None);
    }

    #[test]
    fn test_toggle_broadcasts_full_file_list() {
        let (transport, mut session) = setup();

        session.toggle_breakpoint("f1", 10);
        let bps = session.breakpoints().file("f1").to_vec();
        assert_eq!(bps.len(), 1);
        assert!(bps[0].enabled);
        assert_eq!(bps[0].line_number, 10);
        assert_eq!(session.state(), &SessionState::Running);

        session.toggle_breakpoint("f1", 10);
        assert!(session.breakpoints().file("f1").is_empty());

        let lists: Vec<Vec<Breakpoint>> = project_events(&transport)
            .into_iter()
            .filter_map(|e| match e {
                ChannelEvent::BreakpointSetChanged { breakpoints, .. } => Some(breakpoints),
                _ => None,
            })
            .collect();
        assert_eq!(lists, vec![bps, vec![]]);
    }

    #[test]
    fn test_every_change_refreshes_decorations() {
        let (transport, mut session) = setup();
        session.toggle_breakpoint("f1", 10);

        let last = project_events(&transport).pop().unwrap();
        let ChannelEvent::Decorations { decorations } = last else {
            panic!("expected decorations, got {:?}", last);
        };
        assert_eq!(decorations.breakpoints.len(), 1);
        assert_eq!(&decorations, session.decorations());
    }

    #[test]
    fn test_hit_pauses_and_requests_variables() {
        let (transport, mut session) = setup();
        let Toggled::Added(id) = session.toggle_breakpoint("f1", 7) else {
            panic!("expected add");
        };

        assert!(session.on_breakpoint_hit(id));
        assert_eq!(
            session.state(),
            &SessionState::Paused {
                file_id: "f1".into(),
                line_number: 7
            }
        );
        assert_eq!(session.breakpoints().get(id).unwrap().hit_count, 1);
        let requests: Vec<ChannelEvent> = transport
            .sent_to(&Recipient::Backend("demo".into()))
            .into_iter()
            .filter(|e| matches!(e, ChannelEvent::VariablesRequest { .. }))
            .collect();
        assert_eq!(
            requests,
            vec![ChannelEvent::VariablesRequest {
                file_id: "f1".into(),
                line_number: 7
            }]
        );
        assert!(session.decorations().paused_line.is_some());
    }

    #[test]
    fn test_unknown_hit_changes_nothing() {
        let (transport, mut session) = setup();
        session.toggle_breakpoint("f1", 7);
        let before = session.status();
        let sent = transport.sent().len();

        assert!(!session.on_breakpoint_hit(42));
        assert_eq!(session.status(), before);
        assert_eq!(transport.sent().len(), sent);
    }

    #[test]
    fn test_disabled_breakpoint_hit_is_ignored() {
        let (_transport, mut session) = setup();
        let Toggled::Added(id) = session.toggle_breakpoint("f1", 7) else {
            panic!("expected add");
        };
        assert!(session.set_breakpoint_enabled(id, false));
        assert!(!session.on_breakpoint_hit(id));
        assert_eq!(session.state(), &SessionState::Running);
        assert_eq!(session.breakpoints().get(id).unwrap().hit_count, 0);

        assert!(!session.set_breakpoint_enabled(999, true));
    }

    #[test]
    fn test_variable_update_replaces_wholesale() {
        let (_transport, mut session) = setup();
        session.on_variable_update("f1", vec![var("x"), var("y")]);
        session.on_variable_update("f1", vec![var("z")]);
        assert_eq!(session.variables_for("f1").len(), 1);
        assert_eq!(session.variables_for("f1")[0].name, "z");

        session.on_variable_update("f1", vec![]);
        assert!(session.variables_for("f1").is_empty());
    }

    #[test]
    fn test_syntax_errors_replace_wholesale() {
        let (_transport, mut session) = setup();
        let error = SyntaxError {
            file_id: "f1".into(),
            line_number: 3,
            column: 1,
            message: "expected `;`".into(),
            severity: Severity::Error,
        };
        session.on_syntax_errors("f1", vec![error.clone(), error]);
        assert_eq!(session.diagnostics_for("f1").len(), 2);
        session.on_syntax_errors("f1", vec![]);
        assert!(session.diagnostics_for("f1").is_empty());
        assert_eq!(session.status().diagnostics, 0);
    }

    #[test]
    fn test_edit_is_relayed_to_peers_and_starts_session() {
        let (transport, mut session) = setup();
        session.on_edit("f1", 2, vec![], Some(5));

        let relayed = transport.sent_to(&Recipient::Peers("demo".into(), 5));
        assert_eq!(relayed.len(), 1);
        assert_eq!(session.state(), &SessionState::Running);
    }

    #[test]
    fn test_lifecycle_events() {
        let (_transport, mut session) = setup();
        assert!(!session.on_debug_resume());
        assert!(session.on_debug_start());
        assert!(session.on_debug_stop());
        assert!(!session.on_debug_step());
        assert_eq!(session.state(), &SessionState::Stopped);
        assert!(session.on_debug_start());
        assert_eq!(session.state(), &SessionState::Running);
    }

    #[tokio::test]
    async fn test_dispose_fails_pending_and_is_idempotent() {
        let (transport, mut session) = setup();
        session.toggle_breakpoint("f1", 1);
        session.on_variable_update("f1", vec![var("x")]);
        let reply = session.inspect_variable(TextPosition::new("f1", 1, 0), None);

        assert!(session.dispose());
        assert!(!session.dispose());
        assert!(matches!(reply.resolve().await, Err(Error::SessionDisposed { .. })));

        let status = session.status();
        assert_eq!(status.breakpoints, 0);
        assert_eq!(status.variables, 0);
        assert_eq!(status.pending_requests, 0);

        let disposals = project_events(&transport)
            .into_iter()
            .filter(|e| *e == ChannelEvent::SessionDispose)
            .count();
        assert_eq!(disposals, 1);

        let late = session.request(LookupKind::Completion, TextPosition::new("f1", 1, 0), None);
        assert!(matches!(late.resolve().await, Err(Error::SessionDisposed { .. })));
    }
}
