//! Channel event vocabulary
//!
//! Every frame exchanged between editors, the host and the backend is one
//! [`ChannelEvent`]. Lookup requests carry a [`CorrelationId`] and their
//! responses echo it; nothing is ever matched by resource path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::common::{error::WireError, split_numeric_suffix, Error};
use crate::session::decorations::DecorationSet;
use crate::session::SessionState;

pub type ProjectId = String;
pub type UserId = String;
pub type FileId = String;
pub type ClientId = u64;

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// An editor UI driven by a person
    Editor,
    /// The debugging/completion agent serving a project
    Backend,
    /// A short-lived command-line client; sees project broadcasts but
    /// never receives user-addressed messages
    Control,
}

/// Unique token pairing a request with its response
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cursor position inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPosition {
    pub uri: String,
    pub line: u32,
    pub character: u32,
}

impl TextPosition {
    pub fn new(uri: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            uri: uri.into(),
            line,
            character,
        }
    }

    /// Parse `uri:line:character`, e.g. `src/main.rs:10:4`
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (rest, character) =
            split_numeric_suffix(s).ok_or_else(|| Error::InvalidPosition(s.to_string()))?;
        let (uri, line) =
            split_numeric_suffix(rest).ok_or_else(|| Error::InvalidPosition(s.to_string()))?;
        Ok(Self::new(uri, line, character))
    }
}

impl fmt::Display for TextPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.uri, self.line, self.character)
    }
}

/// A breakpoint as seen by every client of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    pub id: u32,
    pub file_id: FileId,
    pub line_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub hit_count: u32,
    pub enabled: bool,
}

/// A live variable value reported by the backend while paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableSnapshot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub type_name: String,
    pub value: serde_json::Value,
    #[serde(default)]
    pub scope: String,
    pub line_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

/// A syntax diagnostic for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxError {
    pub file_id: FileId,
    pub line_number: u32,
    pub column: u32,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverInfo {
    pub contents: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub uri: String,
    pub line: u32,
    pub character: u32,
}

/// One replaced range in a document edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
    pub text: String,
}

/// The four correlated lookup kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Completion,
    Hover,
    Definition,
    Reference,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion => write!(f, "completion"),
            Self::Hover => write!(f, "hover"),
            Self::Definition => write!(f, "definition"),
            Self::Reference => write!(f, "reference"),
        }
    }
}

/// A resolved lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LookupResult {
    Completions(Vec<CompletionItem>),
    Hover(Option<HoverInfo>),
    Definitions(Vec<Location>),
    References(Vec<Location>),
}

impl LookupResult {
    pub fn kind(&self) -> LookupKind {
        match self {
            Self::Completions(_) => LookupKind::Completion,
            Self::Hover(_) => LookupKind::Hover,
            Self::Definitions(_) => LookupKind::Definition,
            Self::References(_) => LookupKind::Reference,
        }
    }
}

/// Diagnostic snapshot of one project's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub project_id: ProjectId,
    pub state: SessionState,
    pub breakpoints: usize,
    pub diagnostics: usize,
    pub variables: usize,
    pub pending_requests: usize,
    pub cached_results: usize,
}

impl SessionStatus {
    /// Status of a project with no live session
    pub fn empty(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            state: SessionState::Idle,
            breakpoints: 0,
            diagnostics: 0,
            variables: 0,
            pending_requests: 0,
            cached_results: 0,
        }
    }
}

/// Everything that can travel over a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ChannelEvent {
    // === Handshake ===
    /// First frame on every connection
    Hello {
        user_id: UserId,
        project_id: ProjectId,
        role: Role,
    },

    // === Breakpoints ===
    ToggleBreakpoint {
        file_id: FileId,
        line_number: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition: Option<String>,
    },
    SetBreakpointEnabled {
        breakpoint_id: u32,
        enabled: bool,
    },
    /// Full, authoritative breakpoint list for one file
    BreakpointSetChanged {
        file_id: FileId,
        breakpoints: Vec<Breakpoint>,
    },
    BreakpointHit {
        breakpoint_id: u32,
    },

    // === Editing state ===
    VariablesRequest {
        file_id: FileId,
        line_number: u32,
    },
    VariableUpdate {
        file_id: FileId,
        variables: Vec<VariableSnapshot>,
    },
    SyntaxErrors {
        file_id: FileId,
        errors: Vec<SyntaxError>,
    },
    Edit {
        file_id: FileId,
        version: u64,
        changes: Vec<TextEdit>,
    },
    Decorations {
        decorations: DecorationSet,
    },

    // === Correlated lookups ===
    CompletionRequest {
        correlation_id: CorrelationId,
        position: TextPosition,
    },
    CompletionResponse {
        correlation_id: CorrelationId,
        items: Vec<CompletionItem>,
    },
    HoverRequest {
        correlation_id: CorrelationId,
        position: TextPosition,
    },
    HoverResponse {
        correlation_id: CorrelationId,
        hover: Option<HoverInfo>,
    },
    DefinitionRequest {
        correlation_id: CorrelationId,
        position: TextPosition,
    },
    DefinitionResponse {
        correlation_id: CorrelationId,
        locations: Vec<Location>,
    },
    ReferenceRequest {
        correlation_id: CorrelationId,
        position: TextPosition,
    },
    ReferenceResponse {
        correlation_id: CorrelationId,
        locations: Vec<Location>,
    },
    RequestFailed {
        correlation_id: CorrelationId,
        error: WireError,
    },

    // === Lifecycle ===
    DebugStart,
    DebugResume,
    DebugStep,
    DebugStop,
    SessionDispose,
    StatusRequest,
    Status {
        status: SessionStatus,
    },
    Shutdown,

    // === Messaging ===
    DirectMessage {
        to_user: UserId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_user: Option<UserId>,
        body: serde_json::Value,
    },
    DeliveryFailed {
        to_user: UserId,
        error: WireError,
    },
}

impl ChannelEvent {
    /// Wire name of the event, as it appears in the `event` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::ToggleBreakpoint { .. } => "toggle-breakpoint",
            Self::SetBreakpointEnabled { .. } => "set-breakpoint-enabled",
            Self::BreakpointSetChanged { .. } => "breakpoint-set-changed",
            Self::BreakpointHit { .. } => "breakpoint-hit",
            Self::VariablesRequest { .. } => "variables-request",
            Self::VariableUpdate { .. } => "variable-update",
            Self::SyntaxErrors { .. } => "syntax-errors",
            Self::Edit { .. } => "edit",
            Self::Decorations { .. } => "decorations",
            Self::CompletionRequest { .. } => "completion-request",
            Self::CompletionResponse { .. } => "completion-response",
            Self::HoverRequest { .. } => "hover-request",
            Self::HoverResponse { .. } => "hover-response",
            Self::DefinitionRequest { .. } => "definition-request",
            Self::DefinitionResponse { .. } => "definition-response",
            Self::ReferenceRequest { .. } => "reference-request",
            Self::ReferenceResponse { .. } => "reference-response",
            Self::RequestFailed { .. } => "request-failed",
            Self::DebugStart => "debug-start",
            Self::DebugResume => "debug-resume",
            Self::DebugStep => "debug-step",
            Self::DebugStop => "debug-stop",
            Self::SessionDispose => "session-dispose",
            Self::StatusRequest => "status-request",
            Self::Status { .. } => "status",
            Self::Shutdown => "shutdown",
            Self::DirectMessage { .. } => "direct-message",
            Self::DeliveryFailed { .. } => "delivery-failed",
        }
    }

    /// Build the `*-request` event for a lookup
    pub fn lookup_request(
        kind: LookupKind,
        correlation_id: CorrelationId,
        position: TextPosition,
    ) -> Self {
        match kind {
            LookupKind::Completion => Self::CompletionRequest {
                correlation_id,
                position,
            },
            LookupKind::Hover => Self::HoverRequest {
                correlation_id,
                position,
            },
            LookupKind::Definition => Self::DefinitionRequest {
                correlation_id,
                position,
            },
            LookupKind::Reference => Self::ReferenceRequest {
                correlation_id,
                position,
            },
        }
    }

    /// Build the `*-response` event echoing `correlation_id`
    pub fn lookup_response(correlation_id: CorrelationId, result: LookupResult) -> Self {
        match result {
            LookupResult::Completions(items) => Self::CompletionResponse {
                correlation_id,
                items,
            },
            LookupResult::Hover(hover) => Self::HoverResponse {
                correlation_id,
                hover,
            },
            LookupResult::Definitions(locations) => Self::DefinitionResponse {
                correlation_id,
                locations,
            },
            LookupResult::References(locations) => Self::ReferenceResponse {
                correlation_id,
                locations,
            },
        }
    }

    /// Split a `*-request` event into its parts
    pub fn as_lookup_request(&self) -> Option<(LookupKind, &CorrelationId, &TextPosition)> {
        match self {
            Self::CompletionRequest {
                correlation_id,
                position,
            } => Some((LookupKind::Completion, correlation_id, position)),
            Self::HoverRequest {
                correlation_id,
                position,
            } => Some((LookupKind::Hover, correlation_id, position)),
            Self::DefinitionRequest {
                correlation_id,
                position,
            } => Some((LookupKind::Definition, correlation_id, position)),
            Self::ReferenceRequest {
                correlation_id,
                position,
            } => Some((LookupKind::Reference, correlation_id, position)),
            _ => None,
        }
    }

    /// Split a `*-response` event into its parts
    pub fn as_lookup_response(&self) -> Option<(&CorrelationId, LookupResult)> {
        match self {
            Self::CompletionResponse {
                correlation_id,
                items,
            } => Some((correlation_id, LookupResult::Completions(items.clone()))),
            Self::HoverResponse {
                correlation_id,
                hover,
            } => Some((correlation_id, LookupResult::Hover(hover.clone()))),
            Self::DefinitionResponse {
                correlation_id,
                locations,
            } => Some((correlation_id, LookupResult::Definitions(locations.clone()))),
            Self::ReferenceResponse {
                correlation_id,
                locations,
            } => Some((correlation_id, LookupResult::References(locations.clone()))),
            _ => None,
        }
    }
}
