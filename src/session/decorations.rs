//! Decoration projection
//!
//! A decoration set is recomputed from scratch after every state change and
//! sent to the project's editors, which replace whatever they showed before.

use serde::{Deserialize, Serialize};

use crate::ipc::protocol::{FileId, Severity, VariableSnapshot};

use super::{EditingSession, SessionState};

/// Gutter glyph for one enabled breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointGlyph {
    pub breakpoint_id: u32,
    pub file_id: FileId,
    pub line_number: u32,
    pub conditional: bool,
    pub hit_count: u32,
}

/// Squiggle for one syntax error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticMarker {
    pub file_id: FileId,
    pub line_number: u32,
    pub column: u32,
    pub severity: Severity,
    pub message: String,
}

/// Inline tooltip showing a variable's current value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoverTooltip {
    pub file_id: FileId,
    pub line_number: u32,
    pub name: String,
    pub text: String,
}

/// Whole-line highlight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineHighlight {
    pub file_id: FileId,
    pub line_number: u32,
}

/// Every marker an editor should show for a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecorationSet {
    pub breakpoints: Vec<BreakpointGlyph>,
    pub diagnostics: Vec<DiagnosticMarker>,
    pub hovers: Vec<HoverTooltip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_line: Option<LineHighlight>,
}

impl DecorationSet {
    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
            && self.diagnostics.is_empty()
            && self.hovers.is_empty()
            && self.paused_line.is_none()
    }
}

fn tooltip_text(var: &VariableSnapshot) -> String {
    if var.type_name.is_empty() {
        format!("{} = {}", var.name, var.value)
    } else {
        format!("{}: {} = {}", var.name, var.type_name, var.value)
    }
}

/// Map session state to decorations
///
/// Output is sorted by file, line and column so equal states give equal sets.
pub fn project(session: &EditingSession) -> DecorationSet {
    let mut breakpoints: Vec<BreakpointGlyph> = session
        .breakpoints()
        .iter()
        .filter(|bp| bp.enabled)
        .map(|bp| BreakpointGlyph {
            breakpoint_id: bp.id,
            file_id: bp.file_id.clone(),
            line_number: bp.line_number,
            conditional: bp.condition.is_some(),
            hit_count: bp.hit_count,
        })
        .collect();
    breakpoints.sort_by(|a, b| {
        (&a.file_id, a.line_number).cmp(&(&b.file_id, b.line_number))
    });

    let mut diagnostics: Vec<DiagnosticMarker> = session
        .diagnostics()
        .flat_map(|(file_id, errors)| {
            errors.iter().map(move |e| DiagnosticMarker {
                file_id: file_id.clone(),
                line_number: e.line_number,
                column: e.column,
                severity: e.severity,
                message: e.message.clone(),
            })
        })
        .collect();
    diagnostics.sort_by(|a, b| {
        (&a.file_id, a.line_number, a.column, a.severity, &a.message).cmp(&(
            &b.file_id,
            b.line_number,
            b.column,
            b.severity,
            &b.message,
        ))
    });

    let mut hovers: Vec<HoverTooltip> = session
        .variables()
        .flat_map(|(file_id, vars)| {
            vars.iter().map(move |v| HoverTooltip {
                file_id: file_id.clone(),
                line_number: v.line_number,
                name: v.name.clone(),
                text: tooltip_text(v),
            })
        })
        .collect();
    hovers.sort_by(|a, b| {
        (&a.file_id, a.line_number, &a.name).cmp(&(&b.file_id, b.line_number, &b.name))
    });

    let paused_line = match session.state() {
        SessionState::Paused {
            file_id,
            line_number,
        } => Some(LineHighlight {
            file_id: file_id.clone(),
            line_number: *line_number,
        }),
        _ => None,
    };

    DecorationSet {
        breakpoints,
        diagnostics,
        hovers,
        paused_line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::ipc::protocol::SyntaxError;
    use crate::ipc::MemoryTransport;

    fn session() -> EditingSession {
        EditingSession::new(
            "demo",
            Arc::new(MemoryTransport::new()),
            Duration::from_secs(30),
            16,
        )
    }

    #[test]
    fn test_empty_session_projects_nothing() {
        assert!(project(&session()).is_empty());
    }

    #[test]
    fn test_disabled_breakpoints_have_no_glyph() {
        let mut session = session();
        session.toggle_breakpoint("b.rs", 3);
        session.toggle_breakpoint("a.rs", 9);
        let id = session.breakpoints().file("b.rs")[0].id;
        session.set_breakpoint_enabled(id, false);

        let set = project(&session);
        assert_eq!(set.breakpoints.len(), 1);
        assert_eq!(set.breakpoints[0].file_id, "a.rs");
    }

    #[test]
    fn test_markers_are_sorted_and_tagged() {
        let mut session = session();
        let error = |line, column, severity| SyntaxError {
            file_id: "a.rs".into(),
            line_number: line,
            column,
            message: "unexpected token".into(),
            severity,
        };
        session.on_syntax_errors(
            "a.rs",
            vec![
                error(7, 1, Severity::Warning),
                error(2, 5, Severity::Error),
                error(2, 1, Severity::Hint),
            ],
        );

        let set = project(&session);
        let order: Vec<(u32, u32, Severity)> = set
            .diagnostics
            .iter()
            .map(|d| (d.line_number, d.column, d.severity))
            .collect();
        assert_eq!(
            order,
            vec![
                (2, 1, Severity::Hint),
                (2, 5, Severity::Error),
                (7, 1, Severity::Warning)
            ]
        );
    }

    #[test]
    fn test_variables_become_tooltips() {
        let mut session = session();
        session.on_variable_update(
            "a.rs",
            vec![VariableSnapshot {
                name: "count".into(),
                type_name: "usize".into(),
                value: json!(3),
                scope: "local".into(),
                line_number: 12,
            }],
        );

        let set = project(&session);
        assert_eq!(set.hovers.len(), 1);
        assert_eq!(set.hovers[0].text, "count: usize = 3");
    }

    #[test]
    fn test_projection_is_deterministic() {
        let mut a = session();
        let mut b = session();
        for line in [5, 1, 3] {
            a.toggle_breakpoint("x.rs", line);
        }
        for line in [3, 5, 1] {
            b.toggle_breakpoint("x.rs", line);
        }
        let lines = |s: &EditingSession| -> Vec<u32> {
            project(s).breakpoints.iter().map(|g| g.line_number).collect()
        };
        assert_eq!(lines(&a), lines(&b));
        assert_eq!(lines(&a), vec![1, 3, 5]);
    }
}
