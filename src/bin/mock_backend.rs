//! Mock language backend for integration testing
//!
//! Connects to the running host as the backend of one project and answers
//! every lookup with canned results, so sessions can be exercised without a
//! real language server or debugger.
//!
//! Usage: `mock_backend [project]` (defaults to `demo`)

use serde_json::json;

use collab_debug::common::error::WireError;
use collab_debug::ipc::protocol::{
    ChannelEvent, CompletionItem, HoverInfo, Location, LookupKind, LookupResult, Role,
    TextPosition, VariableSnapshot,
};
use collab_debug::ipc::HostClient;
use collab_debug::Result;

#[tokio::main]
async fn main() {
    let project = std::env::args().nth(1).unwrap_or_else(|| "demo".to_string());

    if let Err(e) = run(&project).await {
        eprintln!("mock_backend: {e}");
        std::process::exit(1);
    }
}

async fn run(project: &str) -> Result<()> {
    let mut client = HostClient::connect("mock-backend", project, Role::Backend).await?;

    loop {
        let event = client.recv().await?;

        if let Some((kind, correlation_id, position)) = event.as_lookup_request() {
            let reply = match answer(kind, position) {
                Some(result) => ChannelEvent::lookup_response(correlation_id.clone(), result),
                None => ChannelEvent::RequestFailed {
                    correlation_id: correlation_id.clone(),
                    error: WireError::new("REQUEST_FAILED", format!("no {} at {}", kind, position)),
                },
            };
            client.send(&reply).await?;
            continue;
        }

        match event {
            ChannelEvent::VariablesRequest {
                file_id,
                line_number,
            } => {
                let variables = vec![
                    VariableSnapshot {
                        name: "counter".to_string(),
                        type_name: "i32".to_string(),
                        value: json!(line_number),
                        scope: "local".to_string(),
                        line_number,
                    },
                    VariableSnapshot {
                        name: "label".to_string(),
                        type_name: "&str".to_string(),
                        value: json!(format!("{}:{}", file_id, line_number)),
                        scope: "local".to_string(),
                        line_number,
                    },
                ];
                client
                    .send(&ChannelEvent::VariableUpdate { file_id, variables })
                    .await?;
            }
            ChannelEvent::BreakpointSetChanged {
                file_id,
                breakpoints,
            } => {
                eprintln!(
                    "mock_backend: {} breakpoint(s) in {}",
                    breakpoints.len(),
                    file_id
                );
            }
            ChannelEvent::SessionDispose => {
                eprintln!("mock_backend: session disposed");
            }
            _ => {}
        }
    }
}

/// Canned lookup answers; a `missing` document has nothing to offer
fn answer(kind: LookupKind, position: &TextPosition) -> Option<LookupResult> {
    if position.uri.ends_with("missing") {
        return None;
    }

    let here = Location {
        uri: position.uri.clone(),
        line: position.line,
        character: position.character,
    };

    Some(match kind {
        LookupKind::Completion => LookupResult::Completions(vec![
            CompletionItem {
                label: "println!".to_string(),
                kind: Some("macro".to_string()),
                detail: Some("macro_rules! println".to_string()),
                insert_text: Some("println!(\"$0\")".to_string()),
            },
            CompletionItem {
                label: "print!".to_string(),
                kind: Some("macro".to_string()),
                detail: None,
                insert_text: None,
            },
        ]),
        LookupKind::Hover => LookupResult::Hover(Some(HoverInfo {
            contents: format!("symbol at line {}", position.line),
            type_name: Some("i32".to_string()),
        })),
        LookupKind::Definition => LookupResult::Definitions(vec![Location { line: 0, ..here }]),
        LookupKind::Reference => LookupResult::References(vec![
            here.clone(),
            Location {
                line: here.line + 10,
                ..here
            },
        ]),
    })
}
