//! End-to-end audit flow over an in-memory stdio transport.
//!
//! Drives the real client, multiplexer, scheduler, baseline builder, and
//! diff analyzer against a scripted MCP server, without child processes or
//! network.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio_util::sync::CancellationToken;

use bellwether::baseline::{BaselineBuilder, BuildContext, DiffSeverity, diff_baselines};
use bellwether::client::{McpClient, McpClientConfig};
use bellwether::interview::{InterviewConfig, InterviewMode, InterviewScheduler, ToolInvoker};
use bellwether::transport::{StdioTransport, Transport};

/// Spawn a scripted MCP server speaking newline-delimited JSON-RPC.
fn spawn_server(server_read: DuplexStream, mut server_write: DuplexStream, tools: Value) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(server_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => continue,
            };
            let Some(method) = message["method"].as_str() else {
                continue;
            };
            if message.get("id").is_none() {
                continue; // notifications need no reply
            }
            let id = message["id"].clone();
            let result = match method {
                "initialize" => json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "fixture-server", "version": "1.0.0"}
                }),
                "ping" => json!({}),
                "tools/list" => json!({"tools": tools}),
                "tools/call" => {
                    let name = message["params"]["name"].as_str().unwrap_or("");
                    let arguments = &message["params"]["arguments"];
                    match name {
                        "create_note" => {
                            if arguments.get("title").and_then(Value::as_str).is_some() {
                                json!({
                                    "content": [{"type": "text", "text": "{\"id\": \"note-1\"}"}],
                                    "structuredContent": {"id": "note-1"},
                                    "isError": false
                                })
                            } else {
                                json!({
                                    "content": [{"type": "text", "text": "title is required"}],
                                    "isError": true
                                })
                            }
                        }
                        "get_note" => json!({
                            "content": [{"type": "text", "text": "{\"id\": \"note-1\", \"title\": \"x\"}"}],
                            "structuredContent": {"id": "note-1", "title": "x"},
                            "isError": false
                        }),
                        _ => json!({
                            "content": [{"type": "text", "text": "unknown tool"}],
                            "isError": true
                        }),
                    }
                }
                _ => {
                    let reply = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    });
                    let mut frame = serde_json::to_vec(&reply).unwrap();
                    frame.push(b'\n');
                    let _ = server_write.write_all(&frame).await;
                    continue;
                }
            };
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            let mut frame = serde_json::to_vec(&reply).unwrap();
            frame.push(b'\n');
            if server_write.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
}

fn note_tools() -> Value {
    json!([
        {
            "name": "create_note",
            "description": "Create a note",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "body": {"type": "string"}
                },
                "required": ["title"]
            }
        },
        {
            "name": "get_note",
            "description": "Fetch a note",
            "inputSchema": {
                "type": "object",
                "properties": {"note_id": {"type": "string"}},
                "required": ["note_id"]
            }
        }
    ])
}

async fn connected_client(tools: Value) -> Arc<McpClient> {
    let (client_write, server_read) = tokio::io::duplex(16384);
    let (server_write, client_read) = tokio::io::duplex(16384);
    spawn_server(server_read, server_write, tools);

    let transport: Arc<dyn Transport> =
        Arc::new(StdioTransport::from_raw(client_read, client_write));
    let (client, _notifications) = McpClient::connect(transport, McpClientConfig::default())
        .await
        .unwrap();
    Arc::new(client)
}

fn structural_config() -> InterviewConfig {
    InterviewConfig {
        mode: InterviewMode::Structural,
        // Enough headroom for the boundary and error questions the
        // structural generator appends after the happy-path ones.
        max_questions_per_tool: 8,
        ..Default::default()
    }
}

fn context() -> BuildContext {
    BuildContext {
        mode: "check".to_string(),
        cli_version: "0.4.0".to_string(),
        server_command: Some("fixture-server".to_string()),
        model: None,
    }
}

async fn run_audit(tools: Value) -> bellwether::baseline::Baseline {
    let client = connected_client(tools).await;
    let discovery = client.discover().await.unwrap();
    client.ping().await.unwrap();

    let scheduler = InterviewScheduler::new(
        Arc::clone(&client) as Arc<dyn ToolInvoker>,
        None,
        None,
        structural_config(),
    );
    let interview = scheduler
        .run(&discovery, &[], &[], CancellationToken::new())
        .await;
    client.close().await.ok();

    BaselineBuilder::build(&discovery, &interview, &context())
}

#[tokio::test]
async fn identical_runs_produce_identical_hashes() {
    // Property 1 end to end: two full audits of the same server agree.
    let first = run_audit(note_tools()).await;
    let second = run_audit(note_tools()).await;

    assert!(first.verify());
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.server.name, "fixture-server");
    assert_eq!(first.capabilities.tools.len(), 2);
}

#[tokio::test]
async fn identical_baselines_diff_as_none() {
    // S1: same discovery, `none` severity.
    let first = run_audit(note_tools()).await;
    let second = run_audit(note_tools()).await;

    let diff = diff_baselines(&first, &second);
    assert_eq!(diff.severity, DiffSeverity::None);
    assert!(diff.tools_added.is_empty());
    assert!(diff.tools_removed.is_empty());
    assert!(diff.tools_modified.is_empty());
}

#[tokio::test]
async fn removing_a_tool_is_breaking_end_to_end() {
    // S2 end to end: dropping get_note from the server breaks the diff.
    let full = run_audit(note_tools()).await;
    let reduced_tools = json!([note_tools()[0].clone()]);
    let reduced = run_audit(reduced_tools).await;

    let diff = diff_baselines(&full, &reduced);
    assert_eq!(diff.severity, DiffSeverity::Breaking);
    assert_eq!(diff.tools_removed, vec!["get_note"]);
    assert_eq!(
        diff.action_items[0].priority,
        bellwether::baseline::ActionPriority::Critical
    );
}

#[tokio::test]
async fn schema_change_surfaces_parameter_diff() {
    // S3 end to end: making `body` required flips severity to breaking.
    let full = run_audit(note_tools()).await;

    let mut changed_tools = note_tools();
    changed_tools[0]["inputSchema"]["required"] = json!(["title", "body"]);
    let changed = run_audit(changed_tools).await;

    let diff = diff_baselines(&full, &changed);
    assert_eq!(diff.severity, DiffSeverity::Breaking);
    let tool_diff = diff
        .tools_modified
        .iter()
        .find(|t| t.name == "create_note")
        .unwrap();
    assert!(tool_diff.changes.iter().any(|change| {
        change.kind == bellwether::baseline::ChangeKind::RequiredAdded && change.breaking
    }));
}

#[tokio::test]
async fn interview_captures_error_signal() {
    let baseline = run_audit(note_tools()).await;

    // The structural error question (missing required `title`) hit the
    // scripted validation path and was preserved as signal.
    assert!(
        baseline
            .interviews
            .iter()
            .any(|record| record.tool == "create_note" && !record.ok)
    );
    // Successful calls produced a response fingerprint.
    let create = baseline
        .capabilities
        .tools
        .iter()
        .find(|t| t.name == "create_note")
        .unwrap();
    assert!(create.response_fingerprint.is_some());
    assert!(!create.error_patterns.is_empty());
}

#[tokio::test]
async fn baseline_round_trips_through_disk() {
    // Property 3 end to end.
    let baseline = run_audit(note_tools()).await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("baseline.json");

    baseline.save(&path).unwrap();
    let loaded = bellwether::baseline::Baseline::load(&path).unwrap();

    assert!(loaded.verify());
    assert_eq!(loaded.hash, baseline.hash);
    let diff = diff_baselines(&baseline, &loaded);
    assert_eq!(diff.severity, DiffSeverity::None);
}
