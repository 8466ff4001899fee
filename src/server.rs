use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accumulator::ProgressReporter;
use crate::tools::{call_tool, tool_definitions, ToolContext};

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_INSTRUCTIONS: &str = "\
This server gives access to CodeAlive, an AI code-understanding service over indexed repositories and workspaces.

Recommended workflow:
1. Call `get_data_sources` to see which repositories and workspaces are available.
2. Call `codebase_search` to find the relevant files and code.
3. Call `chat_completions` for in-depth analysis; `get_repo_overview` summarises a repository's purpose and domain.

Search tips:
- Start broad, then use concrete function or class names to narrow down.
- Use the \"auto\" mode by default; \"deep\" is expensive and meant for hard, cross-cutting questions.
- A workspace name searches all of its repositories; repository names give targeted results.
- Search covers the indexed branch, not uncommitted local changes.

When reading results, look at file paths to understand the project layout and at patterns across matching files.";

type Outbox = mpsc::UnboundedSender<Value>;

/// Forwards progress as `notifications/progress` for one request.
struct McpProgress {
    token: Value,
    out: Outbox,
}

impl ProgressReporter for McpProgress {
    fn report(&self, progress: f64, message: &str) {
        let _ = self.out.send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": {
                "progressToken": self.token,
                "progress": progress,
                "total": 1.0,
                "message": message
            }
        }));
    }
}

fn reply(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn reply_error(id: Value, code: i64, message: String) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

/// Request ids are matched by their JSON form so `1` and `"1"` stay distinct.
fn request_key(id: &Value) -> String {
    id.to_string()
}

pub struct ServerState {
    tools: ToolContext,
    out: Outbox,
    in_flight: HashMap<String, JoinHandle<()>>,
    cancelled: Vec<JoinHandle<()>>,
}

impl ServerState {
    fn new(tools: ToolContext, out: Outbox) -> Self {
        Self {
            tools,
            out,
            in_flight: HashMap::new(),
            cancelled: Vec::new(),
        }
    }

    fn send(&self, msg: Value) {
        let _ = self.out.send(msg);
    }

    fn handle_line(&mut self, line: &str) {
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "ignoring malformed JSON-RPC line");
                return;
            }
        };
        let method = msg.get("method").and_then(Value::as_str).unwrap_or("");
        let params = msg.get("params").cloned().unwrap_or(json!({}));

        // JSON-RPC notifications have no "id" field: never answered.
        let Some(id) = msg.get("id").cloned() else {
            self.handle_notification(method, &params);
            return;
        };
        debug!(method, id = %id, "request");

        match method {
            "initialize" => self.send(reply(
                id,
                json!({
                    "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(json!(DEFAULT_PROTOCOL_VERSION)),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "codealive-mcp", "version": env!("CARGO_PKG_VERSION") },
                    "instructions": SERVER_INSTRUCTIONS
                }),
            )),
            "ping" => self.send(reply(id, json!({}))),
            "tools/list" => self.send(reply(id, json!({ "tools": tool_definitions() }))),
            "tools/call" => self.spawn_tool_call(id, params),
            "resources/list" => self.send(reply(id, json!({ "resources": [] }))),
            "prompts/list" => self.send(reply(id, json!({ "prompts": [] }))),
            _ => self.send(reply_error(id, -32601, format!("Method not found: {method}"))),
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else { return };
                match self.in_flight.remove(&request_key(request_id)) {
                    Some(handle) => {
                        info!(request_id = %request_id, "cancelling tool call");
                        handle.abort();
                        self.cancelled.retain(|h| !h.is_finished());
                        self.cancelled.push(handle);
                    }
                    None => debug!(request_id = %request_id, "cancel for unknown or finished request"),
                }
            }
            _ => debug!(method, "notification"),
        }
    }

    fn spawn_tool_call(&mut self, id: Value, params: Value) {
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_owned) else {
            self.send(reply_error(id, -32602, "Missing tool name".to_string()));
            return;
        };
        self.in_flight.retain(|_, h| !h.is_finished());
        self.cancelled.retain(|h| !h.is_finished());

        // The running call keeps its id; a second one under the same id is refused.
        let key = request_key(&id);
        if self.in_flight.contains_key(&key) {
            warn!(id = %id, "tools/call reuses the id of a call still in flight");
            self.send(reply_error(id, -32600, "Request id is already in use by a running call".to_string()));
            return;
        }

        let args = params.get("arguments").cloned().unwrap_or(json!({}));
        let progress_token = params
            .get("_meta")
            .and_then(|m| m.get("progressToken"))
            .cloned();

        let tools = self.tools.clone();
        let out = self.out.clone();
        let handle = tokio::spawn(async move {
            let reporter = progress_token.map(|token| McpProgress {
                token,
                out: out.clone(),
            });
            let progress = reporter.as_ref().map(|r| r as &dyn ProgressReporter);
            let output = call_tool(&tools, &name, args, progress).await;
            let _ = out.send(reply(id, output.to_result()));
        });
        self.in_flight.insert(key, handle);
    }

    /// Waits for every outstanding call, including cancelled ones, so
    /// their connections are gone before the server returns.
    async fn finish(self) {
        for handle in self.cancelled.into_iter().chain(self.in_flight.into_values()) {
            let _ = handle.await;
        }
    }
}

/// Serves newline-delimited JSON-RPC from `reader` to `writer` until EOF.
pub async fn serve<R, W>(tools: ToolContext, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    // Single writer: replies and notifications from concurrent calls never interleave.
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(msg) = rx.recv().await {
            let mut line = msg.to_string();
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut state = ServerState::new(tools, tx);
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request line")? {
        if line.trim().is_empty() {
            continue;
        }
        state.handle_line(&line);
    }
    debug!("input closed; waiting for in-flight calls");
    state.finish().await;

    writer_task
        .await
        .context("Writer task panicked")?
        .context("Failed to write response")?;
    Ok(())
}

pub async fn run_stdio_server(tools: ToolContext) -> Result<()> {
    serve(tools, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}
