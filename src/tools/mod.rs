//! The MCP tools: definitions for `tools/list` and dispatch for `tools/call`.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::accumulator::ProgressReporter;
use crate::client::CodeAliveApi;
use crate::params::strip_injected_keys;
use crate::retry::RetryPolicy;

pub mod chat;
pub mod datasources;
pub mod overview;
pub mod search;

/// Shared, read-only state every tool call sees.
#[derive(Clone)]
pub struct ToolContext {
    pub api: Arc<dyn CodeAliveApi>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }

    /// MCP `CallToolResult` payload.
    pub fn to_result(&self) -> Value {
        json!({ "content": [{"type": "text", "text": self.text }], "isError": self.is_error })
    }
}

fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Booleans also arrive as strings from some clients.
fn arg_bool(args: &Map<String, Value>, key: &str, default: bool) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        _ => default,
    }
}

pub fn tool_definitions() -> Value {
    json!([
        {
            "name": "get_data_sources",
            "description": "Lists the repositories and workspaces indexed by CodeAlive for this account, with id, name, description, type, url and state. Call this FIRST: the names it returns are what codebase_search, chat_completions and get_repo_overview expect. Use name + description + url to tell the repository you are working in apart from external ones.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "alive_only": { "type": "boolean", "description": "Only return data sources in the \"Alive\" state, ready for search and chat (default true)." }
                }
            }
        },
        {
            "name": "codebase_search",
            "description": "Semantic search over the indexed codebase (the branch shown by get_data_sources, not local uncommitted files). Prefer natural-language questions such as \"Where is rate limiting handled?\"; include function or class names to narrow results. Returns compact XML grouped by file: paths, line ranges and kinds, plus code when include_content is true.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What you are looking for, in natural language or by symbol name." },
                    "data_sources": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Repository or workspace names to search. A workspace name searches all of its repositories."
                    },
                    "mode": { "type": "string", "enum": ["auto", "fast", "deep"], "description": "auto (default, recommended), fast (lexical, quickest) or deep (exhaustive, use sparingly)." },
                    "include_content": { "type": "boolean", "description": "Inline the matched code. Use false for the repository you have locally (read files yourself), true for external repositories (default false)." }
                },
                "required": ["query"]
            }
        },
        {
            "name": "chat_completions",
            "description": "Asks CodeAlive's code-aware assistant a question about the selected repositories and returns its answer. Use after codebase_search for in-depth analysis. Pass conversation_id to continue an earlier conversation.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "messages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "role": { "type": "string", "enum": ["system", "user", "assistant"] },
                                "content": { "type": "string" }
                            },
                            "required": ["role", "content"]
                        },
                        "description": "Conversation in chronological order, newest message last."
                    },
                    "data_sources": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Repository or workspace ids to ground the answer in. Optional when the API key has exactly one data source or when continuing a conversation."
                    },
                    "conversation_id": { "type": "string", "description": "Id of a previous conversation to continue." }
                },
                "required": ["messages"]
            }
        },
        {
            "name": "get_repo_overview",
            "description": "High-level overview of repositories: purpose, responsibilities, ubiquitous language and domains. Returns XML with one <repository> per data source (all data sources when none are given).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "data_sources": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Repository or workspace names. Omit for all available data sources."
                    }
                }
            }
        }
    ])
}

/// Runs one tool. Never fails: every problem comes back as an error output.
pub async fn call_tool(
    ctx: &ToolContext,
    name: &str,
    args: Value,
    progress: Option<&dyn ProgressReporter>,
) -> ToolOutput {
    let mut args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            warn!(tool = name, args = %other, "tool arguments are not an object; ignoring them");
            Map::new()
        }
    };
    strip_injected_keys(&mut args);
    info!(tool = name, "tool call");

    match name {
        "codebase_search" => search::codebase_search(ctx, &args).await,
        "chat_completions" => chat::chat_completions(ctx, &args, progress).await,
        "get_data_sources" => datasources::get_data_sources(ctx, &args).await,
        "get_repo_overview" => overview::get_repo_overview(ctx, &args).await,
        _ => ToolOutput::error(format!("Unknown tool: {name}")),
    }
}
