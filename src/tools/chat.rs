use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::{arg_str, ToolContext, ToolOutput};
use crate::accumulator::{drain, ProgressReporter, StreamState};
use crate::client::{CodeAliveApi, CHAT_ENDPOINT};
use crate::params::format_data_source_ids;
use crate::retry::{run_with_retry, AttemptOutcome, StreamAnswer, StreamAttempt};
use crate::sse::frames;

pub const NO_MESSAGES: &str =
    "Error: No messages provided. Please include at least one message with 'role' and 'content' fields.";
pub const INVALID_MESSAGE: &str = "Error: Each message must have 'role' and 'content' fields. Valid roles are 'system', 'user', and 'assistant'.";
pub const NO_CONTENT: &str =
    "No content returned from the API. Please check that your data sources are accessible and try again.";
pub const CONVERSATION_NOT_FOUND: &str = "Error: Not found (404): The requested resource could not be found. Check your conversation_id or data_source_ids.";

/// One POST of the chat request, drained into the attempt's state.
struct ChatAttempt<'a> {
    api: &'a dyn CodeAliveApi,
    body: &'a Value,
    progress: Option<&'a dyn ProgressReporter>,
}

#[async_trait]
impl<'a> StreamAttempt for ChatAttempt<'a> {
    async fn attempt(&self, attempt: u32, state: &mut StreamState) -> AttemptOutcome {
        if attempt > 0 {
            info!(attempt, "re-issuing chat request");
        }
        let lines = match self.api.open_stream(CHAT_ENDPOINT, self.body).await {
            Ok(lines) => lines,
            Err(e) => return AttemptOutcome::FatalFailure(e),
        };
        let result = drain(frames(lines), state, self.progress).await;
        AttemptOutcome::after_stream(state, result)
    }
}

fn has_text(msg: &Value, key: &str) -> bool {
    msg.get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

/// Accepts a real array or a JSON-encoded one.
fn messages_arg(args: &Map<String, Value>) -> Option<Vec<Value>> {
    match args.get("messages")? {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// Request body for the chat endpoint, or the message explaining why
/// the arguments cannot make one.
pub fn build_chat_body(args: &Map<String, Value>) -> Result<Value, &'static str> {
    let messages = messages_arg(args).filter(|m| !m.is_empty()).ok_or(NO_MESSAGES)?;
    if !messages.iter().all(|m| has_text(m, "role") && has_text(m, "content")) {
        return Err(INVALID_MESSAGE);
    }

    let mut body = json!({ "messages": messages, "stream": true });
    let conversation_id = arg_str(args, "conversation_id").filter(|c| !c.is_empty());
    if let Some(id) = conversation_id {
        body["conversationId"] = json!(id);
    }
    let data_sources = format_data_source_ids(args.get("data_sources"));
    if data_sources.is_empty() {
        if conversation_id.is_none() {
            info!("no data sources provided; the API key's single assigned data source is used if there is one");
        }
    } else {
        body["dataSources"] = Value::Array(data_sources);
    }
    Ok(body)
}

pub async fn chat_completions(
    ctx: &ToolContext,
    args: &Map<String, Value>,
    progress: Option<&dyn ProgressReporter>,
) -> ToolOutput {
    let body = match build_chat_body(args) {
        Ok(body) => body,
        Err(msg) => return ToolOutput::error(msg),
    };
    let message_count = body["messages"].as_array().map_or(0, Vec::len);
    let conversation = body["conversationId"].as_str().unwrap_or("new");
    info!(messages = message_count, conversation, "requesting chat completion");

    let attempt = ChatAttempt {
        api: ctx.api.as_ref(),
        body: &body,
        progress,
    };
    match run_with_retry(&ctx.retry, &attempt).await {
        Ok(StreamAnswer::Complete(text)) => ToolOutput::ok(text),
        Ok(StreamAnswer::Partial { text, reason }) => ToolOutput::ok(format!(
            "{text}\n\n[Note: the response stream was interrupted ({reason}); this answer may be incomplete.]"
        )),
        Ok(StreamAnswer::Empty) => ToolOutput::ok(NO_CONTENT),
        Err(e) => {
            error!(error = %e, "chat completion failed");
            if e.is_not_found() {
                ToolOutput::error(CONVERSATION_NOT_FOUND)
            } else {
                ToolOutput::error(e.user_message("chat completion"))
            }
        }
    }
}
