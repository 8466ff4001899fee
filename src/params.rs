//! Argument clean-up for agent clients that serialize tool arguments loosely.

use serde_json::{json, Map, Value};
use tracing::debug;

/// Keys some workflow runners inject into every tool call.
pub const INJECTED_KEYS: [&str; 4] = ["sessionId", "action", "chatInput", "toolCallId"];

/// Drops [`INJECTED_KEYS`] from `args` in place; returns what was removed.
pub fn strip_injected_keys(args: &mut Map<String, Value>) -> Vec<&'static str> {
    let removed: Vec<&'static str> = INJECTED_KEYS
        .iter()
        .copied()
        .filter(|k| args.remove(*k).is_some())
        .collect();
    if !removed.is_empty() {
        debug!(keys = ?removed, "stripped injected tool arguments");
    }
    removed
}

/// Turns whatever the client sent as `data_sources` into a list of names.
///
/// Some clients send a JSON-encoded array as a string, others a bare
/// string, others objects. Strings inside an array are kept verbatim.
pub fn normalize_data_source_names(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => names_from_items(&items),
            _ => vec![s.clone()],
        },
        Some(Value::Array(items)) => names_from_items(items),
        Some(other) => vec![other.to_string()],
    }
}

fn names_from_items(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("name")
                .or_else(|| obj.get("id"))
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        })
        .collect()
}

/// Builds the `[{ "id": … }]` list the chat endpoint expects.
///
/// Accepts bare ids and objects carrying an `id`; blanks are skipped.
pub fn format_data_source_ids(value: Option<&Value>) -> Vec<Value> {
    let items: Vec<Value> = match value {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => vec![Value::String(s.clone())],
        },
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str),
            _ => None,
        })
        .filter(|id| !id.is_empty())
        .map(|id| json!({ "id": id }))
        .collect()
}
