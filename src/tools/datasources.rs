use serde_json::{Map, Value};
use tracing::error;

use super::{arg_bool, ToolContext, ToolOutput};
use crate::client::{DATASOURCES_ALIVE_ENDPOINT, DATASOURCES_ALL_ENDPOINT};

pub const NO_DATA_SOURCES: &str =
    "No data sources found. Please add a repository or workspace to CodeAlive before using this API.";
const USAGE_HINT: &str =
    "You can use these data source names with the codebase_search and codebase_consultant functions.";

/// Workspaces list their member repository ids; agents never need them.
fn strip_workspace_repository_ids(items: &mut [Value]) {
    for item in items.iter_mut() {
        let Some(obj) = item.as_object_mut() else { continue };
        if obj.get("type").and_then(Value::as_str) == Some("Workspace") {
            obj.shift_remove("repositoryIds");
        }
    }
}

pub fn format_data_sources(mut data: Value) -> String {
    match &mut data {
        Value::Null => return NO_DATA_SOURCES.to_string(),
        Value::Array(items) if items.is_empty() => return NO_DATA_SOURCES.to_string(),
        Value::Array(items) => strip_workspace_repository_ids(items),
        _ => {}
    }
    let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
    format!("Available data sources:\n{pretty}\n\n{USAGE_HINT}")
}

pub async fn get_data_sources(ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
    let endpoint = if arg_bool(args, "alive_only", true) {
        DATASOURCES_ALIVE_ENDPOINT
    } else {
        DATASOURCES_ALL_ENDPOINT
    };

    match ctx.api.get_json(endpoint, &[]).await {
        Ok(data) => ToolOutput::ok(format_data_sources(data)),
        Err(e) => {
            error!(error = %e, "listing data sources failed");
            ToolOutput::error(e.user_message("retrieving data sources"))
        }
    }
}
