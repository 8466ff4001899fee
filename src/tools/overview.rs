use serde_json::{Map, Value};
use tracing::error;

use super::{ToolContext, ToolOutput};
use crate::client::OVERVIEW_ENDPOINT;
use crate::errors::ApiError;
use crate::params::normalize_data_source_names;
use crate::xml_builder::{build_repo_overview_xml, RepoOverview};

const OPERATION: &str = "get repository overview";

/// Reads `[{name, overview}, ...]`; missing fields fall back to
/// `unknown` / empty text.
pub fn parse_overviews(body: &Value) -> Result<Vec<RepoOverview>, ApiError> {
    let items = body
        .as_array()
        .ok_or_else(|| ApiError::Decode("expected an array of repository overviews".into()))?;
    Ok(items
        .iter()
        .map(|item| RepoOverview {
            name: item
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            overview: item
                .get("overview")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect())
}

pub async fn get_repo_overview(ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
    let names = normalize_data_source_names(args.get("data_sources"));
    let params: Vec<(&str, String)> = names
        .iter()
        .filter(|n| !n.is_empty())
        .map(|n| ("Names", n.clone()))
        .collect();

    let overviews = match ctx
        .api
        .get_json(OVERVIEW_ENDPOINT, &params)
        .await
        .and_then(|body| parse_overviews(&body))
    {
        Ok(overviews) => overviews,
        Err(e) => {
            error!(error = %e, "repository overview failed");
            return ToolOutput::error(e.user_message(OPERATION));
        }
    };

    match build_repo_overview_xml(&overviews) {
        Ok(xml) => ToolOutput::ok(xml),
        Err(e) => ToolOutput::error(format!("Error: Error during {OPERATION}: {e}")),
    }
}
