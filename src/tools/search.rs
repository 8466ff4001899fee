use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::{arg_bool, arg_str, ToolContext, ToolOutput};
use crate::client::SEARCH_ENDPOINT;
use crate::params::normalize_data_source_names;
use crate::results::FileGroups;
use crate::xml_builder::build_search_results_xml;

pub const EMPTY_QUERY: &str = "Query cannot be empty. Please provide a search term, function name, or description of the code you're looking for.";
pub const DATA_SOURCE_NOT_FOUND: &str =
    "Error: Not found (404): One or more data sources could not be found. Check your data_sources.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Auto,
    Fast,
    Deep,
}

impl SearchMode {
    /// Case-insensitive; `None` for anything unrecognised.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "fast" => Some(Self::Fast),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fast => "fast",
            Self::Deep => "deep",
        }
    }
}

fn error_xml(message: &str) -> ToolOutput {
    ToolOutput::error(format!("<error>{message}</error>"))
}

pub async fn codebase_search(ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
    let query = arg_str(args, "query").unwrap_or("");
    if query.trim().is_empty() {
        return error_xml(EMPTY_QUERY);
    }

    let names = normalize_data_source_names(args.get("data_sources"));
    let include_content = arg_bool(args, "include_content", false);
    let mode = match arg_str(args, "mode").filter(|m| !m.trim().is_empty()) {
        None => SearchMode::Auto,
        Some(raw) => SearchMode::parse(raw).unwrap_or_else(|| {
            warn!(mode = raw, "invalid search mode; valid modes are auto, fast and deep; using auto");
            SearchMode::Auto
        }),
    };

    let mut params: Vec<(&str, String)> = vec![
        ("Query", query.to_string()),
        ("Mode", mode.as_str().to_string()),
        ("IncludeContent", include_content.to_string()),
    ];
    params.extend(
        names
            .iter()
            .filter(|n| !n.is_empty())
            .map(|n| ("Names", n.clone())),
    );
    if names.is_empty() {
        info!(mode = mode.as_str(), "searching the API key's default data source");
    } else {
        info!(mode = mode.as_str(), data_sources = names.len(), "searching");
    }

    match ctx.api.get_json(SEARCH_ENDPOINT, &params).await {
        Ok(body) => {
            let groups = FileGroups::from_response(&body);
            match build_search_results_xml(&groups, include_content) {
                Ok(xml) => ToolOutput::ok(xml),
                Err(e) => {
                    error!(error = %e, "rendering search results failed");
                    error_xml(&format!("Error: Error during code search: {e}"))
                }
            }
        }
        Err(e) => {
            error!(error = %e, "code search failed");
            if e.is_not_found() {
                error_xml(DATA_SOURCE_NOT_FOUND)
            } else {
                error_xml(&e.user_message("code search"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use crate::tools::testing::{context, FakeApi};
    use serde_json::json;
    use std::sync::Arc;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn param_pairs(api: &FakeApi) -> Vec<(String, String)> {
        api.calls()[0].params.clone()
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!(SearchMode::parse("DEEP"), Some(SearchMode::Deep));
        assert_eq!(SearchMode::parse(" Fast "), Some(SearchMode::Fast));
        assert_eq!(SearchMode::parse("turbo"), None);
    }

    #[tokio::test]
    async fn blank_query_never_hits_the_backend() {
        let api = Arc::new(FakeApi::default());
        let out = codebase_search(&context(api.clone()), &args(json!({"query": "   "}))).await;
        assert!(out.is_error);
        assert_eq!(out.text, format!("<error>{EMPTY_QUERY}</error>"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn builds_params_with_one_names_entry_per_source() {
        let api = Arc::new(FakeApi::with_json(Ok(json!({"results": []}))));
        let out = codebase_search(
            &context(api.clone()),
            &args(json!({
                "query": "auth flow",
                "data_sources": "[\"backend\", \"\", \"frontend\"]",
                "mode": "TURBO",
                "include_content": true
            })),
        )
        .await;
        assert_eq!(out, ToolOutput::ok("<results></results>"));
        let expected: Vec<(String, String)> = [
            ("Query", "auth flow"),
            ("Mode", "auto"),
            ("IncludeContent", "true"),
            ("Names", "backend"),
            ("Names", "frontend"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(param_pairs(&api), expected);
        assert_eq!(api.calls()[0].endpoint, SEARCH_ENDPOINT);
    }

    #[tokio::test]
    async fn renders_grouped_xml() {
        let api = Arc::new(FakeApi::with_json(Ok(json!({"results": [
            {"kind": "Symbol", "location": {"path": "src/a.rs", "range": {"start": {"line": 1}, "end": {"line": 4}}}},
            {"kind": "Folder", "location": {"path": "src"}}
        ]}))));
        let out = codebase_search(&context(api), &args(json!({"query": "a"}))).await;
        assert!(!out.is_error);
        assert_eq!(
            out.text,
            "<results>\n  <search_result path=\"src/a.rs\" startLine=\"1\" endLine=\"4\" kind=\"Symbol\"/>\n</results>"
        );
    }

    #[tokio::test]
    async fn not_found_names_the_data_sources() {
        let api = Arc::new(FakeApi::with_json(Err(ApiError::from_status(404, "missing"))));
        let out = codebase_search(&context(api), &args(json!({"query": "a", "data_sources": ["ghost"]}))).await;
        assert!(out.is_error);
        assert_eq!(out.text, format!("<error>{DATA_SOURCE_NOT_FOUND}</error>"));
    }

    #[tokio::test]
    async fn other_failures_use_the_status_class_message() {
        let api = Arc::new(FakeApi::with_json(Err(ApiError::from_status(429, ""))));
        let out = codebase_search(&context(api), &args(json!({"query": "a"}))).await;
        assert_eq!(
            out.text,
            "<error>Error: Rate limit exceeded (429): Too many requests, please try again later</error>"
        );
    }
}
