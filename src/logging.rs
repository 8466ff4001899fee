//! Process-wide tracing setup and backend request/response tracing.
//!
//! Everything goes to stderr; stdout belongs to the JSON-RPC stream.

use serde_json::{json, Map, Value};
use tracing::{debug, enabled, Level};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

pub const ENV_LOG_LEVEL: &str = "CODEALIVE_LOG_LEVEL";

fn resolve_env_filter(debug: bool) -> EnvFilter {
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
        if let Ok(filter) = EnvFilter::try_new(level) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

/// Installs the stderr subscriber. Calling it twice is harmless.
pub fn init_logging(debug: bool) {
    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr);
    let _ = tracing_subscriber::registry()
        .with(resolve_env_filter(debug))
        .with(layer)
        .try_init();
}

/// Short id tying a request to its response in the logs.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// Query parameters as a JSON object; repeated keys become arrays.
pub fn collapse_params(params: &[(&str, String)]) -> Value {
    let mut out = Map::new();
    for (key, value) in params {
        match out.get_mut(*key) {
            Some(Value::Array(items)) => items.push(json!(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = json!([first, value]);
            }
            None => {
                out.insert((*key).to_string(), json!(value));
            }
        }
    }
    Value::Object(out)
}

/// Logs an outgoing backend call at debug level and returns its request id.
/// The bearer token never reaches the log.
pub fn log_api_request(method: &str, url: &str, params: &[(&str, String)], body: Option<&Value>) -> String {
    let request_id = new_request_id();
    if !enabled!(Level::DEBUG) {
        return request_id;
    }
    let headers = json!({
        "Authorization": "Bearer ***",
        "Content-Type": "application/json",
    });
    let body = body.map(Value::to_string).unwrap_or_default();
    debug!(
        request_id = %request_id,
        method,
        url,
        headers = %headers,
        params = %collapse_params(params),
        body = %body,
        "api request"
    );
    request_id
}

/// Logs a backend reply. `body` is only given for non-streaming responses.
pub fn log_api_response(request_id: &str, status: u16, url: &str, body: Option<&str>) {
    debug!(
        request_id,
        status,
        url,
        body = body.unwrap_or("<stream>"),
        "api response"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_collapse_into_arrays() {
        let params = vec![
            ("Query", "auth".to_string()),
            ("Names", "a".to_string()),
            ("Names", "b".to_string()),
            ("Names", "c".to_string()),
        ];
        assert_eq!(
            collapse_params(&params),
            json!({"Query": "auth", "Names": ["a", "b", "c"]})
        );
    }

    #[test]
    fn request_logging_with_a_body_returns_its_id() {
        init_logging(true);
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});
        let id = log_api_request("POST", "http://localhost/api/chat/completions", &[], Some(&body));
        assert_eq!(id.len(), 8);
        log_api_response(&id, 200, "http://localhost/api/chat/completions", None);
    }

    #[test]
    fn request_ids_are_short_and_distinct() {
        let a = new_request_id();
        let b = new_request_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(false);
        init_logging(true);
    }
}
