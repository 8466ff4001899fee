//! HTTP access to the CodeAlive backend.

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::errors::ApiError;
use crate::logging::{log_api_request, log_api_response};
use crate::sse::{lines_from_bytes, LineStream};

pub const SEARCH_ENDPOINT: &str = "/api/search";
pub const CHAT_ENDPOINT: &str = "/api/chat/completions";
pub const DATASOURCES_ALIVE_ENDPOINT: &str = "/api/datasources/alive";
pub const DATASOURCES_ALL_ENDPOINT: &str = "/api/datasources/all";
pub const OVERVIEW_ENDPOINT: &str = "/api/overview";

/// Everything the tools need from the backend.
///
/// `open_stream` resolves once response headers arrived with a success
/// status; any failure up to that point is fatal. Errors while reading the
/// returned stream are transport failures. Dropping the stream releases the
/// connection.
#[async_trait]
pub trait CodeAliveApi: Send + Sync {
    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError>;

    async fn open_stream(&self, endpoint: &str, body: &Value) -> Result<LineStream, ApiError>;
}

pub struct CodeAliveClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CodeAliveClient {
    pub fn new(cfg: &Config) -> Result<Self, ApiError> {
        let api_key = cfg.require_api_key()?.to_string();
        if !cfg.verify_ssl {
            warn!("TLS certificate verification is disabled");
        }
        let http = reqwest::Client::builder()
            .connect_timeout(cfg.http.connect_timeout())
            .read_timeout(cfg.http.read_timeout())
            .danger_accept_invalid_certs(!cfg.verify_ssl)
            .user_agent(concat!("codealive-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// Turns a non-success response into its [`ApiError`].
    async fn reject(response: reqwest::Response, request_id: &str, url: &str) -> ApiError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        log_api_response(request_id, status, url, Some(&body));
        ApiError::from_status(status, &body)
    }
}

fn send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Network(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ApiError::Network(format!("connection failed: {e}"))
    } else {
        ApiError::Network(e.to_string())
    }
}

#[async_trait]
impl CodeAliveApi for CodeAliveClient {
    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, ApiError> {
        let url = self.url(endpoint);
        let request_id = log_api_request("GET", &url, params, None);

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(params)
            .send()
            .await
            .map_err(send_error)?;

        if !response.status().is_success() {
            return Err(Self::reject(response, &request_id, &url).await);
        }

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read response body: {e}")))?;
        log_api_response(&request_id, status, &url, Some(&text));

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn open_stream(&self, endpoint: &str, body: &Value) -> Result<LineStream, ApiError> {
        let url = self.url(endpoint);
        let request_id = log_api_request("POST", &url, &[], Some(body));

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(send_error)?;

        if !response.status().is_success() {
            return Err(Self::reject(response, &request_id, &url).await);
        }
        log_api_response(&request_id, response.status().as_u16(), &url, None);

        Ok(Box::pin(lines_from_bytes(Box::pin(response.bytes_stream()))))
    }
}
