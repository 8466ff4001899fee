//! Error taxonomy for backend calls and the user-facing strings tools return.
//!
//! Two families matter to callers:
//! - [`ApiError`]: anything that stops a request from producing a usable
//!   response. Status failures are always fatal; they are never retried.
//! - [`StreamError`]: a transport failure *after* the response started
//!   streaming. These are the only transient failures in the system.

/// Max characters of server-provided detail echoed back to the caller.
pub const DETAIL_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized (401): {detail}")]
    Unauthorized { detail: String },
    #[error("forbidden (403): {detail}")]
    Forbidden { detail: String },
    #[error("not found (404): {detail}")]
    NotFound { detail: String },
    #[error("rate limited (429): {detail}")]
    RateLimited { detail: String },
    #[error("server error ({status}): {detail}")]
    Server { status: u16, detail: String },
    /// Any other non-success status.
    #[error("http error ({status}): {detail}")]
    Http { status: u16, detail: String },
    /// No response was received, or a stream kept failing until retries ran out.
    #[error("{0}")]
    Network(String),
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Maps a non-success HTTP status and its body onto the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = excerpt(body);
        match status {
            401 => Self::Unauthorized { detail },
            403 => Self::Forbidden { detail },
            404 => Self::NotFound { detail },
            429 => Self::RateLimited { detail },
            500..=599 => Self::Server { status, detail },
            _ => Self::Http { status, detail },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Server { status, .. } | Self::Http { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) | Self::InvalidConfig(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Renders the error the way tools hand it back to the agent.
    ///
    /// `operation` names what was being attempted and only shows up for
    /// failures that carry no HTTP status.
    pub fn user_message(&self, operation: &str) -> String {
        let msg = match self {
            Self::Unauthorized { .. } => {
                "Authentication error (401): Invalid API key or insufficient permissions".to_string()
            }
            Self::Forbidden { .. } => {
                "Authorization error (403): You don't have permission to access this resource"
                    .to_string()
            }
            Self::NotFound { .. } => {
                "Not found error (404): The requested resource could not be found".to_string()
            }
            Self::RateLimited { .. } => {
                "Rate limit exceeded (429): Too many requests, please try again later".to_string()
            }
            Self::Server { status: 502, .. } => {
                "Bad gateway (502): The CodeAlive service is temporarily unavailable".to_string()
            }
            Self::Server { status: 503, .. } => {
                "Service unavailable (503): The CodeAlive service is under maintenance".to_string()
            }
            Self::Server { status, .. } => {
                format!("Server error ({status}): The CodeAlive service encountered an issue")
            }
            Self::Http { status, detail } => format!("HTTP error: {status} - {detail}"),
            Self::Network(_) | Self::Decode(_) | Self::InvalidConfig(_) => {
                return format!(
                    "Error: Error during {operation}: {self}. Please check your input parameters and try again."
                );
            }
        };
        format!("Error: {msg}")
    }
}

/// Transport failure after the response began streaming (reset, abrupt
/// close, broken chunked encoding).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stream interrupted: {0}")]
pub struct StreamError(pub String);

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Bounded, char-boundary-safe excerpt of a server message.
pub fn excerpt(text: &str) -> String {
    text.trim().chars().take(DETAIL_EXCERPT_CHARS).collect()
}
