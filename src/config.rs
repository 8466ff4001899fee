use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ApiError;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://app.codealive.ai";

pub const ENV_API_KEY: &str = "CODEALIVE_API_KEY";
pub const ENV_BASE_URL: &str = "CODEALIVE_BASE_URL";
pub const ENV_IGNORE_SSL: &str = "CODEALIVE_IGNORE_SSL";
pub const ENV_DEBUG: &str = "DEBUG_MODE";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Max silence between two reads of a response body, streams included.
    pub read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Chat stream retry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (2 means three attempts in total).
    pub max_retries: u32,
    pub base_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_backoff_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub verify_ssl: bool,
    /// Verbose logging of every backend request and response.
    pub debug: bool,
    pub http: HttpConfig,
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            verify_ssl: true,
            debug: false,
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// What happened with the JSON config file layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLayer {
    Missing,
    Loaded(PathBuf),
    /// Unreadable or malformed; defaults were used instead.
    Invalid { path: PathBuf, error: String },
}

/// `~/.codealive/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".codealive").join("config.json"))
}

/// Loads the file layer: `explicit` if given, else the per-user default.
///
/// Fails open: a broken file never stops the server, the caller gets
/// defaults plus a [`FileLayer::Invalid`] to report once logging is up.
pub fn load_config(explicit: Option<&Path>) -> (Config, FileLayer) {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_config_path() {
            Some(p) if p.is_file() => p,
            _ => return (Config::default(), FileLayer::Missing),
        },
    };

    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => {
            return (
                Config::default(),
                FileLayer::Invalid {
                    path,
                    error: e.to_string(),
                },
            )
        }
    };

    match serde_json::from_str::<Config>(&text) {
        Ok(cfg) => (cfg, FileLayer::Loaded(path)),
        Err(e) => (
            Config::default(),
            FileLayer::Invalid {
                path,
                error: e.to_string(),
            },
        ),
    }
}

/// `1`, `true`, `yes`, `on`, any case.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Overlays environment variables read through `lookup`. Empty values
    /// are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(url) = get(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(flag) = get(ENV_IGNORE_SSL) {
            self.verify_ssl = !is_truthy(&flag);
        }
        if let Some(flag) = get(ENV_DEBUG) {
            self.debug = is_truthy(&flag);
        }
    }

    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// The API key, or a startup error telling the user where to put one.
    pub fn require_api_key(&self) -> Result<&str, ApiError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ApiError::InvalidConfig(format!(
                    "no API key configured; set {ENV_API_KEY}, pass --api-key, or add \"api_key\" to the config file"
                ))
            })
    }

    /// Key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => {
                let chars: Vec<char> = key.chars().collect();
                let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
                format!("*****{tail}")
            }
            _ => "Not set".to_string(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }
}
