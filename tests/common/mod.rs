//! Scripted in-process HTTP backend for end-to-end tool tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use codealive_mcp::client::CodeAliveClient;
use codealive_mcp::config::{Config, RetryConfig};
use codealive_mcp::tools::ToolContext;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const API_KEY: &str = "test-key-1234";
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// One canned response, consumed in request order.
#[derive(Debug, Clone)]
pub enum Reply {
    Json { status: u16, body: String },
    /// Chunked `text/event-stream`; with `truncate` the connection is
    /// closed without the terminating chunk.
    Sse { events: Vec<String>, truncate: bool },
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Reply::Json {
            status,
            body: body.to_string(),
        }
    }

    pub fn sse(events: Vec<String>) -> Self {
        Reply::Sse {
            events,
            truncate: false,
        }
    }

    pub fn sse_cut(events: Vec<String>) -> Self {
        Reply::Sse {
            events,
            truncate: true,
        }
    }
}

pub fn sse_delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path plus query string.
    pub target: String,
    pub authorization: Option<String>,
    pub body: String,
}

pub struct Backend {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    accept_loop: JoinHandle<()>,
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

impl Backend {
    pub async fn start(replies: Vec<Reply>) -> Backend {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

        let accept_loop = tokio::spawn({
            let requests = requests.clone();
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve_one(socket, replies.clone(), requests.clone()));
                }
            }
        });

        Backend {
            base_url: format!("http://{addr}"),
            requests,
            accept_loop,
        }
    }

    pub fn config(&self) -> Config {
        Config {
            api_key: Some(API_KEY.to_string()),
            base_url: self.base_url.clone(),
            retry: RetryConfig {
                max_retries: 2,
                base_backoff_ms: 1,
            },
            ..Config::default()
        }
    }

    pub fn tools(&self) -> ToolContext {
        let cfg = self.config();
        ToolContext {
            api: Arc::new(CodeAliveClient::new(&cfg).unwrap()),
            retry: cfg.retry_policy(),
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve_one(
    mut socket: TcpStream,
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<Recorded>>>,
) {
    let (read_half, mut write_half) = socket.split();
    let mut reader = BufReader::new(read_half);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
            return;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let value = value.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "authorization" => authorization = Some(value.to_string()),
                _ => {}
            }
        }
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }

    requests.lock().unwrap().push(Recorded {
        method,
        target,
        authorization,
        body: String::from_utf8_lossy(&body).into_owned(),
    });
    let reply = replies.lock().unwrap().pop_front().unwrap_or(Reply::Json {
        status: 500,
        body: "{\"detail\":\"no scripted reply\"}".into(),
    });

    match reply {
        Reply::Json { status, body } => {
            let head = format!(
                "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = write_half.write_all(head.as_bytes()).await;
            let _ = write_half.write_all(body.as_bytes()).await;
        }
        Reply::Sse { events, truncate } => {
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n";
            let _ = write_half.write_all(head.as_bytes()).await;
            for event in events {
                let chunk = format!("{:x}\r\n{event}\r\n", event.len());
                let _ = write_half.write_all(chunk.as_bytes()).await;
                let _ = write_half.flush().await;
            }
            if !truncate {
                let _ = write_half.write_all(b"0\r\n\r\n").await;
            }
        }
    }
    let _ = write_half.flush().await;
    let _ = write_half.shutdown().await;
}
