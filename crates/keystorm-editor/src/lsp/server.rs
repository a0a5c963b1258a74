//! The language-server seam: spawn a server, talk to it, observe its exit.
//!
//! The supervisor only depends on [`LanguageServer`] and [`ServerFactory`];
//! [`ProcessServerFactory`] is the stdio-backed implementation that manages
//! the child process, frames JSON-RPC messages, and reports process exit
//! through a one-shot channel.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use keystorm_core::events::DiagnosticsEvent;
use keystorm_core::{Error, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use url::Url;

/// Why a server went away.
#[derive(Debug, Clone)]
pub struct ServerExit {
    pub code: Option<i32>,
    pub message: String,
}

/// A ranged document change in 0-based line/character positions. `None`
/// range in `change_document` means a full-content replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start_line: u32,
    pub start_character: u32,
    pub end_line: u32,
    pub end_character: u32,
}

/// The operations the supervisor forwards to a live server.
#[async_trait]
pub trait LanguageServer: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    /// An opaque request/response exchange with a timeout.
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;

    async fn open_document(&self, uri: &Url, language_id: &str, text: &str) -> Result<()>;

    async fn change_document(&self, uri: &Url, range: Option<TextRange>, text: &str) -> Result<()>;

    async fn close_document(&self, uri: &Url) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;
}

/// A freshly spawned server plus its observation channels.
pub struct SpawnedServer {
    pub server: Arc<dyn LanguageServer>,
    /// Fires exactly once when the server process exits.
    pub exit: oneshot::Receiver<ServerExit>,
    /// Diagnostics pushed by the server, if the implementation surfaces any.
    pub diagnostics: Option<mpsc::UnboundedReceiver<DiagnosticsEvent>>,
}

/// Spawns fresh server instances; the supervisor calls this on every restart.
#[async_trait]
pub trait ServerFactory: Send + Sync {
    async fn spawn(&self) -> Result<SpawnedServer>;
}

/// Configuration for one stdio language server.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct LspServerConfig {
    pub language_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub struct ProcessServerFactory {
    config: LspServerConfig,
}

impl ProcessServerFactory {
    pub fn new(config: LspServerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ServerFactory for ProcessServerFactory {
    async fn spawn(&self) -> Result<SpawnedServer> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Initialization {
                component: format!("lsp-{}", self.config.language_id),
                reason: e.to_string(),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| Error::Initialization {
            component: format!("lsp-{}", self.config.language_id),
            reason: "child stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| Error::Initialization {
            component: format!("lsp-{}", self.config.language_id),
            reason: "child stdout unavailable".into(),
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (diag_tx, diag_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let reader = tokio::spawn(read_loop(stdout, Arc::clone(&pending), diag_tx));
        let command = self.config.command.clone();
        let waiter = tokio::spawn(async move {
            let message = match child.wait().await {
                Ok(status) => {
                    let _ = exit_tx.send(ServerExit {
                        code: status.code(),
                        message: format!("{command} exited: {status}"),
                    });
                    return;
                }
                Err(e) => format!("{command} wait failed: {e}"),
            };
            let _ = exit_tx.send(ServerExit {
                code: None,
                message,
            });
        });

        let server = Arc::new(ProcessServer {
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            version: AtomicU64::new(0),
            tasks: Mutex::new(vec![reader, waiter]),
        });

        Ok(SpawnedServer {
            server,
            exit: exit_rx,
            diagnostics: Some(diag_rx),
        })
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A language server reached over the child process's stdio, with
/// `Content-Length`-framed JSON-RPC messages.
struct ProcessServer {
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: PendingMap,
    next_id: AtomicU64,
    version: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ProcessServer {
    async fn write_message(&self, message: Value) -> Result<()> {
        let body = serde_json::to_vec(&message)
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes())
            .await?;
        stdin.write_all(&body).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write_message(json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }))
        .await
    }
}

#[async_trait]
impl LanguageServer for ProcessServer {
    async fn initialize(&self) -> Result<()> {
        self.request(
            "initialize",
            json!({ "processId": Value::Null, "capabilities": {} }),
            Duration::from_secs(10),
        )
        .await?;
        self.notify("initialized", json!({})).await
    }

    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        self.write_message(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::ServerNotReady),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(Error::InvalidOperation(format!("{method} request timed out")))
            }
        }
    }

    async fn open_document(&self, uri: &Url, language_id: &str, text: &str) -> Result<()> {
        self.version.store(1, Ordering::SeqCst);
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri.as_str(),
                    "languageId": language_id,
                    "version": 1,
                    "text": text,
                }
            }),
        )
        .await
    }

    async fn change_document(&self, uri: &Url, range: Option<TextRange>, text: &str) -> Result<()> {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let change = match range {
            Some(range) => json!({
                "range": {
                    "start": { "line": range.start_line, "character": range.start_character },
                    "end": { "line": range.end_line, "character": range.end_character },
                },
                "text": text,
            }),
            None => json!({ "text": text }),
        };
        self.notify(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri.as_str(), "version": version },
                "contentChanges": [change],
            }),
        )
        .await
    }

    async fn close_document(&self, uri: &Url) -> Result<()> {
        self.notify(
            "textDocument/didClose",
            json!({ "textDocument": { "uri": uri.as_str() } }),
        )
        .await
    }

    async fn shutdown(&self) -> Result<()> {
        // Best effort: a crashed server will fail both of these.
        let _ = self
            .request("shutdown", Value::Null, Duration::from_secs(1))
            .await;
        let _ = self.notify("exit", Value::Null).await;
        Ok(())
    }
}

impl Drop for ProcessServer {
    fn drop(&mut self) {
        // Aborting the waiter drops the child handle, which kills the
        // process (kill_on_drop).
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn read_loop(
    stdout: ChildStdout,
    pending: PendingMap,
    diagnostics: mpsc::UnboundedSender<DiagnosticsEvent>,
) {
    let mut reader = BufReader::new(stdout);
    loop {
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
        if content_length == 0 {
            continue;
        }

        let mut body = vec![0u8; content_length];
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }
        let Ok(message) = serde_json::from_slice::<Value>(&body) else {
            continue;
        };

        if let Some(id) = message.get("id").and_then(Value::as_u64) {
            if let Some(tx) = pending.lock().unwrap().remove(&id) {
                let result = message.get("result").cloned().unwrap_or(Value::Null);
                let _ = tx.send(result);
            }
        } else if message.get("method").and_then(Value::as_str)
            == Some("textDocument/publishDiagnostics")
        {
            let params = message.get("params").cloned().unwrap_or(Value::Null);
            let path = params
                .get("uri")
                .and_then(Value::as_str)
                .and_then(|s| Url::parse(s).ok())
                .and_then(|u| u.to_file_path().ok())
                .unwrap_or_default();
            let diags = params.get("diagnostics").cloned().unwrap_or(Value::Null);
            let _ = diagnostics.send(DiagnosticsEvent {
                path,
                diagnostics: diags,
            });
        }
    }
}
