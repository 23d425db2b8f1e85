//! Chromium over the DevTools protocol
//!
//! The launcher spawns Chromium with a throwaway profile directory and
//! `--remote-debugging-port=0`, reads the DevTools WebSocket address from
//! stderr, and drives tabs with a minimal CDP client.

use super::{BrowserLauncher, BrowserSession, LaunchProfile};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const EXECUTABLE_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";
const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

const READY_EXPRESSION: &str = "document.readyState !== 'loading' && document.body !== null";
const TEXT_EXPRESSION: &str = "document.body ? document.body.innerText : \"\"";

/// Launches a local Chromium
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    profile_root: PathBuf,
}

impl ChromeLauncher {
    /// `None` searches `PATH` for a Chromium or Chrome binary
    pub fn new(executable: Option<PathBuf>) -> Self {
        Self {
            executable,
            profile_root: std::env::temp_dir(),
        }
    }

    /// Directory that receives the per-process profile directories
    pub fn with_profile_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.profile_root = root.into();
        self
    }

    /// Path of the browser binary that would be launched
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.executable {
            return Ok(path.clone());
        }

        let path_var = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&path_var)
            .flat_map(|dir| EXECUTABLE_CANDIDATES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::Browser(format!(
                    "no browser executable found in PATH (tried {})",
                    EXECUTABLE_CANDIDATES.join(", ")
                ))
            })
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>> {
        let executable = self.resolve_executable()?;
        let profile_dir = self
            .profile_root
            .join(format!("clawkangsar-chrome-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&profile_dir).await?;

        let mut command = Command::new(&executable);
        command
            .args(profile.args())
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                remove_profile_dir(&profile_dir).await;
                return Err(Error::Browser(format!(
                    "spawn {}: {}",
                    executable.display(),
                    e
                )));
            }
        };

        match connect_devtools(&mut child).await {
            Ok(connection) => {
                tracing::debug!(
                    executable = %executable.display(),
                    pid = ?child.id(),
                    "Chromium DevTools connected"
                );
                Ok(Box::new(ChromeSession {
                    connection: Arc::new(connection),
                    child: Mutex::new(Some(child)),
                    profile_dir,
                }))
            }
            Err(e) => {
                let _ = child.kill().await;
                remove_profile_dir(&profile_dir).await;
                Err(e)
            }
        }
    }
}

async fn connect_devtools(child: &mut Child) -> Result<CdpConnection> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Browser("browser stderr not captured".to_string()))?;

    let ws_url = tokio::time::timeout(STARTUP_TIMEOUT, wait_for_devtools_url(stderr))
        .await
        .map_err(|_| {
            Error::Browser(format!(
                "DevTools endpoint not announced within {}s",
                STARTUP_TIMEOUT.as_secs()
            ))
        })??;

    connect_within(&ws_url, STARTUP_TIMEOUT).await
}

async fn connect_within(ws_url: &str, limit: Duration) -> Result<CdpConnection> {
    tokio::time::timeout(limit, CdpConnection::connect(ws_url))
        .await
        .map_err(|_| {
            Error::Browser(format!(
                "DevTools connection not established within {}s",
                limit.as_secs_f32()
            ))
        })?
}

/// Read stderr until the DevTools address appears; keep draining it afterwards.
async fn wait_for_devtools_url(stderr: ChildStderr) -> Result<String> {
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(url) = devtools_url(&line) {
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::trace!(target: "chromium", "{}", line);
                }
            });
            return Ok(url);
        }
    }
    Err(Error::Browser(
        "browser exited before announcing DevTools".to_string(),
    ))
}

fn devtools_url(line: &str) -> Option<String> {
    let url = line.trim().strip_prefix(DEVTOOLS_PREFIX)?.trim();
    url.starts_with("ws://").then(|| url.to_string())
}

async fn remove_profile_dir(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), "Failed to remove browser profile: {}", e);
        }
    }
}

/// Running Chromium plus its DevTools connection
struct ChromeSession {
    connection: Arc<CdpConnection>,
    child: Mutex<Option<Child>>,
    profile_dir: PathBuf,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn page_text(&self, url: &str) -> Result<String> {
        let created = self
            .connection
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = created["targetId"]
            .as_str()
            .ok_or_else(|| Error::Browser("createTarget returned no targetId".to_string()))?
            .to_string();

        let mut tab = TabGuard {
            connection: self.connection.clone(),
            target_id: Some(target_id),
        };
        let result = tab.read_text(url).await;
        tab.close().await;
        result
    }

    async fn shutdown(&self) {
        let closed = tokio::time::timeout(
            SHUTDOWN_TIMEOUT,
            self.connection.call("Browser.close", json!({}), None),
        )
        .await;
        if !matches!(closed, Ok(Ok(_))) {
            tracing::debug!("Browser.close did not complete, killing process");
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await.is_err() {
                tracing::warn!("Chromium did not exit after kill");
            }
        }

        self.connection.close();
        remove_profile_dir(&self.profile_dir).await;
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // The child is killed on drop; only the profile directory is left.
        let _ = std::fs::remove_dir_all(&self.profile_dir);
    }
}

/// Closes its tab even when the browse future is cancelled by a timeout
struct TabGuard {
    connection: Arc<CdpConnection>,
    target_id: Option<String>,
}

impl TabGuard {
    async fn read_text(&self, url: &str) -> Result<String> {
        let target_id = self.target_id.as_deref().unwrap_or_default();
        let attached = self
            .connection
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| Error::Browser("attachToTarget returned no sessionId".to_string()))?;

        let navigated = self
            .connection
            .call("Page.navigate", json!({ "url": url }), Some(session_id))
            .await?;
        if let Some(error_text) = navigated["errorText"].as_str().filter(|t| !t.is_empty()) {
            return Err(Error::Browser(format!("navigate: {}", error_text)));
        }

        while self.evaluate(session_id, READY_EXPRESSION).await? != Value::Bool(true) {
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        match self.evaluate(session_id, TEXT_EXPRESSION).await? {
            Value::String(text) => Ok(text),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    async fn evaluate(&self, session_id: &str, expression: &str) -> Result<Value> {
        let evaluated = self
            .connection
            .call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
                Some(session_id),
            )
            .await?;

        if let Some(details) = evaluated.get("exceptionDetails") {
            return Err(Error::Browser(format!(
                "evaluate failed: {}",
                details["text"].as_str().unwrap_or("exception")
            )));
        }
        Ok(evaluated["result"]["value"].clone())
    }

    async fn close(&mut self) {
        if let Some(target_id) = self.target_id.take() {
            if let Err(e) = self
                .connection
                .call("Target.closeTarget", json!({ "targetId": target_id }), None)
                .await
            {
                tracing::debug!("Failed to close tab: {}", e);
            }
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        let Some(target_id) = self.target_id.take() else {
            return;
        };
        let connection = self.connection.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = connection
                    .call("Target.closeTarget", json!({ "targetId": target_id }), None)
                    .await;
            });
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Request/response multiplexer over one DevTools WebSocket
struct CdpConnection {
    writer: Mutex<SplitSink<WsStream, WsMessage>>,
    pending: PendingCalls,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl CdpConnection {
    async fn connect(ws_url: &str) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| Error::Browser(format!("connect DevTools {}: {}", ws_url, e)))?;
        let (writer, mut reader) = stream.split();

        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(frame) = reader.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => dispatch_reply(&pending, &text).await,
                        Ok(WsMessage::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!("DevTools connection error: {}", e);
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                for (_, reply) in pending.lock().await.drain() {
                    let _ = reply.send(Err(Error::Browser("DevTools connection closed".to_string())));
                }
            })
        };

        Ok(Self {
            writer: Mutex::new(writer),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            reader: reader_task,
        })
    }

    async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            request["sessionId"] = json!(session_id);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_tx);
        let _slot = PendingSlot {
            pending: self.pending.clone(),
            id,
        };
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Browser("DevTools connection closed".to_string()));
        }

        let sent = self
            .writer
            .lock()
            .await
            .send(WsMessage::Text(request.to_string()))
            .await;
        if let Err(e) = sent {
            return Err(Error::Browser(format!("send {}: {}", method, e)));
        }

        reply_rx
            .await
            .map_err(|_| Error::Browser("DevTools connection closed".to_string()))?
            .map_err(|e| match e {
                Error::Browser(message) => Error::Browser(format!("{}: {}", method, message)),
                other => other,
            })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader.abort();
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Drops the pending entry of a call that ends without a reply
struct PendingSlot {
    pending: PendingCalls,
    id: u64,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        let id = self.id;
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&id);
            return;
        }
        let pending = self.pending.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                pending.lock().await.remove(&id);
            });
        }
    }
}

async fn dispatch_reply(pending: &PendingCalls, text: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        tracing::debug!("Ignoring malformed DevTools frame");
        return;
    };
    // Frames without an id are protocol events.
    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        return;
    };
    let Some(reply) = pending.lock().await.remove(&id) else {
        return;
    };

    let result = match frame.get("error") {
        Some(error) => Err(Error::Browser(
            error["message"].as_str().unwrap_or("protocol error").to_string(),
        )),
        None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
    };
    let _ = reply.send(result);
}
