//! Shared headless browser with lazy start and idle eviction
//!
//! At most one browser process is live at a time. The first `browse` starts
//! it; concurrent callers queue behind that start and share the result. A
//! watchdog evicts the process once it has been idle for the configured
//! threshold and no call is using it.
//!
//! ```text
//! Absent ──acquire──► Starting ──ok──► Live ──idle / close──► Absent
//!                        │
//!                        └──error──► Absent (queued callers get the same error)
//! ```

mod chrome;

pub use chrome::ChromeLauncher;

use super::text::clip_chars;
use super::url::normalize_url;
use crate::config::BrowserConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Maximum characters returned from one page
pub const MAX_BODY_CHARS: usize = 4000;

/// Idle threshold used when none is configured
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Per-navigation timeout used when none is configured
pub const DEFAULT_NAV_TIMEOUT: Duration = Duration::from_secs(45);

/// How often the watchdog looks for an idle browser
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

/// Browse a page and return its visible text
#[async_trait]
pub trait BrowseTool: Send + Sync {
    async fn browse(&self, url: &str) -> Result<String>;
}

/// Starts browser processes.
///
/// On error the launcher must have released everything it created.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>>;
}

/// A live browser process
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in a fresh tab and return `document.body.innerText`
    async fn page_text(&self, url: &str) -> Result<String>;

    /// Stop the process and release its resources
    async fn shutdown(&self);
}

/// Command-line profile for the browser process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub headless: bool,
    pub disable_gpu: bool,
    pub no_sandbox: bool,
    pub disable_dev_shm_usage: bool,
}

impl LaunchProfile {
    /// Profile for small single-board hosts
    pub fn constrained_host() -> Self {
        Self {
            headless: true,
            disable_gpu: true,
            no_sandbox: true,
            disable_dev_shm_usage: true,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-background-networking",
            "--disable-extensions",
            "--disable-sync",
            "--hide-scrollbars",
            "--mute-audio",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if self.headless {
            args.push("--headless=new".to_string());
        }
        if self.disable_gpu {
            args.push("--disable-gpu".to_string());
        }
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        if self.disable_dev_shm_usage {
            args.push("--disable-dev-shm-usage".to_string());
        }
        args
    }
}

/// Browser status for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrowserStats {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub idle_timeout_seconds: u64,
}

struct BrowserState {
    session: Option<Arc<dyn BrowserSession>>,
    last_used: Option<Instant>,
    last_used_at: Option<DateTime<Utc>>,
    /// Attempt number and message of the most recent failed start
    last_start_error: Option<(u64, String)>,
}

struct BrowserInner {
    launcher: Arc<dyn BrowserLauncher>,
    profile: LaunchProfile,
    idle_timeout: Duration,
    nav_timeout: Duration,
    state: Mutex<BrowserState>,
    completed_starts: AtomicU64,
    in_flight: AtomicUsize,
}

/// Lazily started, idle-evicted browser shared by all callers
pub struct Browser {
    inner: Arc<BrowserInner>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Browser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Browser")
            .field("profile", &self.inner.profile)
            .field("idle_timeout", &self.inner.idle_timeout)
            .field("nav_timeout", &self.inner.nav_timeout)
            .field("in_flight", &self.inner.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Marks a browser as in use until dropped
struct BrowserLease {
    session: Arc<dyn BrowserSession>,
    inner: Arc<BrowserInner>,
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Browser {
    /// Create a browser manager and start its idle watchdog.
    ///
    /// Zero durations fall back to the defaults. Must be called inside a
    /// tokio runtime.
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        idle_timeout: Duration,
        nav_timeout: Duration,
    ) -> Self {
        let idle_timeout = if idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            idle_timeout
        };
        let nav_timeout = if nav_timeout.is_zero() {
            DEFAULT_NAV_TIMEOUT
        } else {
            nav_timeout
        };

        let inner = Arc::new(BrowserInner {
            launcher,
            profile: LaunchProfile::constrained_host(),
            idle_timeout,
            nav_timeout,
            state: Mutex::new(BrowserState {
                session: None,
                last_used: None,
                last_used_at: None,
                last_start_error: None,
            }),
            completed_starts: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        });

        let cancel = CancellationToken::new();
        let watchdog = tokio::spawn(run_watchdog(inner.clone(), cancel.clone()));

        Self {
            inner,
            watchdog: Mutex::new(Some(watchdog)),
            cancel,
        }
    }

    /// Browser backed by a local Chromium
    pub fn from_config(config: &BrowserConfig) -> Self {
        let seconds = |value: i64| Duration::from_secs(value.max(0) as u64);
        Self::new(
            Arc::new(ChromeLauncher::new(config.executable.clone())),
            seconds(config.idle_timeout_seconds),
            seconds(config.nav_timeout_seconds),
        )
    }

    pub async fn stats(&self) -> BrowserStats {
        let state = self.inner.state.lock().await;
        BrowserStats {
            active: state.session.is_some(),
            last_used: state.last_used_at,
            idle_timeout_seconds: self.inner.idle_timeout.as_secs(),
        }
    }

    /// Evict the browser if it has been idle long enough; true if evicted
    pub async fn evict_if_idle(&self) -> bool {
        self.inner.evict_if_idle().await
    }

    /// Stop the watchdog and tear down any live browser.
    ///
    /// Safe to call more than once. A later `browse` starts a fresh process.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.watchdog.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Browser watchdog ended abnormally: {}", e);
            }
        }

        let mut state = self.inner.state.lock().await;
        self.inner.teardown(&mut state, "shutdown").await;
        Ok(())
    }

    async fn acquire(&self) -> Result<BrowserLease> {
        let seen_starts = self.inner.completed_starts.load(Ordering::SeqCst);
        let mut state = self.inner.state.lock().await;

        if state.session.is_none() {
            // A start finished while this caller was queued; share its failure.
            let completed = self.inner.completed_starts.load(Ordering::SeqCst);
            if completed > seen_starts {
                if let Some((attempt, message)) = &state.last_start_error {
                    if *attempt == completed {
                        return Err(Error::Browser(message.clone()));
                    }
                }
            }

            let attempt = completed + 1;
            tracing::info!(attempt, "Starting headless browser");
            let launched = self.inner.launcher.launch(&self.inner.profile).await;
            self.inner.completed_starts.store(attempt, Ordering::SeqCst);

            match launched {
                Ok(session) => {
                    state.session = Some(Arc::from(session));
                    state.last_start_error = None;
                    tracing::info!("Browser started");
                }
                Err(e) => {
                    let message = format!("start browser: {}", e);
                    tracing::warn!(attempt, "{}", message);
                    state.last_start_error = Some((attempt, message.clone()));
                    return Err(Error::Browser(message));
                }
            }
        }

        let session = match &state.session {
            Some(session) => session.clone(),
            None => return Err(Error::Internal("browser missing after start".to_string())),
        };
        BrowserInner::mark_used(&mut state);
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        Ok(BrowserLease {
            session,
            inner: self.inner.clone(),
        })
    }

    async fn touch(&self) {
        let mut state = self.inner.state.lock().await;
        if state.session.is_some() {
            BrowserInner::mark_used(&mut state);
        }
    }
}

impl BrowserInner {
    fn mark_used(state: &mut BrowserState) {
        state.last_used = Some(Instant::now());
        state.last_used_at = Some(Utc::now());
    }

    async fn evict_if_idle(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.session.is_none() || self.in_flight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        match state.last_used {
            Some(last_used) if last_used.elapsed() < self.idle_timeout => false,
            _ => {
                self.teardown(&mut state, "idle timeout").await;
                true
            }
        }
    }

    /// The only path that stops a live browser
    async fn teardown(&self, state: &mut BrowserState, reason: &str) {
        let Some(session) = state.session.take() else {
            return;
        };
        state.last_used = None;
        state.last_used_at = None;
        session.shutdown().await;
        tracing::info!(reason, "Browser stopped");
    }
}

async fn run_watchdog(inner: Arc<BrowserInner>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + WATCHDOG_INTERVAL, WATCHDOG_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                inner.evict_if_idle().await;
            }
        }
    }
    tracing::debug!("Browser watchdog stopped");
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl BrowseTool for Browser {
    async fn browse(&self, url: &str) -> Result<String> {
        let target = normalize_url(url)?;
        let lease = self.acquire().await?;

        let result = tokio::time::timeout(self.inner.nav_timeout, lease.session.page_text(&target)).await;
        self.touch().await;
        drop(lease);

        let body = match result {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return Err(Error::Browser(format!("browse {}: {}", target, e))),
            Err(_) => {
                return Err(Error::Browser(format!(
                    "browse {}: navigation timed out after {}s",
                    target,
                    self.inner.nav_timeout.as_secs()
                )))
            }
        };

        let text = clip_chars(body.trim(), MAX_BODY_CHARS);
        tracing::debug!(url = %target, chars = text.chars().count(), "Browse completed");
        Ok(text)
    }
}
