//! Runtime status aggregation for the health endpoints

use crate::agent::{AgentRouter, AgentStats};
use crate::tools::{Browser, BrowserStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// State of one channel gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayRuntime {
    pub configured: bool,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
}

impl GatewayRuntime {
    fn configured() -> Self {
        Self {
            configured: true,
            running: false,
            last_error: None,
            last_change: Utc::now(),
        }
    }
}

/// Point-in-time view of the whole process
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub app: String,
    pub version: String,
    pub ready: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub gateways: BTreeMap<String, GatewayRuntime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserStats>,
}

/// Tracks gateway transitions and assembles [`RuntimeStatus`] on demand
pub struct StatusTracker {
    app: String,
    version: String,
    started_at: DateTime<Utc>,
    started: Instant,
    gateways: RwLock<BTreeMap<String, GatewayRuntime>>,
    agent: Option<Arc<AgentRouter>>,
    browser: Option<Arc<Browser>>,
}

impl StatusTracker {
    /// Create a tracker with every named gateway configured and stopped
    pub fn new<I, S>(app: impl Into<String>, version: impl Into<String>, gateways: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateways = gateways
            .into_iter()
            .map(|name| (name.into(), GatewayRuntime::configured()))
            .collect();

        Self {
            app: app.into(),
            version: version.into(),
            started_at: Utc::now(),
            started: Instant::now(),
            gateways: RwLock::new(gateways),
            agent: None,
            browser: None,
        }
    }

    pub fn with_agent(mut self, agent: Arc<AgentRouter>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_browser(mut self, browser: Arc<Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Record a running transition; starting clears the last error
    pub async fn set_running(&self, name: &str, running: bool) {
        let mut gateways = self.gateways.write().await;
        let state = gateways
            .entry(name.to_string())
            .or_insert_with(GatewayRuntime::configured);
        state.running = running;
        state.last_change = Utc::now();
        if running {
            state.last_error = None;
        }
    }

    pub async fn set_error(&self, name: &str, error: impl std::fmt::Display) {
        let mut gateways = self.gateways.write().await;
        let state = gateways
            .entry(name.to_string())
            .or_insert_with(GatewayRuntime::configured);
        state.last_error = Some(error.to_string());
        state.last_change = Utc::now();
    }

    /// Ready when nothing is configured or any configured gateway runs
    pub async fn ready(&self) -> bool {
        Self::ready_from(&*self.gateways.read().await)
    }

    fn ready_from(gateways: &BTreeMap<String, GatewayRuntime>) -> bool {
        let mut configured = gateways.values().filter(|g| g.configured).peekable();
        if configured.peek().is_none() {
            return true;
        }
        gateways.values().any(|g| g.configured && g.running)
    }

    pub async fn snapshot(&self) -> RuntimeStatus {
        let gateways = self.gateways.read().await.clone();
        let agent = match &self.agent {
            Some(agent) => Some(agent.stats().await),
            None => None,
        };
        let browser = match &self.browser {
            Some(browser) => Some(browser.stats().await),
            None => None,
        };

        RuntimeStatus {
            app: self.app.clone(),
            version: self.version.clone(),
            ready: Self::ready_from(&gateways),
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs(),
            gateways,
            agent,
            browser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_without_gateways() {
        let tracker = StatusTracker::new("ClawKangsar", "0.1.0", Vec::<String>::new());
        assert!(tracker.ready().await);
        assert!(tracker.snapshot().await.gateways.is_empty());
    }

    #[tokio::test]
    async fn test_ready_follows_running_gateways() {
        let tracker = StatusTracker::new("ClawKangsar", "0.1.0", ["telegram"]);
        assert!(!tracker.ready().await);

        tracker.set_running("telegram", true).await;
        assert!(tracker.ready().await);

        tracker.set_running("telegram", false).await;
        assert!(!tracker.ready().await);
    }

    #[tokio::test]
    async fn test_error_recorded_and_cleared() {
        let tracker = StatusTracker::new("ClawKangsar", "0.1.0", ["telegram"]);

        tracker.set_running("telegram", false).await;
        tracker.set_error("telegram", "getMe failed").await;
        let snapshot = tracker.snapshot().await;
        assert_eq!(
            snapshot.gateways["telegram"].last_error.as_deref(),
            Some("getMe failed")
        );

        tracker.set_running("telegram", true).await;
        assert!(tracker.snapshot().await.gateways["telegram"].last_error.is_none());
    }

    #[tokio::test]
    async fn test_unknown_gateway_is_upserted() {
        let tracker = StatusTracker::new("ClawKangsar", "0.1.0", Vec::<String>::new());
        tracker.set_error("whatsapp", "not paired").await;

        let snapshot = tracker.snapshot().await;
        let gateway = &snapshot.gateways["whatsapp"];
        assert!(gateway.configured);
        assert!(!gateway.running);
        assert!(!snapshot.ready);
    }

    #[tokio::test]
    async fn test_snapshot_serializes_agent_stats() {
        let agent = Arc::new(AgentRouter::new(""));
        let tracker = StatusTracker::new("ClawKangsar", "0.1.0", ["telegram"]).with_agent(agent);
        tracker.set_running("telegram", true).await;

        let json = serde_json::to_value(tracker.snapshot().await).unwrap();
        assert_eq!(json["app"], "ClawKangsar");
        assert_eq!(json["ready"], true);
        assert_eq!(json["gateways"]["telegram"]["running"], true);
        assert!(json["gateways"]["telegram"].get("last_error").is_none());
        assert_eq!(json["agent"]["in_memory_messages"], 0);
        assert!(json.get("browser").is_none());
        assert!(json["uptime_seconds"].is_u64());
    }
}
