//! Gateway runtime
//!
//! Wires the session store, tools, agent router and channel adapters
//! together, runs them until cancelled, then shuts down in order:
//! channels and the health server stop first, the browser is closed, and
//! the session store is flushed last.

use super::handler::health_router;
use super::status::StatusTracker;
use crate::agent::AgentRouter;
use crate::channels::{ChannelAdapter, Processor, TelegramAdapter};
use crate::config::ClawConfig;
use crate::error::{Error, Result};
use crate::session::SessionStore;
use crate::tools::browser::BrowserLauncher;
use crate::tools::{Browser, WebFetch, WebFetcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Application name reported by the status endpoint
pub const APP_NAME: &str = "ClawKangsar";

/// ClawKangsar gateway runtime
pub struct Gateway {
    config: ClawConfig,
    store: Arc<SessionStore>,
    browser: Arc<Browser>,
    agent: Arc<AgentRouter>,
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    tracker: Arc<StatusTracker>,
}

impl Gateway {
    /// Build the runtime from configuration
    pub async fn new(config: ClawConfig) -> Result<Self> {
        GatewayBuilder::new().config(config).build().await
    }

    pub fn config(&self) -> &ClawConfig {
        &self.config
    }

    pub fn agent(&self) -> &Arc<AgentRouter> {
        &self.agent
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn browser(&self) -> &Arc<Browser> {
        &self.browser
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    /// Names of the configured channel adapters
    pub fn channel_names(&self) -> Vec<String> {
        self.adapters.iter().map(|a| a.name().to_string()).collect()
    }

    /// Run every adapter and the health server until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if self.config.health.enabled {
            tasks.push(self.spawn_health_server(shutdown.clone()));
        }

        if self.adapters.is_empty() {
            tracing::warn!("No gateway enabled; set telegram.enabled in the config file");
        }
        for adapter in &self.adapters {
            tasks.push(self.spawn_adapter(adapter.clone(), shutdown.clone()));
        }

        tracing::info!(
            channels = ?self.channel_names(),
            "{} gateway running",
            APP_NAME
        );

        shutdown.cancelled().await;
        tracing::info!("Shutdown signal received");

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("Gateway task ended abnormally: {}", e);
            }
        }

        self.shutdown().await
    }

    /// Close the browser, then flush every session to disk
    pub async fn shutdown(&self) -> Result<()> {
        self.browser.close().await?;
        self.store.flush().await?;
        tracing::info!("{} stopped", APP_NAME);
        Ok(())
    }

    fn spawn_adapter(
        &self,
        adapter: Arc<dyn ChannelAdapter>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = self.tracker.clone();
        let processor: Arc<dyn Processor> = self.agent.clone();

        tokio::spawn(async move {
            let name = adapter.name().to_string();
            tracker.set_running(&name, true).await;

            let result = adapter.run(processor, shutdown).await;
            tracker.set_running(&name, false).await;
            match result {
                Ok(()) => tracing::info!(gateway = %name, "Gateway stopped"),
                Err(e) => {
                    tracing::error!(gateway = %name, "Gateway stopped with error: {}", e);
                    tracker.set_error(&name, &e).await;
                }
            }
        })
    }

    fn spawn_health_server(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let addr = format!("{}:{}", self.config.health.host, self.config.health.port);
        let app = health_router(self.tracker.clone());

        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(addr = %addr, "Failed to bind health server: {}", e);
                    return;
                }
            };

            tracing::info!(addr = %addr, "Health server started");
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match served {
                Ok(()) => tracing::info!(addr = %addr, "Health server stopped"),
                Err(e) => tracing::error!(addr = %addr, "Health server stopped with error: {}", e),
            }
        })
    }
}

/// Builder for [`Gateway`]
pub struct GatewayBuilder {
    config: ClawConfig,
    adapters: Option<Vec<Arc<dyn ChannelAdapter>>>,
    launcher: Option<Arc<dyn BrowserLauncher>>,
    fetcher: Option<Arc<dyn WebFetch>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            config: ClawConfig::default(),
            adapters: None,
            launcher: None,
            fetcher: None,
        }
    }

    pub fn config(mut self, config: ClawConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the adapters derived from configuration
    pub fn adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.get_or_insert_with(Vec::new).push(adapter);
        self
    }

    /// Start browsers with this launcher instead of a local Chromium
    pub fn browser_launcher(mut self, launcher: Arc<dyn BrowserLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn WebFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Build the gateway; loads stored sessions from disk
    pub async fn build(self) -> Result<Gateway> {
        let mut config = self.config;
        config.normalize();

        let store = Arc::new(SessionStore::new(Some(config.storage.session_dir.clone())).await?);

        let browser = Arc::new(match self.launcher {
            Some(launcher) => Browser::new(
                launcher,
                Duration::from_secs(config.browser.idle_timeout_seconds as u64),
                Duration::from_secs(config.browser.nav_timeout_seconds as u64),
            ),
            None => Browser::from_config(&config.browser),
        });

        let fetcher: Arc<dyn WebFetch> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(WebFetcher::from_config(&config.tools)?),
        };

        let agent = Arc::new(
            AgentRouter::new(config.system_prompt.clone())
                .with_store(store.clone())
                .with_fetcher(fetcher)
                .with_browser(browser.clone()),
        );

        let adapters = match self.adapters {
            Some(adapters) => adapters,
            None => adapters_from_config(&config)?,
        };

        let tracker = Arc::new(
            StatusTracker::new(
                APP_NAME,
                env!("CARGO_PKG_VERSION"),
                adapters.iter().map(|a| a.name().to_string()),
            )
            .with_agent(agent.clone())
            .with_browser(browser.clone()),
        );

        Ok(Gateway {
            config,
            store,
            browser,
            agent,
            adapters,
            tracker,
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn adapters_from_config(config: &ClawConfig) -> Result<Vec<Arc<dyn ChannelAdapter>>> {
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();

    if config.telegram.enabled {
        let telegram = TelegramAdapter::new(config.telegram.clone())
            .map_err(|e| Error::Config(format!("telegram: {}", e)))?;
        adapters.push(Arc::new(telegram));
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Message;
    use crate::tools::browser::{BrowserSession, LaunchProfile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sends one message through the processor, then waits for shutdown
    struct OneShotAdapter {
        name: &'static str,
        text: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl ChannelAdapter for OneShotAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, processor: Arc<dyn Processor>, shutdown: CancellationToken) -> Result<()> {
            if self.fail {
                return Err(Error::Channel("token rejected".to_string()));
            }
            processor
                .process(Message::new(self.name, "1", "9", self.text))
                .await?;
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct CountingLauncher {
        shutdowns: Arc<AtomicUsize>,
    }

    struct CountingSession {
        shutdowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        async fn launch(&self, _profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>> {
            Ok(Box::new(CountingSession {
                shutdowns: self.shutdowns.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for CountingSession {
        async fn page_text(&self, url: &str) -> Result<String> {
            Ok(format!("rendered {}", url))
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct EmptyFetch;

    #[async_trait]
    impl WebFetch for EmptyFetch {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn test_config(dir: &std::path::Path) -> ClawConfig {
        let mut config = ClawConfig::default();
        config.health.enabled = false;
        config.storage.session_dir = dir.join("sessions");
        config
    }

    #[tokio::test]
    async fn test_build_from_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Gateway::new(test_config(dir.path())).await.unwrap();

        assert!(gateway.channel_names().is_empty());
        assert!(gateway.tracker().ready().await);
        assert_eq!(gateway.store().storage_dir(), Some(dir.path().join("sessions").as_path()));
        assert!(!gateway.browser().stats().await.active);
    }

    #[tokio::test]
    async fn test_enabled_telegram_requires_token() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.telegram.enabled = true;

        assert!(matches!(Gateway::new(config).await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_run_processes_and_shuts_down_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let gateway = Arc::new(
            GatewayBuilder::new()
                .config(test_config(dir.path()))
                .adapter(Arc::new(OneShotAdapter {
                    name: "fake",
                    text: "/browse example.com",
                    fail: false,
                }))
                .browser_launcher(Arc::new(CountingLauncher {
                    shutdowns: shutdowns.clone(),
                }))
                .fetcher(Arc::new(EmptyFetch))
                .build()
                .await
                .unwrap(),
        );

        let shutdown = CancellationToken::new();
        let run = {
            let gateway = gateway.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gateway.run(shutdown).await })
        };

        while !gateway.browser().stats().await.active {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(gateway.tracker().ready().await);
        assert_eq!(gateway.store().session_count().await, 2);

        shutdown.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(!gateway.tracker().ready().await);
        assert!(dir.path().join("sessions/fake_9.json").exists());
        assert!(dir.path().join("sessions/global.json").exists());
    }

    #[tokio::test]
    async fn test_failed_adapter_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(
            GatewayBuilder::new()
                .config(test_config(dir.path()))
                .adapter(Arc::new(OneShotAdapter {
                    name: "broken",
                    text: "",
                    fail: true,
                }))
                .build()
                .await
                .unwrap(),
        );

        let shutdown = CancellationToken::new();
        let run = {
            let gateway = gateway.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { gateway.run(shutdown).await })
        };

        loop {
            let snapshot = gateway.tracker().snapshot().await;
            if snapshot.gateways["broken"].last_error.is_some() {
                assert!(!snapshot.ready);
                assert!(!snapshot.gateways["broken"].running);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.cancel();
        run.await.unwrap().unwrap();
    }
}
