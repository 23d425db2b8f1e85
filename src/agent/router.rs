//! Message processing and tool dispatch

use super::buffer::{ConversationBuffer, DEFAULT_MEMORY_CAPACITY};
use crate::channels::{Message, Processor};
use crate::config::DEFAULT_SYSTEM_PROMPT;
use crate::error::{Error, Result};
use crate::session::{fan_out_keys, SessionStore};
use crate::tools::{truncate_with_marker, BrowseTool, WebFetch};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Maximum characters of tool output placed in a reply
pub const MAX_REPLY_CHARS: usize = 1200;

/// Reply when `/fetch` has no target
pub const FETCH_USAGE_REPLY: &str = "Provide a URL after /fetch.";

/// Reply when `/browse` has no target
pub const BROWSE_USAGE_REPLY: &str = "Provide a URL after /browse.";

/// Reply when `/browse` cannot fall back to a browser
pub const BROWSER_UNAVAILABLE_REPLY: &str = "Browser tool unavailable.";

/// Message counts for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub in_memory_messages: usize,
    pub stored_sessions: usize,
    pub stored_messages: usize,
}

/// Recognized chat commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Status,
    Fetch(&'a str),
    Browse(&'a str),
    Chat,
}

impl<'a> Command<'a> {
    fn parse(text: &'a str) -> Self {
        let text = text.trim();
        let (word, rest) = match text.find(char::is_whitespace) {
            Some(idx) => (&text[..idx], text[idx..].trim()),
            None => (text, ""),
        };

        let word = word.to_lowercase();
        if word.starts_with("/status") {
            return Command::Status;
        }

        // Group chats address commands as `/cmd@BotName`.
        let command = match word.split_once('@') {
            Some((command, _bot)) => command,
            None => word.as_str(),
        };

        match command {
            "/fetch" => Command::Fetch(rest),
            "/browse" => Command::Browse(rest),
            _ => Command::Chat,
        }
    }
}

/// Shared processor behind every channel
pub struct AgentRouter {
    system_prompt: String,
    memory: ConversationBuffer,
    store: Option<Arc<SessionStore>>,
    fetcher: Option<Arc<dyn WebFetch>>,
    browser: Option<Arc<dyn BrowseTool>>,
}

impl AgentRouter {
    /// Create a router; a blank prompt falls back to the default persona
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let system_prompt = if system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT.to_string()
        } else {
            system_prompt
        };

        Self {
            system_prompt,
            memory: ConversationBuffer::new(DEFAULT_MEMORY_CAPACITY),
            store: None,
            fetcher: None,
            browser: None,
        }
    }

    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn WebFetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowseTool>) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory = ConversationBuffer::new(capacity);
        self
    }

    /// Persona prompt for model-backed replies
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Stored history of a session; empty without a store
    pub async fn history(&self, session_key: &str) -> Vec<Message> {
        match &self.store {
            Some(store) => store.history(session_key).await,
            None => Vec::new(),
        }
    }

    pub async fn stats(&self) -> AgentStats {
        let mut stats = AgentStats {
            in_memory_messages: self.memory.len().await,
            ..Default::default()
        };
        if let Some(store) = &self.store {
            stats.stored_sessions = store.session_count().await;
            stats.stored_messages = store.total_message_count().await;
        }
        stats
    }

    /// Buffer the message, then persist it under every fan-out key.
    async fn remember(&self, message: &Message) -> usize {
        let memory_size = self.memory.push(message.clone()).await;

        if let Some(store) = &self.store {
            for key in fan_out_keys(message) {
                if let Err(e) = store.add_message(&key, message.clone()).await {
                    tracing::warn!(session = %key, "Failed to persist message: {}", e);
                }
            }
        }

        memory_size
    }

    async fn status_reply(&self) -> String {
        let stats = self.stats().await;
        format!(
            "ClawKangsar status: memory={} sessions={} stored_messages={}",
            stats.in_memory_messages, stats.stored_sessions, stats.stored_messages
        )
    }

    async fn browse(&self, target: &str) -> Result<String> {
        if target.is_empty() {
            return Ok(BROWSE_USAGE_REPLY.to_string());
        }

        if let Some(fetcher) = &self.fetcher {
            match fetcher.fetch(target).await {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok(truncate_with_marker(&text, MAX_REPLY_CHARS))
                }
                Ok(_) => tracing::debug!(url = %target, "Fetch returned no text, trying browser"),
                Err(e) => tracing::debug!(url = %target, "Fetch failed, trying browser: {}", e),
            }
        }

        let Some(browser) = &self.browser else {
            return Ok(BROWSER_UNAVAILABLE_REPLY.to_string());
        };

        let text = browser
            .browse(target)
            .await
            .map_err(|e| Error::Browser(format!("browse failed: {}", e)))?;
        Ok(truncate_with_marker(&text, MAX_REPLY_CHARS))
    }
}

#[async_trait]
impl Processor for AgentRouter {
    async fn process(&self, message: Message) -> Result<String> {
        let message = message.normalized();
        if message.text.is_empty() {
            return Ok(String::new());
        }

        let memory_size = self.remember(&message).await;

        match Command::parse(&message.text) {
            Command::Status => Ok(self.status_reply().await),
            Command::Fetch(target) => match &self.fetcher {
                Some(_) if target.is_empty() => Ok(FETCH_USAGE_REPLY.to_string()),
                Some(fetcher) => {
                    let text = fetcher.fetch(target).await?;
                    Ok(truncate_with_marker(&text, MAX_REPLY_CHARS))
                }
                None => Ok(ready_reply(&message, memory_size)),
            },
            Command::Browse(target) => self.browse(target).await,
            Command::Chat => Ok(ready_reply(&message, memory_size)),
        }
    }
}

fn ready_reply(message: &Message, memory_size: usize) -> String {
    format!(
        "ClawKangsar ready. Channel={} memory={}",
        message.channel, memory_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::GLOBAL_SESSION_KEY;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubFetch {
        reply: std::result::Result<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl StubFetch {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WebFetch for StubFetch {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.calls.lock().unwrap().push(url.to_string());
            self.reply.clone().map_err(Error::Fetch)
        }
    }

    struct StubBrowser {
        reply: std::result::Result<String, String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BrowseTool for StubBrowser {
        async fn browse(&self, _url: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(Error::Browser)
        }
    }

    fn stub_browser(reply: std::result::Result<&str, &str>) -> Arc<StubBrowser> {
        Arc::new(StubBrowser {
            reply: reply.map(str::to_string).map_err(str::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    fn telegram(chat: &str, text: &str) -> Message {
        Message::new("telegram", "100", chat, text)
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(Command::parse("/status"), Command::Status);
        assert_eq!(Command::parse("/STATUS now"), Command::Status);
        assert_eq!(Command::parse("/Fetch  example.com "), Command::Fetch("example.com"));
        assert_eq!(Command::parse("/fetch"), Command::Fetch(""));
        assert_eq!(Command::parse("/browse\texample.com"), Command::Browse("example.com"));
        assert_eq!(Command::parse("/fetcher x"), Command::Chat);
        assert_eq!(Command::parse("hello"), Command::Chat);
    }

    #[test]
    fn test_group_chat_command_forms() {
        assert_eq!(Command::parse("/status@ClawKangsarBot"), Command::Status);
        assert_eq!(Command::parse("/status,"), Command::Status);
        assert_eq!(
            Command::parse("/fetch@ClawKangsarBot example.com"),
            Command::Fetch("example.com")
        );
        assert_eq!(Command::parse("/Browse@Bot"), Command::Browse(""));
        assert_eq!(Command::parse("/fetcher@Bot x"), Command::Chat);
    }

    #[tokio::test]
    async fn test_fetch_end_to_end() {
        let store = Arc::new(SessionStore::in_memory());
        let fetcher = StubFetch::ok("hello world");
        let router = AgentRouter::new("")
            .with_store(store.clone())
            .with_fetcher(fetcher.clone());

        let reply = router
            .process(Message::new("telegram", "", "7", "/fetch example.com"))
            .await
            .unwrap();

        assert_eq!(reply, "hello world");
        assert_eq!(*fetcher.calls.lock().unwrap(), vec!["example.com"]);

        let chat = store.history("telegram:7").await;
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].text, "/fetch example.com");
        let global = store.history(GLOBAL_SESSION_KEY).await;
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].text, "/fetch example.com");
    }

    #[tokio::test]
    async fn test_empty_text_is_ignored() {
        let store = Arc::new(SessionStore::in_memory());
        let router = AgentRouter::new("").with_store(store.clone());

        assert_eq!(router.process(telegram("1", "   ")).await.unwrap(), "");
        assert_eq!(router.stats().await, AgentStats::default());
    }

    #[tokio::test]
    async fn test_default_reply_and_fan_out() {
        let store = Arc::new(SessionStore::in_memory());
        let router = AgentRouter::new("").with_store(store.clone());

        assert_eq!(
            router.process(telegram("1", " hi ")).await.unwrap(),
            "ClawKangsar ready. Channel=telegram memory=1"
        );
        router.process(telegram("2", "hello")).await.unwrap();
        router
            .process(Message::new("", "55", "", "anonymous chat"))
            .await
            .unwrap();
        router.process(Message::new("", "", "", "nobody")).await.unwrap();

        assert_eq!(store.history("telegram:1").await[0].text, "hi");
        assert_eq!(store.history("user:55").await.len(), 1);
        assert_eq!(store.history(GLOBAL_SESSION_KEY).await.len(), 4);
        assert_eq!(
            router.stats().await,
            AgentStats {
                in_memory_messages: 4,
                stored_sessions: 4,
                stored_messages: 7,
            }
        );
    }

    #[tokio::test]
    async fn test_status_reply() {
        let store = Arc::new(SessionStore::in_memory());
        let router = AgentRouter::new("").with_store(store);

        router.process(telegram("1", "hello")).await.unwrap();
        assert_eq!(
            router.process(telegram("1", "/status")).await.unwrap(),
            "ClawKangsar status: memory=2 sessions=2 stored_messages=4"
        );
        assert_eq!(
            router.process(telegram("1", "/status@ClawKangsarBot")).await.unwrap(),
            "ClawKangsar status: memory=3 sessions=2 stored_messages=6"
        );
    }

    #[tokio::test]
    async fn test_memory_is_bounded() {
        let router = AgentRouter::new("").with_memory_capacity(3);
        for i in 0..10 {
            router.process(telegram("1", &format!("m{}", i))).await.unwrap();
        }
        let reply = router.process(telegram("1", "last")).await.unwrap();

        assert_eq!(reply, "ClawKangsar ready. Channel=telegram memory=3");
        assert_eq!(router.stats().await.in_memory_messages, 3);
        assert_eq!(router.stats().await.stored_sessions, 0);
    }

    #[tokio::test]
    async fn test_fetch_usage_and_errors() {
        let router = AgentRouter::new("").with_fetcher(StubFetch::failing("status 500"));
        assert_eq!(router.process(telegram("1", "/fetch")).await.unwrap(), FETCH_USAGE_REPLY);
        assert!(matches!(
            router.process(telegram("1", "/fetch example.com")).await,
            Err(Error::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_without_tool_is_chat() {
        let router = AgentRouter::new("");
        let reply = router.process(telegram("1", "/fetch example.com")).await.unwrap();
        assert!(reply.starts_with("ClawKangsar ready."));
    }

    #[tokio::test]
    async fn test_fetch_output_truncated() {
        let router = AgentRouter::new("").with_fetcher(StubFetch::ok(&"é".repeat(2000)));
        let reply = router.process(telegram("1", "/fetch example.com")).await.unwrap();

        assert!(reply.ends_with("..."));
        assert_eq!(reply.chars().count(), MAX_REPLY_CHARS + 3);
    }

    #[tokio::test]
    async fn test_browse_prefers_fetch() {
        let browser = stub_browser(Ok("rendered"));
        let router = AgentRouter::new("")
            .with_fetcher(StubFetch::ok("static text"))
            .with_browser(browser.clone());

        assert_eq!(router.process(telegram("1", "/browse example.com")).await.unwrap(), "static text");
        assert_eq!(browser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_browse_falls_back_to_browser() {
        let browser = stub_browser(Ok("rendered"));
        let router = AgentRouter::new("")
            .with_fetcher(StubFetch::ok("   "))
            .with_browser(browser.clone());
        assert_eq!(router.process(telegram("1", "/browse example.com")).await.unwrap(), "rendered");

        let router = AgentRouter::new("")
            .with_fetcher(StubFetch::failing("timeout"))
            .with_browser(browser.clone());
        assert_eq!(router.process(telegram("1", "/browse example.com")).await.unwrap(), "rendered");
        assert_eq!(browser.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_browse_without_browser() {
        let router = AgentRouter::new("").with_fetcher(StubFetch::failing("blocked"));
        assert_eq!(router.process(telegram("1", "/browse")).await.unwrap(), BROWSE_USAGE_REPLY);
        assert_eq!(
            router.process(telegram("1", "/browse example.com")).await.unwrap(),
            BROWSER_UNAVAILABLE_REPLY
        );
    }

    #[tokio::test]
    async fn test_browse_failure_is_wrapped() {
        let router = AgentRouter::new("").with_browser(stub_browser(Err("chromium missing")));
        let err = router.process(telegram("1", "/browse example.com")).await.unwrap_err();
        assert!(err.to_string().contains("browse failed: "));
        assert!(err.to_string().contains("chromium missing"));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_reply() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("sessions");
        let store = Arc::new(SessionStore::new(Some(root.clone())).await.unwrap());
        let router = AgentRouter::new("").with_store(store.clone());

        std::fs::remove_dir_all(&root).unwrap();
        let reply = router.process(telegram("1", "still works")).await.unwrap();

        assert!(reply.starts_with("ClawKangsar ready."));
        assert_eq!(store.history("telegram:1").await.len(), 1);
    }

    #[test]
    fn test_system_prompt() {
        assert_eq!(AgentRouter::new("  ").system_prompt(), DEFAULT_SYSTEM_PROMPT);
        assert_eq!(AgentRouter::new("Be brief.").system_prompt(), "Be brief.");
    }

    #[tokio::test]
    async fn test_history_passthrough() {
        let router = AgentRouter::new("");
        router.process(telegram("1", "hi")).await.unwrap();
        assert!(router.history("telegram:1").await.is_empty());

        let store = Arc::new(SessionStore::in_memory());
        let router = AgentRouter::new("").with_store(store);
        router.process(telegram("1", "hi")).await.unwrap();
        assert_eq!(router.history("telegram:1").await.len(), 1);
    }
}
