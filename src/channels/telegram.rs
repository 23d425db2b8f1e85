//! Telegram channel adapter (Bot API long polling)

use super::adapter::{ChannelAdapter, Processor};
use super::message::Message;
use crate::config::TelegramConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Reply sent to users outside the allow-list
pub const UNAUTHORIZED_REPLY: &str = "Unauthorized.";
/// Reply sent when the processor fails
pub const FAILURE_REPLY: &str = "Request failed.";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

/// Telegram channel adapter
pub struct TelegramAdapter {
    token: String,
    api_base: String,
    allow_list: HashSet<i64>,
    client: reqwest::Client,
}

impl TelegramAdapter {
    /// Create a new Telegram adapter
    pub fn new(config: TelegramConfig) -> Result<Self> {
        let token = config.token.trim().to_string();
        if token.is_empty() {
            return Err(Error::Config(
                "telegram token is required when telegram.enabled = true".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;

        Ok(Self {
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            allow_list: config.allow_list.into_iter().collect(),
            client,
        })
    }

    /// Point the adapter at a different Bot API host
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// An empty allow-list rejects everyone.
    fn is_user_allowed(&self, user_id: i64) -> bool {
        self.allow_list.contains(&user_id)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let response: ApiResponse<T> = self
            .client
            .post(self.method_url(method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(Error::Channel(format!(
                "telegram {} failed: {}",
                method,
                response.description.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        response
            .result
            .ok_or_else(|| Error::Channel(format!("telegram {} returned no result", method)))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({ "chat_id": chat_id, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn handle_update(&self, processor: &dyn Processor, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(from) = message.from else {
            return;
        };
        let chat_id = message.chat.id;

        if !self.is_user_allowed(from.id) {
            tracing::warn!(user_id = from.id, "Telegram user rejected by allow list");
            if let Err(e) = self.send_message(chat_id, UNAUTHORIZED_REPLY).await {
                tracing::error!(user_id = from.id, "Telegram send error: {}", e);
            }
            return;
        }

        let text = message.text.unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let inbound = Message::new("telegram", from.id.to_string(), chat_id.to_string(), text);
        let reply = match processor.process(inbound).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user_id = from.id, "Telegram processing error: {}", e);
                FAILURE_REPLY.to_string()
            }
        };

        let reply = reply.trim();
        if reply.is_empty() {
            return;
        }
        if let Err(e) = self.send_message(chat_id, reply).await {
            tracing::error!(user_id = from.id, "Telegram send error: {}", e);
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn run(&self, processor: Arc<dyn Processor>, shutdown: CancellationToken) -> Result<()> {
        let _: serde_json::Value = self.call("getMe", serde_json::json!({})).await?;
        tracing::info!("Telegram gateway started");

        let mut offset = 0;
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = self.get_updates(offset) => batch,
            };

            match batch {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        self.handle_update(processor.as_ref(), update).await;
                    }
                }
                Err(e) => {
                    tracing::warn!("Telegram polling failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        tracing::info!("Telegram gateway stopped");
        Ok(())
    }
}
