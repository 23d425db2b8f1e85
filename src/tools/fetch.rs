//! Lightweight HTTP fetch tool
//!
//! Used before the headless browser: most pages a user asks about render
//! fine without JavaScript, and a plain GET costs a fraction of a Chromium
//! start on a constrained host.

use super::text::{clip_chars, looks_like_html, HtmlStripper};
use super::url::normalize_url;
use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Desktop user agent sent with every fetch
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux armv7l) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const MAX_REDIRECTS: usize = 5;

/// Fetch a page and return its readable text
#[async_trait]
pub trait WebFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed [`WebFetch`]
#[derive(Debug, Clone)]
pub struct WebFetcher {
    client: reqwest::Client,
    max_chars: usize,
    stripper: HtmlStripper,
}

impl WebFetcher {
    /// Create a fetcher with a per-request timeout and an output cap
    pub fn new(timeout: Duration, max_chars: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self {
            client,
            max_chars: max_chars.max(1),
            stripper: HtmlStripper::new()?,
        })
    }

    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        Self::new(
            Duration::from_secs(config.web_fetch_timeout_seconds.max(1) as u64),
            config.web_fetch_max_chars.max(1) as usize,
        )
    }
}

#[async_trait]
impl WebFetch for WebFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let target = normalize_url(url)?;

        let response = self
            .client
            .get(&target)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("fetch {}: {}", target, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!(
                "fetch {}: status {}",
                target,
                status.as_u16()
            )));
        }

        let is_html_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_lowercase().contains("text/html"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("read body of {}: {}", target, e)))?;

        let text = if is_html_type || looks_like_html(&body) {
            self.stripper.strip(&body)
        } else {
            body
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Fetch(format!("fetch {}: empty body text", target)));
        }

        let text = clip_chars(text, self.max_chars);
        tracing::debug!(url = %target, chars = text.chars().count(), "web_fetch completed");
        Ok(text)
    }
}
