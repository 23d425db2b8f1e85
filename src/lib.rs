//! ClawKangsar - Lightweight Personal Assistant Gateway
//!
//! ClawKangsar accepts chat messages from messaging channels, routes them
//! through one shared processor, and reaches for a headless browser only
//! when a page cannot be read with a plain HTTP fetch. It is sized for
//! small hosts such as a Raspberry Pi: the browser starts on demand and is
//! torn down again once idle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       ClawKangsar Gateway                         │
//! │  ┌──────────────┐                          ┌──────────────────┐  │
//! │  │   Telegram   │  Message                 │  Health server   │  │
//! │  │ long polling ├─────────┐                │ /health /ready   │  │
//! │  └──────────────┘         │                │ /status          │  │
//! │                           ▼                └────────▲─────────┘  │
//! │  ┌────────────────────────────────────────┐         │            │
//! │  │              Agent Router               │  StatusTracker       │
//! │  │  - bounded memory (128 messages)        ├─────────┘            │
//! │  │  - /status /fetch /browse               │                      │
//! │  └───────┬───────────────┬───────────────┬┘                      │
//! │          │               │               │                       │
//! │  ┌───────▼──────┐ ┌──────▼──────┐ ┌──────▼─────────────────┐     │
//! │  │ SessionStore │ │ WebFetcher  │ │ Browser                │     │
//! │  │ per-key JSON │ │ HTTP + HTML │ │ lazy start, idle evict │     │
//! │  │ atomic write │ │ stripping   │ │ Chromium via DevTools  │     │
//! │  └──────────────┘ └─────────────┘ └────────────────────────┘     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`gateway`]: runtime wiring, status tracking and health endpoints
//! - [`channels`]: channel adapters and the normalized [`channels::Message`]
//! - [`agent`]: message routing and command dispatch
//! - [`session`]: durable per-key conversation logs
//! - [`tools`]: web fetch and headless browser tools
//! - [`config`]: configuration management

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod gateway;
pub mod session;
pub mod tools;

pub use error::{Error, Result};
