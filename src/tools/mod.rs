//! Tools the assistant can call on behalf of a user
//!
//! - [`WebFetcher`]: plain HTTP GET with HTML stripping
//! - [`Browser`]: shared headless Chromium for pages that need rendering

pub mod browser;
mod fetch;
mod text;
mod url;

pub use browser::{BrowseTool, Browser, BrowserStats};
pub use fetch::{WebFetch, WebFetcher, DEFAULT_USER_AGENT};
pub use text::{clip_chars, looks_like_html, truncate_with_marker, HtmlStripper};
pub use url::normalize_url;
