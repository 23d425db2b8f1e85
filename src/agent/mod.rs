//! Agent routing
//!
//! Every channel hands its messages to one [`AgentRouter`]. The router keeps
//! a bounded window of recent messages, records each message in the session
//! store, and answers commands:
//!
//! ```text
//! /status          counts from memory and the session store
//! /fetch <url>     plain HTTP fetch
//! /browse <url>    fetch first, headless browser as fallback
//! anything else    readiness line
//! ```

mod buffer;
mod router;

pub use buffer::{ConversationBuffer, DEFAULT_MEMORY_CAPACITY};
pub use router::{
    AgentRouter, AgentStats, BROWSER_UNAVAILABLE_REPLY, BROWSE_USAGE_REPLY, FETCH_USAGE_REPLY,
    MAX_REPLY_CHARS,
};
