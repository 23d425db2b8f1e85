//! Channel gateways
//!
//! Gateways normalize platform events into [`Message`] and hand them to a
//! shared [`Processor`]; the reply string goes back out on the same channel.

mod adapter;
mod message;
mod telegram;

pub use adapter::{ChannelAdapter, Processor};
pub use message::Message;
pub use telegram::TelegramAdapter;
