//! Seams between channel gateways and the shared message processor

use super::message::Message;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Turns one normalized inbound message into one reply.
///
/// An empty reply means "nothing to send". Callers that need strict
/// per-chat ordering must not call `process` concurrently for that chat.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process an inbound message and return the reply text
    async fn process(&self, message: Message) -> Result<String>;
}

/// A long-running channel gateway.
///
/// `run` returns once `shutdown` is cancelled (`Ok`) or the gateway fails
/// irrecoverably (`Err`).
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel name, also used as the gateway name in status reports
    fn name(&self) -> &str;

    /// Receive messages and deliver replies until cancelled
    async fn run(&self, processor: Arc<dyn Processor>, shutdown: CancellationToken) -> Result<()>;
}
