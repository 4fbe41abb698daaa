use std::future::Future;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};

/// Fire-and-forget publish to the dispatcher.
pub trait MessageChannel: Send + Sync {
    fn fire(
        &self,
        destination: &str,
        topic: &str,
        message: serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A message on its way out of the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub destination: String,
    pub topic: String,
    pub message: serde_json::Value,
}

/// [`MessageChannel`] that hands messages to a transport task over a
/// bounded channel. A full channel blocks the sender until the caller's
/// send timeout fires.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end a transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl MessageChannel for ChannelSink {
    async fn fire(&self, destination: &str, topic: &str, message: serde_json::Value) -> Result<()> {
        self.tx
            .send(OutboundMessage {
                destination: destination.to_string(),
                topic: topic.to_string(),
                message,
            })
            .await
            .map_err(|_| AgentError::Transmission("outbound channel closed".to_string()))
    }
}
