use crate::Result;
use async_trait::async_trait;

/// A minimal asynchronous publish/subscribe interface.
///
/// Inbound messages are not pulled through this trait; each backend hands out a receiver
/// when it is opened, so the same transport can be shared for publishing from many tasks.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Subscribe to a topic filter (MQTT `+`/`#` wildcards allowed).
    async fn subscribe(&self, filter: &str) -> Result<()>;

    /// Publish one message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
}
