use crate::{topic_matches, InboundMessage, PubSubTransport, PublishedMessage, Result, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

const INBOUND_CAPACITY: usize = 256;

/// A simple in-process mock broker. Each transport instance is independent.
///
/// Injected messages are delivered only on subscribed filters; published messages are
/// recorded and also broadcast to [`MockTransport::watch_published`] receivers.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    inbound: mpsc::Sender<InboundMessage>,
    subscriptions: Mutex<Vec<String>>,
    published: Mutex<Vec<PublishedMessage>>,
    published_tx: broadcast::Sender<PublishedMessage>,
    fail_publish: AtomicBool,
}

impl MockTransport {
    pub fn open(name: &str) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound, rx) = mpsc::channel(INBOUND_CAPACITY);
        let (published_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let transport = Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                inbound,
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                published_tx,
                fail_publish: AtomicBool::new(false),
            }),
        };
        (transport, rx)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Deliver a message as if the broker had routed it. Returns false when no
    /// subscription matches the topic.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<bool> {
        let subscribed = self
            .inner
            .subscriptions
            .lock()
            .map(|subs| subs.iter().any(|f| topic_matches(f, topic)))
            .unwrap_or(false);
        if !subscribed {
            debug!(transport = %self.inner.name, topic, "mock dropped message on unsubscribed topic");
            return Ok(false);
        }
        self.inner
            .inbound
            .send(InboundMessage::new(topic, payload))
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(true)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .lock()
            .map(|subs| subs.clone())
            .unwrap_or_default()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner
            .published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn watch_published(&self) -> broadcast::Receiver<PublishedMessage> {
        self.inner.published_tx.subscribe()
    }

    /// Make every subsequent publish fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.inner.fail_publish.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PubSubTransport for MockTransport {
    async fn subscribe(&self, filter: &str) -> Result<()> {
        let mut subs = self
            .inner
            .subscriptions
            .lock()
            .map_err(|_| TransportError::Subscribe("subscription table poisoned".to_string()))?;
        if !subs.iter().any(|f| f == filter) {
            subs.push(filter.to_string());
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.inner.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish(format!(
                "mock transport {} rejects publishes",
                self.inner.name
            )));
        }
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload,
        };
        if let Ok(mut published) = self.inner.published.lock() {
            published.push(message.clone());
        }
        // No watchers is fine
        let _ = self.inner.published_tx.send(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inject_respects_subscriptions() {
        let (transport, mut rx) = MockTransport::open("mock0");
        assert!(!transport.inject("device_send/aa", vec![1, 2]).await.unwrap());

        transport.subscribe("device_send/+").await.unwrap();
        assert!(transport.inject("device_send/aa", vec![1, 2]).await.unwrap());
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.topic, "device_send/aa");
        assert_eq!(msg.payload, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_publish_records_and_fails_on_demand() {
        let (transport, _rx) = MockTransport::open("mock0");
        let mut watch = transport.watch_published();
        transport.publish("device/response/aa", b"hi".to_vec()).await.unwrap();
        assert_eq!(watch.recv().await.unwrap().payload_str(), Some("hi"));

        transport.set_fail_publish(true);
        assert!(matches!(
            transport.publish("device/response/aa", vec![]).await,
            Err(TransportError::Publish(_))
        ));
        assert_eq!(transport.published().len(), 1);
    }
}
