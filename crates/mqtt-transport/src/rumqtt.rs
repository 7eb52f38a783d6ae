use crate::{InboundMessage, PubSubTransport, Result, TransportError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct MqttConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Request and inbound channel capacity.
    pub capacity: usize,
}

impl Default for MqttConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "fieldlink-gateway".to_string(),
            keep_alive: Duration::from_secs(30),
            capacity: 256,
        }
    }
}

/// MQTT backend on `rumqttc`. Subscriptions are replayed after every reconnect.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop. Inbound publishes arrive on the returned
    /// receiver until `shutdown` is cancelled.
    pub fn connect(
        opts: &MqttConnectOptions,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let mut mqtt_options = MqttOptions::new(&opts.client_id, &opts.host, opts.port);
        mqtt_options.set_keep_alive(opts.keep_alive);
        mqtt_options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(mqtt_options, opts.capacity);
        let (tx, rx) = mpsc::channel(opts.capacity);
        let transport = Self {
            client,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        };

        info!(host = %opts.host, port = opts.port, client_id = %opts.client_id, "starting MQTT event loop");
        tokio::spawn(run_event_loop(transport.clone(), eventloop, tx, shutdown));
        (transport, rx)
    }

    fn resubscribe(&self) {
        let filters = self
            .subscriptions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        for filter in filters {
            if let Err(e) = self.client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                warn!(filter = %filter, error = %e, "resubscribe failed");
            }
        }
    }
}

async fn run_event_loop(
    transport: MqttTransport,
    mut eventloop: EventLoop,
    tx: mpsc::Sender<InboundMessage>,
    shutdown: CancellationToken,
) {
    let mut connected_once = false;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("MQTT shutdown requested");
                let _ = transport.client.disconnect().await;
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                    if tx.send(message).await.is_err() {
                        debug!("inbound receiver dropped, stopping MQTT event loop");
                        break;
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "connected to MQTT broker");
                    if connected_once {
                        transport.resubscribe();
                    }
                    connected_once = true;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "MQTT connection error");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }
    info!("MQTT event loop stopped");
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    async fn subscribe(&self, filter: &str) -> Result<()> {
        if let Ok(mut subs) = self.subscriptions.lock() {
            if !subs.iter().any(|f| f == filter) {
                subs.push(filter.to_string());
            }
        }
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        info!(filter, "subscribed to MQTT topic");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}
