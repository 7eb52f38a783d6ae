use crate::{
    DeviceWorkers, FrameEncoding, FrameHandler, GatewayConfig, GatewayError, Registration, Result,
};
use async_trait::async_trait;
use dashmap::DashMap;
use device_registry::{
    CommandDefinition, DictionarySource, Directory, MetricsHub, PayloadTypeDefinition,
    RefreshSummary,
};
use frame_codec::{decode_frame, encode_command, parse_hex_text, CommandRequest, Frame};
use mqtt_transport::topic::SUBSCRIPTIONS;
use mqtt_transport::{
    parse_topic, response_topic, CorrelationError, Correlator, DeviceTopic, InboundMessage,
    LivenessTracker, PubSubTransport, TransactionReport,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use telemetry_router::{DeviceStatusStore, IngestOutcome, TelemetryRouter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Decode and route path run by the per-device workers.
pub struct FramePipeline {
    directory: Arc<Directory>,
    router: Arc<TelemetryRouter>,
    metrics: MetricsHub,
    encoding: FrameEncoding,
}

impl FramePipeline {
    /// Decode one `device_send` payload against the current snapshot.
    pub fn decode(&self, payload: &[u8]) -> Result<Frame> {
        let bytes = match self.encoding {
            FrameEncoding::Binary => payload.to_vec(),
            FrameEncoding::HexText => {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| GatewayError::FrameText(e.to_string()))?;
                parse_hex_text(text)?
            }
        };
        let dictionary = self.directory.snapshot();
        Ok(decode_frame(&dictionary, &bytes)?)
    }

    pub async fn process(&self, device_id: &str, payload: &[u8]) -> Result<IngestOutcome> {
        let frame = match self.decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.gw.frames_rejected.inc();
                return Err(e);
            }
        };
        self.metrics.gw.frames_decoded.inc();
        debug!(device_id, frame = %frame.to_json(), "device frame");
        Ok(self.router.handle_frame(device_id, &frame).await?)
    }
}

#[async_trait]
impl FrameHandler for FramePipeline {
    async fn handle(&self, device_id: &str, payload: Vec<u8>) {
        if let Err(e) = self.process(device_id, &payload).await {
            warn!(device_id, error = %e, "device frame dropped");
        }
    }
}

/// Point-in-time view for status logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub online_devices: usize,
    pub registered_devices: usize,
    pub active_workers: usize,
    pub pending_transactions: usize,
    pub overdue_transactions: usize,
}

pub struct Gateway {
    config: GatewayConfig,
    transport: Arc<dyn PubSubTransport>,
    directory: Arc<Directory>,
    router: Arc<TelemetryRouter>,
    correlator: Correlator,
    liveness: LivenessTracker,
    metrics: MetricsHub,
    workers: DeviceWorkers<FramePipeline>,
    registrations: DashMap<String, Registration>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn PubSubTransport>,
        directory: Arc<Directory>,
        status_store: Arc<dyn DeviceStatusStore>,
        metrics: MetricsHub,
        shutdown: CancellationToken,
    ) -> Self {
        let router = Arc::new(
            TelemetryRouter::new(config.channel_policy.clone(), status_store)
                .with_timestamp_field(config.timestamp_field.clone()),
        );
        let pipeline = Arc::new(FramePipeline {
            directory: Arc::clone(&directory),
            router: Arc::clone(&router),
            metrics: metrics.clone(),
            encoding: config.inbound_encoding,
        });
        metrics.record_dictionary(directory.snapshot().summary());
        Self {
            correlator: Correlator::new(Arc::clone(&transport), config.command_timeout()),
            liveness: LivenessTracker::new(config.liveness_window())
                .with_retention(config.device_retention()),
            workers: DeviceWorkers::new(
                pipeline,
                config.worker_queue,
                config.worker_idle(),
                shutdown.clone(),
            ),
            registrations: DashMap::new(),
            config,
            transport,
            directory,
            router,
            metrics,
            shutdown,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn router(&self) -> &Arc<TelemetryRouter> {
        &self.router
    }

    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }

    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }

    pub fn registration(&self, device_id: &str) -> Option<Registration> {
        self.registrations.get(device_id).map(|r| r.value().clone())
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            online_devices: self.liveness.online_devices().len(),
            registered_devices: self.registrations.len(),
            active_workers: self.workers.active_workers(),
            pending_transactions: self.correlator.pending_count(),
            overdue_transactions: self.correlator.overdue_count(),
        }
    }

    pub async fn subscribe_all(&self) -> Result<()> {
        for filter in SUBSCRIPTIONS {
            self.transport.subscribe(filter).await?;
        }
        Ok(())
    }

    /// Bulk reload of both dictionaries.
    pub fn refresh_dictionary(&self, source: &dyn DictionarySource) -> Result<RefreshSummary> {
        let summary = self.directory.refresh_from(source)?;
        self.metrics.record_dictionary(summary);
        Ok(summary)
    }

    /// Point update after the CRUD layer persisted a command definition.
    pub fn upsert_command(&self, def: CommandDefinition) {
        self.directory.upsert_command(def);
        self.metrics.record_dictionary(self.directory.snapshot().summary());
    }

    pub fn upsert_payload_type(&self, def: PayloadTypeDefinition) {
        self.directory.upsert_payload_type(def);
        self.metrics.record_dictionary(self.directory.snapshot().summary());
    }

    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<()> {
        let topic = parse_topic(&message.topic)?;
        match topic {
            DeviceTopic::DeviceSend { mac } => {
                self.liveness.pulse(&mac);
                let dispatched = self.workers.dispatch(&mac, message.payload);
                if matches!(dispatched, Err(GatewayError::QueueFull(_))) {
                    self.metrics.gw.frames_dropped.inc();
                }
                dispatched
            }
            DeviceTopic::Register => {
                let registration = Registration::from_slice(&message.payload)?;
                let mac = registration.mac.clone();
                self.liveness.pulse(&mac);
                info!(
                    device_id = %mac,
                    firmware_version = %registration.firmware_version,
                    "device registered"
                );
                self.registrations.insert(mac.clone(), registration);
                let ack = self.config.register_ack.clone();
                self.send_control(&mac, &ack).await
            }
            DeviceTopic::ConfigResult { mac } => {
                self.liveness.pulse(&mac);
                self.correlator.resolve_payload(&mac, &message.payload)?;
                Ok(())
            }
        }
    }

    /// Encode a dictionary command and send it as a correlated configuration request.
    pub async fn send_command(
        &self,
        device_id: &str,
        request: &CommandRequest,
        timeout: Option<Duration>,
    ) -> Result<TransactionReport> {
        let frame = encode_command(&self.directory.snapshot(), request)?;
        let payload = json!({
            "command": request.command,
            "frame": frame.hex,
        });
        self.send_config(device_id, payload, timeout).await
    }

    /// Send a JSON configuration object and wait for the device's result.
    pub async fn send_config(
        &self,
        device_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<TransactionReport> {
        self.metrics.gw.commands_sent.inc();
        match self.correlator.send(device_id, payload, timeout).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if matches!(e, CorrelationError::Timeout { .. }) {
                    self.metrics.gw.command_timeouts.inc();
                }
                Err(e.into())
            }
        }
    }

    /// Publish a fixed control string to the device, without correlation.
    pub async fn send_control(&self, device_id: &str, text: &str) -> Result<()> {
        self.transport
            .publish(&response_topic(device_id), text.as_bytes().to_vec())
            .await?;
        debug!(device_id, control = text, "control string sent");
        Ok(())
    }

    /// Consume inbound messages until the transport closes or shutdown is requested.
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        info!("gateway running");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(message) => {
                        let topic = message.topic.clone();
                        if let Err(e) = self.handle_inbound(message).await {
                            warn!(topic = %topic, error = %e, "inbound message rejected");
                        }
                    }
                    None => {
                        info!("inbound channel closed");
                        break;
                    }
                }
            }
        }
        self.workers.close_all();
        info!("gateway stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_registry::{Dictionary, FieldDefinition};
    use frame_codec::{build_frame, DecodedValue, PayloadEntry};
    use mqtt_transport::{MockTransport, PublishedMessage};
    use telemetry_router::{ChannelState, InMemoryStatusStore};
    use tokio::sync::broadcast;

    fn dictionary() -> Dictionary {
        Dictionary::new(
            vec![CommandDefinition {
                code: 1,
                name: "GET_VERSION".to_string(),
                description: "Firmware version".to_string(),
                fields: vec![FieldDefinition {
                    name: "version".to_string(),
                    unit: String::new(),
                }],
                is_active: true,
            }],
            vec![PayloadTypeDefinition {
                code: 6,
                semantic_type: "int32".to_string(),
                is_active: true,
            }],
        )
    }

    struct Harness {
        gateway: Arc<Gateway>,
        transport: MockTransport,
        published: broadcast::Receiver<PublishedMessage>,
        shutdown: CancellationToken,
    }

    async fn start(config: GatewayConfig) -> Harness {
        start_with(config, dictionary(), Arc::new(InMemoryStatusStore::new())).await
    }

    async fn start_with(
        config: GatewayConfig,
        dictionary: Dictionary,
        store: Arc<dyn DeviceStatusStore>,
    ) -> Harness {
        let (transport, inbound) = MockTransport::open("mock0");
        let published = transport.watch_published();
        let shutdown = CancellationToken::new();
        let gateway = Arc::new(Gateway::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(Directory::from_dictionary(dictionary)),
            store,
            MetricsHub::new().unwrap(),
            shutdown.clone(),
        ));
        gateway.subscribe_all().await.unwrap();
        let runner = Arc::clone(&gateway);
        tokio::spawn(async move { runner.run(inbound).await });
        Harness {
            gateway,
            transport,
            published,
            shutdown,
        }
    }

    const VERSION_FRAME: [u8; 8] = [0x01, 0x04, 0x06, 0x00, 0x00, 0x00, 0x01, 0x73];

    #[tokio::test]
    async fn test_device_frame_reaches_subscribers() {
        let h = start(GatewayConfig::default()).await;
        let mut snapshots = h.gateway.router().subscribe("aa");

        assert!(h.transport.inject("device_send/aa", VERSION_FRAME.to_vec()).await.unwrap());
        let snapshot = snapshots.recv().await.unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].field_key, "Firmware version.version");
        assert_eq!(snapshot.records[0].value, Some(DecodedValue::Int32(1)));
        assert!(h.gateway.liveness().is_online("aa"));
        assert_eq!(h.gateway.metrics().gw.frames_decoded.get(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_hex_text_inbound_encoding() {
        let config = GatewayConfig {
            inbound_encoding: FrameEncoding::HexText,
            ..GatewayConfig::default()
        };
        let h = start(config).await;
        let mut snapshots = h.gateway.router().subscribe("aa");
        h.transport
            .inject("device_send/aa", "01 04 06 00000001 73")
            .await
            .unwrap();
        let snapshot = snapshots.recv().await.unwrap();
        assert_eq!(snapshot.records[0].raw_hex, "00000001");
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_bad_checksum_is_rejected() {
        let h = start(GatewayConfig::default()).await;
        let mut bad = VERSION_FRAME;
        bad[7] ^= 0x01;
        let err = h
            .gateway
            .workers
            .handler()
            .process("aa", &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Codec(_)));
        assert_eq!(h.gateway.metrics().gw.frames_rejected.get(), 1);
        assert!(h.gateway.router().records("aa").is_empty());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_registration_is_acknowledged() {
        let mut h = start(GatewayConfig::default()).await;
        h.transport
            .inject(
                "device/register",
                r#"{"mac":"aa:bb","firmwareVersion":"2.0.1","wifi":{"ssid":"lab"}}"#,
            )
            .await
            .unwrap();
        let ack = h.published.recv().await.unwrap();
        assert_eq!(ack.topic, "device/response/aa:bb");
        assert_eq!(ack.payload_str(), Some("REGISTER_OK"));
        assert_eq!(
            h.gateway.registration("aa:bb").unwrap().firmware_version,
            "2.0.1"
        );
        assert_eq!(h.gateway.status().registered_devices, 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_command_round_trip_through_result_topic() {
        let mut h = start(GatewayConfig::default()).await;
        let request = CommandRequest {
            command: "GET_VERSION".to_string(),
            payload: vec![PayloadEntry {
                semantic_type: "int32".to_string(),
                value: json!(1),
            }],
        };
        let sender = Arc::clone(&h.gateway);
        let task = tokio::spawn(async move { sender.send_command("aa", &request, None).await });

        let published = h.published.recv().await.unwrap();
        assert_eq!(published.topic, "device/response/aa");
        let body: Value = serde_json::from_slice(&published.payload).unwrap();
        assert_eq!(body["frame"], "0104060000000173");
        assert_eq!(body["command"], "GET_VERSION");
        let id = body["transactionId"].as_str().unwrap().to_string();

        let result = format!(r#"{{"transactionId":"{id}","status":"success"}}"#);
        h.transport
            .inject("device/config/result/aa", result)
            .await
            .unwrap();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.transaction_id, id);
        assert_eq!(h.gateway.metrics().gw.commands_sent.get(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_command_timeout_is_counted() {
        let h = start(GatewayConfig::default()).await;
        let err = h
            .gateway
            .send_config("aa", json!({"interval": 5}), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Correlation(CorrelationError::Timeout { .. })
        ));
        assert_eq!(h.gateway.metrics().gw.command_timeouts.get(), 1);
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_point_update_changes_decoding() {
        let h = start(GatewayConfig::default()).await;
        h.gateway.upsert_command(CommandDefinition {
            code: 1,
            name: "FIRMWARE".to_string(),
            description: String::new(),
            fields: vec![FieldDefinition {
                name: "build".to_string(),
                unit: String::new(),
            }],
            is_active: true,
        });
        let frame = h.gateway.workers.handler().decode(&VERSION_FRAME).unwrap();
        assert_eq!(frame.command_name, "FIRMWARE");
        assert_eq!(frame.fields[0].field_name, "build");

        h.gateway.upsert_payload_type(PayloadTypeDefinition {
            code: 6,
            semantic_type: "int32".to_string(),
            is_active: false,
        });
        assert_eq!(h.gateway.metrics().gw.payload_types_loaded.get(), 0);
        assert!(h.gateway.workers.handler().decode(&VERSION_FRAME).is_err());
        h.shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unknown_topic_is_rejected() {
        let h = start(GatewayConfig::default()).await;
        let err = h
            .gateway
            .handle_inbound(InboundMessage::new("device/response/aa", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
        h.shutdown.cancel();
    }

    /// Status store whose writes never complete.
    struct StalledStore;

    #[async_trait]
    impl DeviceStatusStore for StalledStore {
        async fn set_channel_state(
            &self,
            _device_id: &str,
            _channel: &str,
            _state: ChannelState,
        ) -> telemetry_router::Result<()> {
            std::future::pending().await
        }

        async fn channel_state(
            &self,
            _device_id: &str,
            _channel: &str,
        ) -> telemetry_router::Result<ChannelState> {
            Ok(ChannelState::Unknown)
        }
    }

    #[tokio::test]
    async fn test_stalled_device_does_not_delay_other_results() {
        let config = GatewayConfig {
            worker_queue: 1,
            ..GatewayConfig::default()
        };
        let dictionary = Dictionary::new(
            vec![CommandDefinition {
                code: 48,
                name: "TCP_CHANNEL_STATUS".to_string(),
                description: "TCP channel".to_string(),
                fields: vec![FieldDefinition {
                    name: "status".to_string(),
                    unit: String::new(),
                }],
                is_active: true,
            }],
            vec![PayloadTypeDefinition {
                code: 7,
                semantic_type: "boolean".to_string(),
                is_active: true,
            }],
        );
        let mut h = start_with(config, dictionary, Arc::new(StalledStore)).await;

        let channel_open = build_frame(48, &[(7, vec![1])]).unwrap().bytes;
        for _ in 0..4 {
            h.transport
                .inject("device_send/slow", channel_open.clone())
                .await
                .unwrap();
        }

        let sender = Arc::clone(&h.gateway);
        let task = tokio::spawn(async move {
            sender
                .send_config("fast", json!({"interval": 5}), Some(Duration::from_millis(500)))
                .await
        });
        let published = h.published.recv().await.unwrap();
        assert_eq!(published.topic, "device/response/fast");
        let body: Value = serde_json::from_slice(&published.payload).unwrap();
        let id = body["transactionId"].as_str().unwrap().to_string();
        h.transport
            .inject(
                "device/config/result/fast",
                format!(r#"{{"transactionId":"{id}","status":"ok"}}"#),
            )
            .await
            .unwrap();

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.transaction_id, id);
        assert!(h.gateway.metrics().gw.frames_dropped.get() >= 2);
        h.shutdown.cancel();
    }
}
