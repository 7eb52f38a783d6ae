use crate::types::field_key;
use crate::{
    ChannelPolicy, ChannelState, DeviceStatusStore, IngestOutcome, Result, RouterError,
    TelemetryRecord, TelemetrySnapshot,
};
use dashmap::DashMap;
use frame_codec::Frame;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

const SUBSCRIBER_CAPACITY: usize = 256;

type DeviceTable = BTreeMap<String, TelemetryRecord>;

/// Owns the latest-value table and the per-device subscriber channels.
pub struct TelemetryRouter {
    table: Mutex<HashMap<String, DeviceTable>>,
    channels: DashMap<String, broadcast::Sender<Arc<TelemetrySnapshot>>>,
    policy: ChannelPolicy,
    store: Arc<dyn DeviceStatusStore>,
    timestamp_field: String,
}

impl TelemetryRouter {
    pub fn new(policy: ChannelPolicy, store: Arc<dyn DeviceStatusStore>) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            channels: DashMap::new(),
            policy,
            store,
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
        }
    }

    pub fn with_timestamp_field(mut self, name: impl Into<String>) -> Self {
        self.timestamp_field = name.into();
        self
    }

    pub fn policy(&self) -> &ChannelPolicy {
        &self.policy
    }

    /// Apply channel notifications and suppression, then upsert every non-timestamp field.
    pub async fn ingest(&self, device_id: &str, frame: &Frame) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();

        if let Some(rule) = self.policy.channel_rule_for(&frame.command_name) {
            let state = match frame.field(&rule.state_field).and_then(|f| f.value.as_ref()) {
                Some(v) if v.is_truthy() => ChannelState::Opened,
                _ => ChannelState::Closed,
            };
            self.store
                .set_channel_state(device_id, &rule.channel, state)
                .await?;
            info!(device_id, channel = %rule.channel, state = %state, "channel state updated");
            outcome.channel_update = Some((rule.channel.clone(), state));
        }

        if let Some(rule) = self.policy.suppression_for(&frame.command_name) {
            let state = self.store.channel_state(device_id, &rule.channel).await?;
            if !state.is_open() {
                debug!(
                    device_id,
                    command = %frame.command_name,
                    channel = %rule.channel,
                    state = %state,
                    "frame suppressed, channel not opened"
                );
                outcome.suppressed = true;
                return Ok(outcome);
            }
        }

        let now = OffsetDateTime::now_utc();
        let reported_at = frame
            .field(&self.timestamp_field)
            .and_then(|f| f.value.clone());
        let label = frame.label();

        let mut table = self
            .table
            .lock()
            .map_err(|_| RouterError::Poisoned)?;
        let records = table.entry(device_id.to_string()).or_default();
        for field in frame
            .fields
            .iter()
            .filter(|f| f.field_name != self.timestamp_field)
        {
            let key = field_key(label, &field.field_name);
            let record = TelemetryRecord {
                device_id: device_id.to_string(),
                field_key: key.clone(),
                command: frame.command_name.clone(),
                field_name: field.field_name.clone(),
                value: field.value.clone(),
                unit: field.unit.clone(),
                raw_hex: field.raw_hex.clone(),
                reported_at: reported_at.clone(),
                updated_at: now,
            };
            let changed = records
                .get(&key)
                .map_or(true, |previous| !previous.same_reading(&record));
            records.insert(key, record);
            outcome.stored += 1;
            if changed {
                outcome.changed += 1;
            }
        }
        debug!(
            device_id,
            command = %frame.command_name,
            stored = outcome.stored,
            changed = outcome.changed,
            "telemetry upserted"
        );
        Ok(outcome)
    }

    /// Send the device's full record set to its subscribers. Returns the receiver count.
    pub fn publish(&self, device_id: &str) -> usize {
        let Some(sender) = self.channels.get(device_id).map(|s| s.value().clone()) else {
            return 0;
        };
        if sender.receiver_count() == 0 {
            return 0;
        }
        let snapshot = TelemetrySnapshot {
            device_id: device_id.to_string(),
            records: self.records(device_id),
            published_at: OffsetDateTime::now_utc(),
        };
        sender.send(Arc::new(snapshot)).unwrap_or(0)
    }

    /// Ingest, then publish when any reading changed.
    pub async fn handle_frame(&self, device_id: &str, frame: &Frame) -> Result<IngestOutcome> {
        let outcome = self.ingest(device_id, frame).await?;
        if outcome.changed > 0 {
            let receivers = self.publish(device_id);
            debug!(device_id, receivers, "telemetry published");
        }
        Ok(outcome)
    }

    /// Subscribe to snapshots for one device; the channel is created on first use.
    pub fn subscribe(&self, device_id: &str) -> broadcast::Receiver<Arc<TelemetrySnapshot>> {
        self.channels
            .entry(device_id.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .value()
            .subscribe()
    }

    /// Current records for a device, ordered by field key.
    pub fn records(&self, device_id: &str) -> Vec<TelemetryRecord> {
        self.table
            .lock()
            .ok()
            .and_then(|t| t.get(device_id).map(|r| r.values().cloned().collect()))
            .unwrap_or_default()
    }

    pub fn record(&self, device_id: &str, key: &str) -> Option<TelemetryRecord> {
        self.table
            .lock()
            .ok()
            .and_then(|t| t.get(device_id).and_then(|r| r.get(key).cloned()))
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .table
            .lock()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub async fn channel_state(&self, device_id: &str, channel: &str) -> Result<ChannelState> {
        self.store.channel_state(device_id, channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStatusStore;
    use frame_codec::{DecodedField, DecodedValue};

    fn field(name: &str, value: DecodedValue) -> DecodedField {
        DecodedField {
            field_name: name.to_string(),
            unit: String::new(),
            type_code: 1,
            semantic_type: value.semantic_type().to_string(),
            raw_hex: frame_codec::convert::encode_value(&value),
            value: Some(value),
        }
    }

    fn frame(command: &str, description: &str, fields: Vec<DecodedField>) -> Frame {
        Frame {
            command_code: 0x10,
            command_name: command.to_string(),
            description: description.to_string(),
            known_command: true,
            fields,
            checksum: "00".to_string(),
            checksum_valid: true,
        }
    }

    fn router() -> TelemetryRouter {
        TelemetryRouter::new(
            ChannelPolicy::forwarding_defaults(),
            Arc::new(InMemoryStatusStore::new()),
        )
    }

    #[tokio::test]
    async fn test_same_key_upserts_single_record() {
        let router = router();
        let first = frame("SENSOR_REPORT", "Sensor", vec![field("temperature", DecodedValue::Float32(20.5))]);
        let second = frame("SENSOR_REPORT", "Sensor", vec![field("temperature", DecodedValue::Float32(21.0))]);

        router.ingest("aa", &first).await.unwrap();
        router.ingest("aa", &second).await.unwrap();

        let records = router.records("aa");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field_key, "Sensor.temperature");
        assert_eq!(records[0].value, Some(DecodedValue::Float32(21.0)));
    }

    #[tokio::test]
    async fn test_timestamp_field_is_not_a_record() {
        let router = router();
        let f = frame(
            "SENSOR_REPORT",
            "",
            vec![
                field("timestamp", DecodedValue::Uint32(1_700_000_000)),
                field("humidity", DecodedValue::Uint32(40)),
            ],
        );
        let outcome = router.ingest("aa", &f).await.unwrap();
        assert_eq!(outcome.stored, 1);
        let record = router.record("aa", "SENSOR_REPORT.humidity").unwrap();
        assert_eq!(record.reported_at, Some(DecodedValue::Uint32(1_700_000_000)));
    }

    #[tokio::test]
    async fn test_custom_timestamp_field() {
        let router = router().with_timestamp_field("ts");
        let f = frame(
            "SENSOR_REPORT",
            "Sensor",
            vec![
                field("ts", DecodedValue::Uint32(5)),
                field("timestamp", DecodedValue::Uint32(6)),
            ],
        );
        assert_eq!(router.ingest("aa", &f).await.unwrap().stored, 1);
        assert!(router.record("aa", "Sensor.timestamp").is_some());
    }

    #[tokio::test]
    async fn test_forward_data_suppressed_until_channel_opens() {
        let router = router();
        let data = frame("TCP_FORWARD_DATA", "TCP data", vec![field("data", DecodedValue::Bytes(vec![1, 2]))]);

        let outcome = router.ingest("aa", &data).await.unwrap();
        assert!(outcome.suppressed);
        assert!(router.records("aa").is_empty());

        let open = frame("TCP_CHANNEL_STATUS", "TCP channel", vec![field("status", DecodedValue::Bool(true))]);
        let outcome = router.ingest("aa", &open).await.unwrap();
        assert_eq!(outcome.channel_update, Some(("tcp".to_string(), ChannelState::Opened)));
        assert_eq!(router.channel_state("aa", "tcp").await.unwrap(), ChannelState::Opened);

        let outcome = router.ingest("aa", &data).await.unwrap();
        assert!(!outcome.suppressed);
        assert!(router.record("aa", "TCP data.data").is_some());

        let close = frame("TCP_CHANNEL_STATUS", "TCP channel", vec![field("status", DecodedValue::Uint32(0))]);
        router.ingest("aa", &close).await.unwrap();
        assert_eq!(router.channel_state("aa", "tcp").await.unwrap(), ChannelState::Closed);
        assert!(router.ingest("aa", &data).await.unwrap().suppressed);
        // the UDP channel of the same device is independent
        assert_eq!(router.channel_state("aa", "udp").await.unwrap(), ChannelState::Unknown);
    }

    #[tokio::test]
    async fn test_handle_frame_publishes_changes_only() {
        let router = router();
        let mut rx = router.subscribe("aa");
        let f = frame("SENSOR_REPORT", "Sensor", vec![field("humidity", DecodedValue::Uint32(40))]);

        router.handle_frame("aa", &f).await.unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.device_id, "aa");
        assert_eq!(snapshot.records.len(), 1);

        // identical re-delivery does not fan out again
        let outcome = router.handle_frame("aa", &f).await.unwrap();
        assert_eq!(outcome.changed, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_is_per_device() {
        let router = router();
        let mut rx_b = router.subscribe("bb");
        let f = frame("SENSOR_REPORT", "Sensor", vec![field("humidity", DecodedValue::Uint32(40))]);
        router.handle_frame("aa", &f).await.unwrap();
        assert!(rx_b.try_recv().is_err());
        assert_eq!(router.publish("aa"), 0);
        assert_eq!(router.device_ids(), vec!["aa".to_string()]);
    }

    #[tokio::test]
    async fn test_poisoned_table_is_reported() {
        let router = router();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _table = router.table.lock().unwrap();
            panic!("writer died holding the table");
        }));
        let report = frame("SENSOR_REPORT", "Sensor", vec![field("t", DecodedValue::Int32(1))]);
        assert_eq!(router.ingest("aa", &report).await, Err(RouterError::Poisoned));
    }
}
