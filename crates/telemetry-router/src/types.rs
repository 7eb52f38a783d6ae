use frame_codec::DecodedValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Table key for one field: command label and field name joined with a dot.
pub fn field_key(command_label: &str, field_name: &str) -> String {
    format!("{command_label}.{field_name}")
}

/// Latest known value of one field for one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub field_key: String,
    pub command: String,
    pub field_name: String,
    pub value: Option<DecodedValue>,
    pub unit: String,
    pub raw_hex: String,
    /// Device-reported time from the frame's timestamp field, when present.
    pub reported_at: Option<DecodedValue>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl TelemetryRecord {
    /// True when `other` carries the same reading, ignoring arrival times.
    pub fn same_reading(&self, other: &TelemetryRecord) -> bool {
        self.value == other.value
            && self.raw_hex == other.raw_hex
            && self.unit == other.unit
            && self.reported_at == other.reported_at
    }
}

/// Full record set of one device, as fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    pub records: Vec<TelemetryRecord>,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Opened,
    Closed,
    #[default]
    Unknown,
}

impl ChannelState {
    pub fn is_open(self) -> bool {
        matches!(self, ChannelState::Opened)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Opened => "opened",
            ChannelState::Closed => "closed",
            ChannelState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What one ingest did to the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Records written (inserted or overwritten).
    pub stored: usize,
    /// Records whose reading differs from what was stored before.
    pub changed: usize,
    pub suppressed: bool,
    /// Channel notification persisted by this frame.
    pub channel_update: Option<(String, ChannelState)>,
}
