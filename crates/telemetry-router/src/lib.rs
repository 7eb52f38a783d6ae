//! telemetry-router: latest-value telemetry table and per-device fan-out
//!
//! Decoded frames are flattened into one [`TelemetryRecord`] per `(device, field key)` and
//! upserted last-write-wins. A [`ChannelPolicy`] keeps pushed data for closed forwarding
//! channels out of the table, and channel notifications are persisted through a
//! [`DeviceStatusStore`] before fan-out.

mod error;
pub use error::{Result, RouterError};

mod types;
pub use types::{field_key, ChannelState, IngestOutcome, TelemetryRecord, TelemetrySnapshot};

mod policy;
pub use policy::{ChannelPolicy, ChannelRule, SuppressRule};

mod store;
pub use store::{DeviceStatusStore, InMemoryStatusStore};

mod router;
pub use router::{TelemetryRouter, DEFAULT_TIMESTAMP_FIELD};
