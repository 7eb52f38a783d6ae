//! mqtt-transport: publish/subscribe plumbing between the gateway and its devices
//!
//! This crate provides the transport trait and message types, the device topic model,
//! the request/result [`Correlator`] for configuration commands, and the [`LivenessTracker`]
//! connectivity pulse. Backends are feature-gated: the default build enables an in-process
//! `mock` backend so that binaries and tests run without a broker; `rumqtt` adds a real
//! MQTT client.

mod types;
pub use types::{topic_matches, InboundMessage, PublishedMessage, Timestamp};

mod error;
pub use error::{CorrelationError, Result, TransportError};

mod traits;
pub use traits::PubSubTransport;

pub mod topic;
pub use topic::{parse_topic, response_topic, DeviceTopic};

mod correlator;
pub use correlator::{ConfigResult, Correlator, ResultStatus, TransactionReport};

mod liveness;
pub use liveness::{ConnectivityEvent, LivenessTracker, DEFAULT_LIVENESS_WINDOW};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTransport;

#[cfg(feature = "rumqtt")]
mod rumqtt;

#[cfg(feature = "rumqtt")]
pub use rumqtt::{MqttConnectOptions, MqttTransport};
