//! device-gateway: the server side of the device protocol
//!
//! [`Gateway`] dispatches inbound transport messages by topic: device frames go through
//! per-device ordered workers into the frame codec and telemetry router, registrations are
//! acknowledged, and configuration results resolve pending transactions. Outbound commands
//! are encoded against the current dictionary snapshot and sent through the correlator.

mod error;
pub use error::{GatewayError, Result};

mod config;
pub use config::{FrameEncoding, GatewayConfig};

mod registration;
pub use registration::Registration;

mod workers;
pub use workers::{DeviceWorkers, FrameHandler};

mod gateway;
pub use gateway::{FramePipeline, Gateway, GatewayStatus};
