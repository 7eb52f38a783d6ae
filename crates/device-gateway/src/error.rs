use device_registry::DirectoryError;
use frame_codec::CodecError;
use mqtt_transport::{CorrelationError, TransportError};
use telemetry_router::RouterError;
use thiserror::Error;

pub type Result<T, E = GatewayError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("invalid registration: {0}")]
    Registration(String),
    #[error("inbound frame is not valid hex text: {0}")]
    FrameText(String),
    #[error("queue for device {0} is full, frame dropped")]
    QueueFull(String),
    #[error("worker for device {0} is gone")]
    WorkerClosed(String),
}
