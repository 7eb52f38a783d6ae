use thiserror::Error;

pub type Result<T, E = RouterError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("device status store error: {0}")]
    StatusStore(String),
    #[error("telemetry table poisoned")]
    Poisoned,
}
