use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("transport closed")]
    Closed,
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// Failures surfaced to the caller of [`crate::Correlator::send`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("transaction {transaction_id} timed out after {timeout_ms} ms")]
    Timeout {
        transaction_id: String,
        timeout_ms: u64,
    },
    #[error("device reported failure for transaction {transaction_id}: {status}")]
    DeviceReported {
        transaction_id: String,
        status: String,
    },
    #[error("transaction {0} is already in flight")]
    DuplicateTransaction(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("result channel closed for transaction {0}")]
    ChannelClosed(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("pending transaction table poisoned")]
    Poisoned,
}
