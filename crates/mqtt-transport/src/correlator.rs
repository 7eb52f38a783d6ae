use crate::topic::response_topic;
use crate::{CorrelationError, PubSubTransport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TRANSACTION_ID_KEY: &str = "transactionId";

/// Outcome flag carried by a device's configuration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ResultStatus {
    Success,
    Failure(String),
}

impl ResultStatus {
    /// Booleans map directly; strings `success`, `succeeded`, `ok` and `true` succeed
    /// (case-insensitive). Everything else is a failure carrying the raw text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(true) => ResultStatus::Success,
            Value::Bool(false) => ResultStatus::Failure("false".to_string()),
            Value::String(s) => {
                let normalized = s.trim().to_ascii_lowercase();
                if matches!(normalized.as_str(), "success" | "succeeded" | "ok" | "true") {
                    ResultStatus::Success
                } else {
                    ResultStatus::Failure(s.clone())
                }
            }
            Value::Null => ResultStatus::Failure("missing status".to_string()),
            other => ResultStatus::Failure(other.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultStatus::Success)
    }
}

/// Body of a `device/config/result/{mac}` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigResult {
    pub transaction_id: String,
    pub status: ResultStatus,
}

#[derive(Deserialize)]
struct RawConfigResult {
    #[serde(rename = "transactionId", alias = "transaction_id")]
    transaction_id: String,
    #[serde(default)]
    status: Value,
}

impl ConfigResult {
    pub fn new(transaction_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status,
        }
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, CorrelationError> {
        let raw: RawConfigResult = serde_json::from_slice(payload)
            .map_err(|e| CorrelationError::InvalidPayload(format!("config result: {e}")))?;
        Ok(Self {
            status: ResultStatus::from_value(&raw.status),
            transaction_id: raw.transaction_id,
        })
    }
}

/// Successful completion of [`Correlator::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub transaction_id: String,
    pub device_id: String,
    pub elapsed: Duration,
}

struct PendingTransaction {
    seq: u64,
    device_id: String,
    /// The published request, `transactionId` included.
    request: Value,
    deadline: Instant,
    result_tx: oneshot::Sender<ConfigResult>,
}

type PendingTable = Mutex<HashMap<String, PendingTransaction>>;

/// Matches configuration results back to the command that triggered them.
///
/// Every pending entry has exactly one removal: by [`Correlator::resolve`] (which also
/// delivers the result, under the same lock), by the timeout path of `send`, by a failed
/// publish, or by the caller abandoning the `send` future.
pub struct Correlator {
    transport: Arc<dyn PubSubTransport>,
    pending: PendingTable,
    next_seq: AtomicU64,
    default_timeout: Duration,
}

/// Removes the pending entry when a `send` future is dropped mid-wait.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    transaction_id: &'a str,
    seq: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            if pending.get(self.transaction_id).map(|p| p.seq) == Some(self.seq) {
                pending.remove(self.transaction_id);
                debug!(transaction_id = %self.transaction_id, "abandoned transaction removed");
            }
        }
    }
}

impl Correlator {
    pub fn new(transport: Arc<dyn PubSubTransport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Publish `payload` to the device and wait for its result under a fresh transaction id.
    pub async fn send(
        &self,
        device_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<TransactionReport, CorrelationError> {
        self.send_with_id(device_id, None, payload, timeout).await
    }

    /// Like [`Correlator::send`], with an optional caller-supplied transaction id.
    ///
    /// `payload` must be a JSON object; `transactionId` is set on it before publishing.
    pub async fn send_with_id(
        &self,
        device_id: &str,
        transaction_id: Option<String>,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<TransactionReport, CorrelationError> {
        let Value::Object(mut body) = payload else {
            return Err(CorrelationError::InvalidPayload(
                "configuration payload must be a JSON object".to_string(),
            ));
        };
        let transaction_id = transaction_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let timeout = timeout.unwrap_or(self.default_timeout);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        body.insert(
            TRANSACTION_ID_KEY.to_string(),
            Value::String(transaction_id.clone()),
        );
        let request = Value::Object(body);
        let bytes = serde_json::to_vec(&request)
            .map_err(|e| CorrelationError::InvalidPayload(e.to_string()))?;

        let started = Instant::now();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (result_tx, mut result_rx) = oneshot::channel();
        {
            let mut pending = self.lock()?;
            if pending.contains_key(&transaction_id) {
                return Err(CorrelationError::DuplicateTransaction(transaction_id));
            }
            pending.insert(
                transaction_id.clone(),
                PendingTransaction {
                    seq,
                    device_id: device_id.to_string(),
                    request,
                    deadline: started + timeout,
                    result_tx,
                },
            );
        }
        let mut guard = PendingGuard {
            pending: &self.pending,
            transaction_id: &transaction_id,
            seq,
            armed: true,
        };

        let topic = response_topic(device_id);
        if let Err(e) = self.transport.publish(&topic, bytes).await {
            warn!(device_id, transaction_id = %transaction_id, error = %e, "configuration publish failed");
            // guard removes the entry
            return Err(e.into());
        }
        debug!(device_id, transaction_id = %transaction_id, timeout_ms, "configuration sent, awaiting result");

        let outcome = tokio::time::timeout(timeout, &mut result_rx).await;
        let result = match outcome {
            Ok(Ok(result)) => {
                guard.armed = false;
                result
            }
            Ok(Err(_closed)) => {
                return Err(CorrelationError::ChannelClosed(transaction_id.clone()));
            }
            Err(_elapsed) => {
                let removed = self.lock().map(|mut p| p.remove(&transaction_id));
                guard.armed = false;
                if let Some(expired) = removed? {
                    warn!(
                        device_id,
                        transaction_id = %transaction_id,
                        timeout_ms,
                        request = %expired.request,
                        "configuration timed out"
                    );
                    return Err(CorrelationError::Timeout {
                        transaction_id: transaction_id.clone(),
                        timeout_ms,
                    });
                }
                // Resolved between the timer firing and the removal above.
                match result_rx.try_recv() {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(CorrelationError::Timeout {
                            transaction_id: transaction_id.clone(),
                            timeout_ms,
                        })
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        match result.status {
            ResultStatus::Success => {
                info!(device_id, transaction_id = %transaction_id, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "configuration acknowledged");
                Ok(TransactionReport {
                    transaction_id: transaction_id.clone(),
                    device_id: device_id.to_string(),
                    elapsed,
                })
            }
            ResultStatus::Failure(status) => {
                warn!(device_id, transaction_id = %transaction_id, status = %status, "device reported configuration failure");
                Err(CorrelationError::DeviceReported {
                    transaction_id: transaction_id.clone(),
                    status,
                })
            }
        }
    }

    /// Hand a result to its waiting caller. Returns false for unknown or already
    /// timed-out transactions, which are logged and otherwise ignored.
    pub fn resolve(&self, result: ConfigResult) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        match pending.remove(&result.transaction_id) {
            Some(entry) => {
                let transaction_id = result.transaction_id.clone();
                if entry.result_tx.send(result).is_err() {
                    debug!(
                        device_id = %entry.device_id,
                        transaction_id = %transaction_id,
                        request = %entry.request,
                        "caller gone before result arrived"
                    );
                }
                true
            }
            None => {
                warn!(transaction_id = %result.transaction_id, "result for unknown or expired transaction ignored");
                false
            }
        }
    }

    /// Parse a `device/config/result/{mac}` body and resolve it.
    pub fn resolve_payload(&self, device_id: &str, payload: &[u8]) -> Result<bool, CorrelationError> {
        let result = ConfigResult::from_slice(payload)?;
        if let Some((expected, request)) = self.pending_entry(&result.transaction_id) {
            if expected != device_id {
                warn!(
                    transaction_id = %result.transaction_id,
                    expected = %expected,
                    request = %request,
                    reported_by = device_id,
                    "config result arrived from a different device"
                );
            }
        }
        Ok(self.resolve(result))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_pending(&self, transaction_id: &str) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(transaction_id))
            .unwrap_or(false)
    }

    /// Transactions whose deadline has passed but which have not been removed yet.
    pub fn overdue_count(&self) -> usize {
        let now = Instant::now();
        self.pending
            .lock()
            .map(|p| p.values().filter(|t| t.deadline <= now).count())
            .unwrap_or(0)
    }

    /// The request still awaiting a result under `transaction_id`.
    pub fn pending_request(&self, transaction_id: &str) -> Option<Value> {
        self.pending_entry(transaction_id).map(|(_, request)| request)
    }

    fn pending_entry(&self, transaction_id: &str) -> Option<(String, Value)> {
        self.pending.lock().ok().and_then(|p| {
            p.get(transaction_id)
                .map(|t| (t.device_id.clone(), t.request.clone()))
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, PendingTransaction>>, CorrelationError> {
        self.pending
            .lock()
            .map_err(|_| CorrelationError::Poisoned)
    }
}
