use crate::{GatewayError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Processes the payloads of one device, one at a time, in arrival order.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle(&self, device_id: &str, payload: Vec<u8>);
}

/// One ordered worker task per device. Devices run concurrently; messages of the same
/// device are processed strictly in the order they were dispatched. A worker with no
/// traffic for `idle` stops and is spawned again on the device's next message.
pub struct DeviceWorkers<H: FrameHandler> {
    handler: Arc<H>,
    senders: Arc<DashMap<String, WorkerSlot>>,
    queue_depth: usize,
    idle: Duration,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

struct WorkerSlot {
    generation: u64,
    tx: mpsc::Sender<Vec<u8>>,
}

impl<H: FrameHandler> DeviceWorkers<H> {
    pub fn new(
        handler: Arc<H>,
        queue_depth: usize,
        idle: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            senders: Arc::new(DashMap::new()),
            queue_depth: queue_depth.max(1),
            idle,
            next_generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn active_workers(&self) -> usize {
        self.senders.len()
    }

    /// Queue a payload for the device's worker, spawning the worker on first use.
    ///
    /// Never waits: a full queue fails with `QueueFull` so one slow device cannot hold up
    /// the caller's other traffic.
    pub fn dispatch(&self, device_id: &str, payload: Vec<u8>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::WorkerClosed(device_id.to_string()));
        }
        // The entry guard is held across try_send so an idle worker cannot retire between
        // the lookup and the enqueue.
        let mut slot = self
            .senders
            .entry(device_id.to_string())
            .or_insert_with(|| self.spawn_worker(device_id));
        match slot.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(GatewayError::QueueFull(device_id.to_string())),
            Err(TrySendError::Closed(payload)) => {
                // Worker stopped; replace it once.
                *slot = self.spawn_worker(device_id);
                slot.tx
                    .try_send(payload)
                    .map_err(|_| GatewayError::WorkerClosed(device_id.to_string()))
            }
        }
    }

    fn spawn_worker(&self, device_id: &str) -> WorkerSlot {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(self.queue_depth);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&self.handler);
        let senders = Arc::clone(&self.senders);
        let shutdown = self.shutdown.clone();
        let idle = self.idle;
        let device_id = device_id.to_string();
        debug!(device_id = %device_id, generation, "spawning device worker");
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = tokio::time::timeout(idle, rx.recv()) => next,
                };
                match next {
                    Ok(Some(payload)) => handler.handle(&device_id, payload).await,
                    Ok(None) => break,
                    Err(_) => {
                        let retired = senders
                            .remove_if(&device_id, |_, slot| {
                                slot.generation == generation && rx.is_empty()
                            })
                            .is_some();
                        if retired {
                            debug!(device_id = %device_id, "idle device worker retired");
                            break;
                        }
                    }
                }
            }
            debug!(device_id = %device_id, "device worker stopped");
        });
        WorkerSlot { generation, tx }
    }

    /// Drop every worker's queue; workers finish what they already received.
    pub fn close_all(&self) {
        let count = self.senders.len();
        self.senders.clear();
        if count > 0 {
            warn!(workers = count, "device workers closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u8)>>,
    }

    #[async_trait]
    impl FrameHandler for Recorder {
        async fn handle(&self, device_id: &str, payload: Vec<u8>) {
            // later payloads of a device finish faster; order must still hold
            tokio::time::sleep(Duration::from_millis(u64::from(10 - payload[0] % 10))).await;
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((device_id.to_string(), payload[0]));
            }
        }
    }

    /// Never finishes a payload.
    struct Stuck;

    #[async_trait]
    impl FrameHandler for Stuck {
        async fn handle(&self, _device_id: &str, _payload: Vec<u8>) {
            std::future::pending::<()>().await;
        }
    }

    const IDLE: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_per_device_order_preserved() {
        let recorder = Arc::new(Recorder::default());
        let workers = DeviceWorkers::new(Arc::clone(&recorder), 8, IDLE, CancellationToken::new());

        for i in 0..5u8 {
            workers.dispatch("aa", vec![i]).unwrap();
            workers.dispatch("bb", vec![i + 100]).unwrap();
        }
        assert_eq!(workers.active_workers(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let seen = recorder.seen.lock().unwrap().clone();
        let aa: Vec<u8> = seen.iter().filter(|(d, _)| d == "aa").map(|(_, v)| *v).collect();
        let bb: Vec<u8> = seen.iter().filter(|(d, _)| d == "bb").map(|(_, v)| *v).collect();
        assert_eq!(aa, vec![0, 1, 2, 3, 4]);
        assert_eq!(bb, vec![100, 101, 102, 103, 104]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_does_not_wait() {
        let workers = DeviceWorkers::new(Arc::new(Stuck), 1, IDLE, CancellationToken::new());
        workers.dispatch("slow", vec![1]).unwrap();
        // worker takes the first payload and never returns
        tokio::time::sleep(Duration::from_millis(10)).await;
        workers.dispatch("slow", vec![2]).unwrap();

        let err = workers.dispatch("slow", vec![3]).unwrap_err();
        assert!(matches!(err, GatewayError::QueueFull(ref id) if id == "slow"));
        workers.dispatch("other", vec![1]).unwrap();
        assert_eq!(workers.active_workers(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_is_retired() {
        let recorder = Arc::new(Recorder::default());
        let workers = DeviceWorkers::new(Arc::clone(&recorder), 4, IDLE, CancellationToken::new());
        workers.dispatch("aa", vec![1]).unwrap();
        workers.dispatch("bb", vec![2]).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        workers.dispatch("aa", vec![3]).unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        // bb quiet for 35s, aa for 25s
        assert_eq!(workers.active_workers(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(workers.active_workers(), 0);

        workers.dispatch("bb", vec![4]).unwrap();
        assert_eq!(workers.active_workers(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[3], ("bb".to_string(), 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_worker_is_not_retired() {
        let workers = DeviceWorkers::new(Arc::new(Stuck), 4, IDLE, CancellationToken::new());
        workers.dispatch("aa", vec![1]).unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(workers.active_workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_after_shutdown_fails() {
        let token = CancellationToken::new();
        let workers = DeviceWorkers::new(Arc::new(Recorder::default()), 1, IDLE, token.clone());
        workers.dispatch("aa", vec![1]).unwrap();
        token.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(workers.dispatch("aa", vec![2]).is_err());
    }
}
