use crate::Timestamp;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 256;

/// Online/offline transition for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub device_id: String,
    pub online: bool,
    pub at: Timestamp,
}

#[derive(Debug)]
struct DeviceLiveness {
    generation: u64,
    online: bool,
    last_seen: Timestamp,
}

/// "Device is alive" pulse, independent of command correlation.
///
/// Each inbound message marks its device online; the device reverts to offline once the
/// window passes without further traffic. Only transitions are broadcast. With a retention
/// set, a device that stays offline that long is forgotten entirely.
#[derive(Clone)]
pub struct LivenessTracker {
    window: Duration,
    retention: Option<Duration>,
    devices: Arc<Mutex<HashMap<String, DeviceLiveness>>>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl LivenessTracker {
    pub fn new(window: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            window,
            retention: None,
            devices: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Devices currently remembered, online or not.
    pub fn tracked_devices(&self) -> usize {
        self.devices.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Record traffic from `device_id` and re-arm its revert timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn pulse(&self, device_id: &str) {
        let now = Timestamp::now();
        let (generation, came_online) = {
            let Ok(mut devices) = self.devices.lock() else {
                return;
            };
            let entry = devices
                .entry(device_id.to_string())
                .or_insert(DeviceLiveness {
                    generation: 0,
                    online: false,
                    last_seen: now,
                });
            entry.generation = entry.generation.wrapping_add(1);
            entry.last_seen = now;
            let came_online = !entry.online;
            entry.online = true;
            (entry.generation, came_online)
        };

        if came_online {
            info!(device_id, "device online");
            self.emit(device_id, true, now);
        }

        let tracker = self.clone();
        let device_id = device_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(tracker.window).await;
            tracker.expire(&device_id, generation);
        });
    }

    pub fn is_online(&self, device_id: &str) -> bool {
        self.devices
            .lock()
            .map(|d| d.get(device_id).is_some_and(|l| l.online))
            .unwrap_or(false)
    }

    pub fn last_seen(&self, device_id: &str) -> Option<Timestamp> {
        self.devices
            .lock()
            .ok()
            .and_then(|d| d.get(device_id).map(|l| l.last_seen))
    }

    pub fn online_devices(&self) -> Vec<String> {
        let mut online: Vec<String> = self
            .devices
            .lock()
            .map(|d| {
                d.iter()
                    .filter(|(_, l)| l.online)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        online.sort();
        online
    }

    fn expire(&self, device_id: &str, generation: u64) {
        let went_offline = {
            let Ok(mut devices) = self.devices.lock() else {
                return;
            };
            match devices.get_mut(device_id) {
                Some(entry) if entry.generation == generation && entry.online => {
                    entry.online = false;
                    true
                }
                _ => false,
            }
        };
        if went_offline {
            info!(device_id, "device offline, no traffic within window");
            self.emit(device_id, false, Timestamp::now());
            if let Some(retention) = self.retention {
                let tracker = self.clone();
                let device_id = device_id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(retention).await;
                    tracker.forget(&device_id, generation);
                });
            }
        } else {
            debug!(device_id, generation, "stale liveness timer ignored");
        }
    }

    fn forget(&self, device_id: &str, generation: u64) {
        let Ok(mut devices) = self.devices.lock() else {
            return;
        };
        let stale = devices
            .get(device_id)
            .is_some_and(|entry| entry.generation == generation && !entry.online);
        if stale {
            devices.remove(device_id);
            debug!(device_id, "offline device forgotten");
        }
    }

    fn emit(&self, device_id: &str, online: bool, at: Timestamp) {
        // No subscribers is fine
        let _ = self.events.send(ConnectivityEvent {
            device_id: device_id.to_string(),
            online,
            at,
        });
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_WINDOW)
    }
}
