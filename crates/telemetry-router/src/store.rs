use crate::{ChannelState, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// Persistence collaborator for per-device channel state.
#[async_trait]
pub trait DeviceStatusStore: Send + Sync {
    async fn set_channel_state(
        &self,
        device_id: &str,
        channel: &str,
        state: ChannelState,
    ) -> Result<()>;

    /// `Unknown` when nothing has been recorded for the channel.
    async fn channel_state(&self, device_id: &str, channel: &str) -> Result<ChannelState>;
}

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    states: DashMap<(String, String), ChannelState>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceStatusStore for InMemoryStatusStore {
    async fn set_channel_state(
        &self,
        device_id: &str,
        channel: &str,
        state: ChannelState,
    ) -> Result<()> {
        self.states
            .insert((device_id.to_string(), channel.to_string()), state);
        Ok(())
    }

    async fn channel_state(&self, device_id: &str, channel: &str) -> Result<ChannelState> {
        Ok(self
            .states
            .get(&(device_id.to_string(), channel.to_string()))
            .map(|s| *s.value())
            .unwrap_or_default())
    }
}
