use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use telemetry_router::{ChannelPolicy, DEFAULT_TIMESTAMP_FIELD};
use tracing::info;

/// How device frames travel on `device_send/{mac}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameEncoding {
    /// Raw frame bytes.
    #[default]
    Binary,
    /// ASCII hex digits, whitespace allowed.
    HexText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub log_level: String,
    pub dictionary_path: Option<PathBuf>,
    pub command_timeout_ms: u64,
    pub liveness_window_ms: u64,
    pub inbound_encoding: FrameEncoding,
    /// Control string published to `device/response/{mac}` after a registration.
    pub register_ack: String,
    pub timestamp_field: String,
    pub channel_policy: ChannelPolicy,
    /// Queue depth of each per-device worker.
    pub worker_queue: usize,
    /// A device worker with no traffic for this long is stopped.
    pub worker_idle_ms: u64,
    /// Offline devices are forgotten by the liveness tracker after this long.
    pub device_retention_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: "fieldlink-gateway".to_string(),
            keep_alive_secs: 30,
            log_level: "info".to_string(),
            dictionary_path: None,
            command_timeout_ms: 10_000,
            liveness_window_ms: 5_000,
            inbound_encoding: FrameEncoding::Binary,
            register_ack: "REGISTER_OK".to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            channel_policy: ChannelPolicy::forwarding_defaults(),
            worker_queue: 64,
            worker_idle_ms: 60_000,
            device_retention_ms: 600_000,
        }
    }
}

impl GatewayConfig {
    /// Load from a YAML or JSON file (by extension). A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json(&raw)
        } else {
            Self::from_yaml(&raw)
        }
        .with_context(|| format!("parsing config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.broker_port == 0 {
            bail!("broker_port must be non-zero");
        }
        if self.command_timeout_ms == 0 {
            bail!("command_timeout_ms must be greater than zero");
        }
        if self.liveness_window_ms == 0 {
            bail!("liveness_window_ms must be greater than zero");
        }
        if self.worker_queue == 0 {
            bail!("worker_queue must be greater than zero");
        }
        if self.worker_idle_ms == 0 {
            bail!("worker_idle_ms must be greater than zero");
        }
        if self.device_retention_ms < self.liveness_window_ms {
            bail!("device_retention_ms must not be shorter than liveness_window_ms");
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_millis(self.worker_idle_ms)
    }

    pub fn device_retention(&self) -> Duration {
        Duration::from_millis(self.device_retention_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}
