use crate::RefreshSummary;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct GatewayMetrics {
    pub frames_decoded: IntCounter,
    pub frames_rejected: IntCounter,
    pub frames_dropped: IntCounter,
    pub commands_sent: IntCounter,
    pub command_timeouts: IntCounter,
    pub commands_loaded: IntGauge,
    pub payload_types_loaded: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub gw: GatewayMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| {
            IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let gauge = |name: &str, help: &str| {
            IntGauge::new(name, help).map_err(|e| format!("metrics init error: {e}"))
        };
        let gw = GatewayMetrics {
            frames_decoded: counter("fl_frames_decoded", "Inbound frames decoded")?,
            frames_rejected: counter("fl_frames_rejected", "Inbound frames rejected")?,
            frames_dropped: counter(
                "fl_frames_dropped",
                "Inbound frames dropped on a full device queue",
            )?,
            commands_sent: counter("fl_commands_sent", "Configuration commands published")?,
            command_timeouts: counter(
                "fl_command_timeouts",
                "Configuration commands that timed out",
            )?,
            commands_loaded: gauge("fl_commands_loaded", "Active command definitions")?,
            payload_types_loaded: gauge(
                "fl_payload_types_loaded",
                "Active payload type definitions",
            )?,
        };
        let _ = registry.register(Box::new(gw.frames_decoded.clone()));
        let _ = registry.register(Box::new(gw.frames_rejected.clone()));
        let _ = registry.register(Box::new(gw.frames_dropped.clone()));
        let _ = registry.register(Box::new(gw.commands_sent.clone()));
        let _ = registry.register(Box::new(gw.command_timeouts.clone()));
        let _ = registry.register(Box::new(gw.commands_loaded.clone()));
        let _ = registry.register(Box::new(gw.payload_types_loaded.clone()));
        Ok(Self { registry, gw })
    }

    pub fn record_dictionary(&self, summary: RefreshSummary) {
        self.gw.commands_loaded.set(summary.commands as i64);
        self.gw.payload_types_loaded.set(summary.payload_types as i64);
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
