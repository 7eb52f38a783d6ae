use serde::{Deserialize, Serialize};

/// A command that reports a forwarding channel opening or closing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRule {
    pub command: String,
    pub channel: String,
    /// Field whose truthy value means the channel is open.
    pub state_field: String,
}

/// A command whose data is dropped while `channel` is not opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressRule {
    pub command: String,
    pub channel: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    #[serde(default)]
    pub channel_rules: Vec<ChannelRule>,
    #[serde(default)]
    pub suppress: Vec<SuppressRule>,
}

impl ChannelPolicy {
    /// TCP and UDP forwarding channels: `*_CHANNEL_STATUS` notifications gate `*_FORWARD_DATA`.
    pub fn forwarding_defaults() -> Self {
        let rule = |command: &str, channel: &str| ChannelRule {
            command: command.to_string(),
            channel: channel.to_string(),
            state_field: "status".to_string(),
        };
        let suppress = |command: &str, channel: &str| SuppressRule {
            command: command.to_string(),
            channel: channel.to_string(),
        };
        Self {
            channel_rules: vec![
                rule("TCP_CHANNEL_STATUS", "tcp"),
                rule("UDP_CHANNEL_STATUS", "udp"),
            ],
            suppress: vec![
                suppress("TCP_FORWARD_DATA", "tcp"),
                suppress("UDP_FORWARD_DATA", "udp"),
            ],
        }
    }

    pub fn channel_rule_for(&self, command: &str) -> Option<&ChannelRule> {
        self.channel_rules.iter().find(|r| r.command == command)
    }

    pub fn suppression_for(&self, command: &str) -> Option<&SuppressRule> {
        self.suppress.iter().find(|r| r.command == command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_defaults() {
        let policy = ChannelPolicy::forwarding_defaults();
        assert_eq!(policy.channel_rule_for("UDP_CHANNEL_STATUS").unwrap().channel, "udp");
        assert_eq!(policy.suppression_for("TCP_FORWARD_DATA").unwrap().channel, "tcp");
        assert!(policy.suppression_for("SENSOR_REPORT").is_none());
    }

    #[test]
    fn test_policy_partial_document() {
        let policy: ChannelPolicy = serde_json::from_str(
            r#"{"suppress": [{"command": "SERIAL_DATA", "channel": "serial"}]}"#,
        )
        .unwrap();
        assert!(policy.channel_rules.is_empty());
        assert_eq!(policy.suppress.len(), 1);
    }
}
