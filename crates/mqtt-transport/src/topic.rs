//! Device topic layout.
//!
//! Inbound: `device_send/{mac}`, `device/register`, `device/config/result/{mac}`.
//! Outbound: `device/response/{mac}`.

use crate::{Result, TransportError};

pub const DEVICE_SEND_FILTER: &str = "device_send/+";
pub const REGISTER_TOPIC: &str = "device/register";
pub const CONFIG_RESULT_FILTER: &str = "device/config/result/+";

/// Every filter the gateway subscribes to.
pub const SUBSCRIPTIONS: [&str; 3] = [DEVICE_SEND_FILTER, REGISTER_TOPIC, CONFIG_RESULT_FILTER];

/// Parsed inbound topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTopic {
    /// Telemetry or event frame from a device.
    DeviceSend { mac: String },
    /// Registration announcement; the device id travels in the JSON body.
    Register,
    /// Result of a configuration command.
    ConfigResult { mac: String },
}

impl DeviceTopic {
    pub fn mac(&self) -> Option<&str> {
        match self {
            DeviceTopic::DeviceSend { mac } | DeviceTopic::ConfigResult { mac } => Some(mac),
            DeviceTopic::Register => None,
        }
    }
}

/// Parse an inbound topic into a [`DeviceTopic`].
///
/// # Examples
/// ```
/// use mqtt_transport::{parse_topic, DeviceTopic};
///
/// let parsed = parse_topic("device_send/24:6f:28:aa:bb:cc").unwrap();
/// assert_eq!(parsed, DeviceTopic::DeviceSend { mac: "24:6f:28:aa:bb:cc".to_string() });
/// ```
pub fn parse_topic(topic: &str) -> Result<DeviceTopic> {
    let parts: Vec<&str> = topic.split('/').collect();
    match parts.as_slice() {
        ["device_send", mac] => Ok(DeviceTopic::DeviceSend {
            mac: device_segment(topic, mac)?,
        }),
        ["device", "register"] => Ok(DeviceTopic::Register),
        ["device", "config", "result", mac] => Ok(DeviceTopic::ConfigResult {
            mac: device_segment(topic, mac)?,
        }),
        _ => Err(TransportError::InvalidTopic(format!(
            "unrecognized topic '{topic}'"
        ))),
    }
}

fn device_segment(topic: &str, segment: &str) -> Result<String> {
    let mac = segment.trim();
    if mac.is_empty() {
        return Err(TransportError::InvalidTopic(format!(
            "device id cannot be empty in topic '{topic}'"
        )));
    }
    Ok(mac.to_string())
}

/// Outbound command topic for a device.
pub fn response_topic(mac: &str) -> String {
    format!("device/response/{mac}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_send() {
        let parsed = parse_topic("device_send/aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(
            parsed,
            DeviceTopic::DeviceSend {
                mac: "aa:bb:cc:dd:ee:ff".to_string()
            }
        );
        assert_eq!(parsed.mac(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn test_parse_register() {
        let parsed = parse_topic("device/register").unwrap();
        assert_eq!(parsed, DeviceTopic::Register);
        assert_eq!(parsed.mac(), None);
    }

    #[test]
    fn test_parse_config_result() {
        let parsed = parse_topic("device/config/result/dev-01").unwrap();
        assert_eq!(
            parsed,
            DeviceTopic::ConfigResult {
                mac: "dev-01".to_string()
            }
        );
    }

    #[test]
    fn test_parse_topic_empty_device() {
        assert!(parse_topic("device_send/").is_err());
        assert!(parse_topic("device/config/result/ ").is_err());
    }

    #[test]
    fn test_parse_topic_too_many_segments() {
        assert!(parse_topic("device_send/aa/extra").is_err());
    }

    #[test]
    fn test_parse_topic_unknown() {
        assert!(parse_topic("device/response/aa").is_err());
        assert!(parse_topic("").is_err());
    }

    #[test]
    fn test_response_topic() {
        assert_eq!(response_topic("aa:bb"), "device/response/aa:bb");
    }
}
