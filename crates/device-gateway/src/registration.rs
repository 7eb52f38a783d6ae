use crate::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a `device/register` announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub mac: String,
    #[serde(default, alias = "firmwareVersion")]
    pub firmware_version: String,
    #[serde(default)]
    pub wifi: Option<Value>,
    #[serde(default)]
    pub mqtt: Option<Value>,
}

impl Registration {
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let mut registration: Registration = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Registration(e.to_string()))?;
        registration.mac = registration.mac.trim().to_string();
        if registration.mac.is_empty() {
            return Err(GatewayError::Registration("mac is empty".to_string()));
        }
        Ok(registration)
    }
}
