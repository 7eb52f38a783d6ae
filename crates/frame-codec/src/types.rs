use crate::DecodedValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One TLV entry of a decoded frame, named from the command's field list by position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    pub field_name: String,
    pub unit: String,
    pub type_code: u8,
    pub semantic_type: String,
    pub raw_hex: String,
    /// `None` when the field was empty or its value could not be converted.
    pub value: Option<DecodedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub command_code: u8,
    pub command_name: String,
    pub description: String,
    /// False when the command code was missing from the dictionary.
    pub known_command: bool,
    pub fields: Vec<DecodedField>,
    /// Received checksum as two lowercase hex digits.
    pub checksum: String,
    pub checksum_valid: bool,
}

impl Frame {
    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    /// Label used for telemetry keys: the description, or the name when it is blank.
    pub fn label(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.command_name
        } else {
            &self.description
        }
    }

    /// `{command, description, checksum, payload: [{<field>: value, raw_hex, unit}]}`
    pub fn to_json(&self) -> Value {
        let payload: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                let mut entry = Map::new();
                entry.insert(
                    f.field_name.clone(),
                    f.value.as_ref().map(DecodedValue::to_json).unwrap_or(Value::Null),
                );
                entry.insert("raw_hex".to_string(), Value::String(f.raw_hex.clone()));
                if !f.unit.is_empty() {
                    entry.insert("unit".to_string(), Value::String(f.unit.clone()));
                }
                Value::Object(entry)
            })
            .collect();
        serde_json::json!({
            "command": self.command_name,
            "description": self.description,
            "checksum": self.checksum,
            "payload": payload,
        })
    }
}

/// Outbound command as submitted by the management API: a command name plus ordered
/// `(type, value)` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Vec<PayloadEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    #[serde(rename = "type")]
    pub semantic_type: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedFrame {
    pub hex: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}
