use serde::{Deserialize, Serialize};

fn default_active() -> bool {
    true
}

/// A device command as stored in the command dictionary.
///
/// `fields` is positional: the n-th field definition names the n-th TLV entry of a frame
/// carrying this command. Field names are never transmitted on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDefinition {
    pub code: u8,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
}

impl CommandDefinition {
    pub fn field_at(&self, index: usize) -> Option<&FieldDefinition> {
        self.fields.get(index)
    }

    /// Label used when building telemetry keys: the description, or the name when the
    /// description is blank.
    pub fn label(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.name
        } else {
            &self.description
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub unit: String,
}

/// Maps a wire type code to the semantic type name understood by the frame codec
/// (`int32`, `uint32`, `float32`, `float64`, `string`, `bytearray`, `boolean`).
///
/// The name is kept as text so that a dictionary entry naming an unsupported type still
/// loads; the codec reports it per field instead of rejecting the whole dictionary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadTypeDefinition {
    pub code: u8,
    #[serde(alias = "semanticType")]
    pub semantic_type: String,
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
}
