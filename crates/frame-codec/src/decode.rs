use crate::convert::{self, hex_to_bytes};
use crate::{crc8, CodecError, DecodedField, Frame, Result};
use device_registry::Dictionary;
use tracing::{debug, warn};

pub const UNKNOWN_COMMAND_NAME: &str = "UNKNOWN_CMD";

/// Decodes one inbound frame against a dictionary snapshot.
///
/// Rejects the frame on checksum mismatch, on an unknown payload type code, and when a
/// field's declared length runs past the body. An unknown command code is tolerated (fields
/// get `unknown_field_<n>` names), as is a field whose value cannot be converted (recorded
/// with a `None` value).
pub fn decode_frame(dict: &Dictionary, data: &[u8]) -> Result<Frame> {
    if data.len() < 2 {
        return Err(CodecError::MalformedFrame(format!(
            "frame needs at least 2 bytes, got {}",
            data.len()
        )));
    }
    let (body, tail) = data.split_at(data.len() - 1);
    let received = tail[0];
    let computed = crc8(body);
    if computed != received {
        let raw_hex = hex::encode(data);
        warn!(computed, received, raw_hex = %raw_hex, "frame checksum mismatch");
        return Err(CodecError::ChecksumMismatch {
            computed,
            received,
            raw_hex,
        });
    }

    let command_code = body[0];
    let command = dict.command_by_code(command_code);
    if command.is_none() {
        warn!(command_code, "unknown command code, decoding with placeholder");
    }

    let mut fields = Vec::new();
    let mut offset = 1;
    let mut index = 0;
    while offset + 2 <= body.len() {
        let length = usize::from(body[offset]);
        let type_code = body[offset + 1];
        let payload_type = dict
            .payload_type_by_code(type_code)
            .ok_or(CodecError::UnknownPayloadType {
                code: type_code,
                offset: offset + 1,
            })?;

        let start = offset + 2;
        let end = start + length;
        if end > body.len() {
            return Err(CodecError::MalformedFrame(format!(
                "field {index} declares {length} bytes at offset {start}, only {} remain",
                body.len() - start
            )));
        }

        let raw_hex = hex::encode(&body[start..end]);
        let value = if length > 0 {
            match convert::decode_as(&raw_hex, &payload_type.semantic_type) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(
                        command_code,
                        field = index,
                        semantic_type = %payload_type.semantic_type,
                        raw_hex = %raw_hex,
                        error = %e,
                        "field conversion failed, recording null"
                    );
                    None
                }
            }
        } else {
            None
        };

        let (field_name, unit) = match command.and_then(|c| c.field_at(index)) {
            Some(def) => (def.name.clone(), def.unit.clone()),
            None => (format!("unknown_field_{index}"), String::new()),
        };

        fields.push(DecodedField {
            field_name,
            unit,
            type_code,
            semantic_type: payload_type.semantic_type.clone(),
            raw_hex,
            value,
        });
        offset = end;
        index += 1;
    }

    if offset != body.len() {
        warn!(
            command_code,
            trailing = body.len() - offset,
            "frame has trailing bytes after last field"
        );
    }

    let (command_name, description) = match command {
        Some(c) => (c.name.clone(), c.description.clone()),
        None => (
            UNKNOWN_COMMAND_NAME.to_string(),
            format!("unknown command 0x{command_code:02x}"),
        ),
    };
    debug!(command = %command_name, fields = fields.len(), "frame decoded");

    Ok(Frame {
        command_code,
        command_name,
        description,
        known_command: command.is_some(),
        fields,
        checksum: format!("{received:02x}"),
        checksum_valid: true,
    })
}

/// Hex text form of a frame; ASCII whitespace between digits is ignored.
pub fn parse_hex_text(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex_to_bytes(&compact).map_err(CodecError::InvalidHex)
}

pub fn decode_hex_frame(dict: &Dictionary, text: &str) -> Result<Frame> {
    decode_frame(dict, &parse_hex_text(text)?)
}
