use crate::convert::{encode_bytes, DecodedValue, SemanticType};
use crate::{crc8, CodecError, CommandRequest, EncodedFrame, Result};
use device_registry::Dictionary;
use tracing::debug;

/// Encodes a named command and its payload entries into a wire frame.
pub fn encode_command(dict: &Dictionary, request: &CommandRequest) -> Result<EncodedFrame> {
    let command = dict
        .command_by_name(&request.command)
        .ok_or_else(|| CodecError::CommandNotFound(request.command.clone()))?;

    let mut segments = Vec::with_capacity(request.payload.len());
    for (index, entry) in request.payload.iter().enumerate() {
        let payload_type = dict
            .payload_type_by_name(&entry.semantic_type)
            .ok_or_else(|| CodecError::PayloadTypeNotFound(entry.semantic_type.clone()))?;
        let ty: SemanticType = entry
            .semantic_type
            .parse()
            .map_err(|source| CodecError::Convert { index, source })?;
        let value = DecodedValue::from_json(&entry.value, ty)
            .map_err(|source| CodecError::Convert { index, source })?;
        segments.push((payload_type.code, encode_bytes(&value)));
    }

    let frame = build_frame(command.code, &segments)?;
    debug!(command = %command.name, hex = %frame.hex, "command encoded");
    Ok(frame)
}

/// Assembles `command + (length, type, data)* + crc8` from already-encoded field data.
pub fn build_frame(command_code: u8, fields: &[(u8, Vec<u8>)]) -> Result<EncodedFrame> {
    let mut bytes = vec![command_code];
    for (index, (type_code, data)) in fields.iter().enumerate() {
        let len = u8::try_from(data.len()).map_err(|_| CodecError::FieldTooLong {
            index,
            len: data.len(),
        })?;
        bytes.push(len);
        bytes.push(*type_code);
        bytes.extend_from_slice(data);
    }
    bytes.push(crc8(&bytes));
    Ok(EncodedFrame {
        hex: hex::encode(&bytes),
        bytes,
    })
}
