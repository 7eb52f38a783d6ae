//! frame-codec: binary frame codec for field devices
//!
//! Wire format: `[command:1] ([length:1][type:1][data:length])* [crc8:1]`, integers big-endian,
//! CRC-8 with polynomial 0x07 and initial value 0xFF over everything but the last byte.
//! Field semantics come from the [`device_registry::Dictionary`] snapshot passed to each call;
//! the codec itself holds no state.

mod error;
pub use error::{CodecError, ConvertError, Result};

pub mod convert;
pub use convert::{DecodedValue, SemanticType};

mod crc;
pub use crc::{crc8, CRC8_INIT, CRC8_POLY};

mod types;
pub use types::{CommandRequest, DecodedField, EncodedFrame, Frame, PayloadEntry};

mod decode;
pub use decode::{decode_frame, decode_hex_frame, parse_hex_text, UNKNOWN_COMMAND_NAME};

mod encode;
pub use encode::{build_frame, encode_command};
