use crate::SemanticType;
use thiserror::Error;

pub type Result<T, E = CodecError> = core::result::Result<T, E>;

/// Failure converting one field value to or from its hex form.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error("odd-length hex string ({0} chars)")]
    OddLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    #[error("unsupported payload type: {0}")]
    UnsupportedType(String),
    #[error("{ty} expects {expected} bytes, got {actual}")]
    WrongWidth {
        ty: SemanticType,
        expected: &'static str,
        actual: usize,
    },
    #[error("value {value} out of range for {ty}")]
    OutOfRange { ty: SemanticType, value: String },
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    #[error("{ty} cannot be built from a JSON {found}")]
    ValueMismatch {
        ty: SemanticType,
        found: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("checksum mismatch: computed 0x{computed:02x}, received 0x{received:02x} (frame {raw_hex})")]
    ChecksumMismatch {
        computed: u8,
        received: u8,
        raw_hex: String,
    },
    #[error("unknown payload type code 0x{code:02x} at offset {offset}")]
    UnknownPayloadType { code: u8, offset: usize },
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("command not found: {0}")]
    CommandNotFound(String),
    #[error("payload type not found: {0}")]
    PayloadTypeNotFound(String),
    #[error("payload entry {index} encodes to {len} bytes, limit is 255")]
    FieldTooLong { index: usize, len: usize },
    #[error("payload entry {index}: {source}")]
    Convert {
        index: usize,
        #[source]
        source: ConvertError,
    },
    #[error("invalid frame hex: {0}")]
    InvalidHex(ConvertError),
}
