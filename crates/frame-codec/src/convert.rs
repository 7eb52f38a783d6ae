//! Hex <-> typed value conversion for single TLV fields.
//!
//! All multi-byte values are big-endian. Hex output is lowercase.

use crate::ConvertError;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Int32,
    Uint32,
    Float32,
    Float64,
    String,
    ByteArray,
    Boolean,
}

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Int32 => "int32",
            SemanticType::Uint32 => "uint32",
            SemanticType::Float32 => "float32",
            SemanticType::Float64 => "float64",
            SemanticType::String => "string",
            SemanticType::ByteArray => "bytearray",
            SemanticType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SemanticType {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int32" => Ok(SemanticType::Int32),
            "uint32" => Ok(SemanticType::Uint32),
            "float32" => Ok(SemanticType::Float32),
            "float64" => Ok(SemanticType::Float64),
            "string" => Ok(SemanticType::String),
            "bytearray" => Ok(SemanticType::ByteArray),
            "boolean" => Ok(SemanticType::Boolean),
            _ => Err(ConvertError::UnsupportedType(s.to_string())),
        }
    }
}

/// A decoded field value, tagged with the semantic type it was decoded as.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Int32(i32),
    Uint32(u32),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl DecodedValue {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            DecodedValue::Int32(_) => SemanticType::Int32,
            DecodedValue::Uint32(_) => SemanticType::Uint32,
            DecodedValue::Float32(_) => SemanticType::Float32,
            DecodedValue::Float64(_) => SemanticType::Float64,
            DecodedValue::String(_) => SemanticType::String,
            DecodedValue::Bytes(_) => SemanticType::ByteArray,
            DecodedValue::Bool(_) => SemanticType::Boolean,
        }
    }

    /// Natural JSON form; byte arrays become lowercase hex, non-finite floats become null.
    pub fn to_json(&self) -> Value {
        match self {
            DecodedValue::Int32(v) => Value::from(*v),
            DecodedValue::Uint32(v) => Value::from(*v),
            DecodedValue::Float32(v) => float_json(f64::from(*v)),
            DecodedValue::Float64(v) => float_json(*v),
            DecodedValue::String(s) => Value::String(s.clone()),
            DecodedValue::Bytes(b) => Value::String(hex::encode(b)),
            DecodedValue::Bool(b) => Value::Bool(*b),
        }
    }

    /// Nonzero numbers, `true`, byte arrays with a nonzero byte, and the strings
    /// `1`/`true`/`on`/`open`/`opened` are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            DecodedValue::Int32(v) => *v != 0,
            DecodedValue::Uint32(v) => *v != 0,
            DecodedValue::Float32(v) => *v != 0.0,
            DecodedValue::Float64(v) => *v != 0.0,
            DecodedValue::String(s) => {
                matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "open" | "opened")
            }
            DecodedValue::Bytes(b) => b.iter().any(|x| *x != 0),
            DecodedValue::Bool(b) => *b,
        }
    }

    /// Coerces a JSON request value into the given semantic type.
    pub fn from_json(value: &Value, ty: SemanticType) -> Result<Self, ConvertError> {
        match ty {
            SemanticType::Int32 => {
                let v = json_i64(value, ty)?;
                i32::try_from(v)
                    .map(DecodedValue::Int32)
                    .map_err(|_| out_of_range(ty, v))
            }
            SemanticType::Uint32 => {
                let v = json_i64(value, ty)?;
                u32::try_from(v)
                    .map(DecodedValue::Uint32)
                    .map_err(|_| out_of_range(ty, v))
            }
            SemanticType::Float32 => {
                let v = json_f64(value, ty)?;
                let narrowed = v as f32;
                if v.is_finite() && !narrowed.is_finite() {
                    return Err(out_of_range(ty, v));
                }
                Ok(DecodedValue::Float32(narrowed))
            }
            SemanticType::Float64 => Ok(DecodedValue::Float64(json_f64(value, ty)?)),
            SemanticType::String => match value {
                Value::String(s) => Ok(DecodedValue::String(s.clone())),
                other => Err(mismatch(ty, other)),
            },
            SemanticType::ByteArray => match value {
                Value::String(s) => Ok(DecodedValue::Bytes(hex_to_bytes(s)?)),
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        let b = item
                            .as_u64()
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or_else(|| out_of_range(ty, item))?;
                        out.push(b);
                    }
                    Ok(DecodedValue::Bytes(out))
                }
                other => Err(mismatch(ty, other)),
            },
            SemanticType::Boolean => match value {
                Value::Bool(b) => Ok(DecodedValue::Bool(*b)),
                Value::Number(n) => Ok(DecodedValue::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" => Ok(DecodedValue::Bool(true)),
                    "false" | "0" => Ok(DecodedValue::Bool(false)),
                    _ => Err(out_of_range(ty, s)),
                },
                other => Err(mismatch(ty, other)),
            },
        }
    }
}

impl Serialize for DecodedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DecodedValue::Int32(v) => serializer.serialize_i32(*v),
            DecodedValue::Uint32(v) => serializer.serialize_u32(*v),
            DecodedValue::Float32(v) => serializer.serialize_f32(*v),
            DecodedValue::Float64(v) => serializer.serialize_f64(*v),
            DecodedValue::String(s) => serializer.serialize_str(s),
            DecodedValue::Bytes(b) => serializer.serialize_str(&hex::encode(b)),
            DecodedValue::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Int32(v) => write!(f, "{v}"),
            DecodedValue::Uint32(v) => write!(f, "{v}"),
            DecodedValue::Float32(v) => write!(f, "{v}"),
            DecodedValue::Float64(v) => write!(f, "{v}"),
            DecodedValue::String(s) => f.write_str(s),
            DecodedValue::Bytes(b) => f.write_str(&hex::encode(b)),
            DecodedValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Parses a hex run into bytes. Odd lengths are rejected, not padded.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, ConvertError> {
    if hex_str.len() % 2 != 0 {
        return Err(ConvertError::OddLength(hex_str.len()));
    }
    hex::decode(hex_str).map_err(|e| ConvertError::InvalidHex(e.to_string()))
}

/// Decodes a hex run as the given semantic type.
pub fn decode(hex_str: &str, ty: SemanticType) -> Result<DecodedValue, ConvertError> {
    let bytes = hex_to_bytes(hex_str)?;
    decode_bytes(&bytes, ty)
}

/// Like [`decode`], with the semantic type given by name as stored in the dictionary.
pub fn decode_as(hex_str: &str, semantic_type: &str) -> Result<DecodedValue, ConvertError> {
    decode(hex_str, semantic_type.parse()?)
}

pub fn decode_bytes(bytes: &[u8], ty: SemanticType) -> Result<DecodedValue, ConvertError> {
    match ty {
        // 0x80000000 and above wrap to negative: same as subtracting 0x1_0000_0000.
        SemanticType::Int32 => Ok(DecodedValue::Int32(be_u32(bytes, ty)? as i32)),
        SemanticType::Uint32 => Ok(DecodedValue::Uint32(be_u32(bytes, ty)?)),
        SemanticType::Float32 => {
            let raw: [u8; 4] = bytes.try_into().map_err(|_| width(ty, "4", bytes.len()))?;
            Ok(DecodedValue::Float32(f32::from_be_bytes(raw)))
        }
        SemanticType::Float64 => {
            if bytes.len() != 8 {
                return Err(width(ty, "8", bytes.len()));
            }
            let hi = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let lo = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            let bits = (u64::from(hi) << 32) | u64::from(lo);
            Ok(DecodedValue::Float64(f64::from_bits(bits)))
        }
        SemanticType::String => String::from_utf8(bytes.to_vec())
            .map(DecodedValue::String)
            .map_err(|_| ConvertError::InvalidUtf8),
        SemanticType::ByteArray => Ok(DecodedValue::Bytes(bytes.to_vec())),
        SemanticType::Boolean => Ok(DecodedValue::Bool(bytes.iter().any(|b| *b != 0))),
    }
}

/// Encodes a JSON request value as the given semantic type.
pub fn encode(value: &Value, ty: SemanticType) -> Result<String, ConvertError> {
    Ok(hex::encode(encode_bytes(&DecodedValue::from_json(value, ty)?)))
}

pub fn encode_value(value: &DecodedValue) -> String {
    hex::encode(encode_bytes(value))
}

pub fn encode_bytes(value: &DecodedValue) -> Vec<u8> {
    match value {
        DecodedValue::Int32(v) => v.to_be_bytes().to_vec(),
        DecodedValue::Uint32(v) => v.to_be_bytes().to_vec(),
        DecodedValue::Float32(v) => v.to_be_bytes().to_vec(),
        DecodedValue::Float64(v) => {
            let bits = v.to_bits();
            let mut out = Vec::with_capacity(8);
            out.extend_from_slice(&((bits >> 32) as u32).to_be_bytes());
            out.extend_from_slice(&(bits as u32).to_be_bytes());
            out
        }
        DecodedValue::String(s) => s.as_bytes().to_vec(),
        DecodedValue::Bytes(b) => b.clone(),
        DecodedValue::Bool(b) => vec![u8::from(*b)],
    }
}

fn be_u32(bytes: &[u8], ty: SemanticType) -> Result<u32, ConvertError> {
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(width(ty, "1..=4", bytes.len()));
    }
    let mut buf = [0u8; 4];
    buf[4 - bytes.len()..].copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf))
}

fn json_i64(value: &Value, ty: SemanticType) -> Result<i64, ConvertError> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                return Ok(v);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                    Ok(f as i64)
                }
                _ => Err(out_of_range(ty, n)),
            }
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| out_of_range(ty, s)),
        other => Err(mismatch(ty, other)),
    }
}

fn json_f64(value: &Value, ty: SemanticType) -> Result<f64, ConvertError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| out_of_range(ty, n)),
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| out_of_range(ty, s)),
        other => Err(mismatch(ty, other)),
    }
}

fn float_json(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn width(ty: SemanticType, expected: &'static str, actual: usize) -> ConvertError {
    ConvertError::WrongWidth {
        ty,
        expected,
        actual,
    }
}

fn out_of_range(ty: SemanticType, value: impl fmt::Display) -> ConvertError {
    ConvertError::OutOfRange {
        ty,
        value: value.to_string(),
    }
}

fn mismatch(ty: SemanticType, found: &Value) -> ConvertError {
    let found = match found {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    ConvertError::ValueMismatch { ty, found }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int32_negative_round_trip() {
        let hex = encode(&json!(-1), SemanticType::Int32).unwrap();
        assert_eq!(hex, "ffffffff");
        assert_eq!(decode(&hex, SemanticType::Int32).unwrap(), DecodedValue::Int32(-1));
    }

    #[test]
    fn test_int32_sign_boundary() {
        assert_eq!(
            decode("80000000", SemanticType::Int32).unwrap(),
            DecodedValue::Int32(i32::MIN)
        );
        assert_eq!(
            decode("7fffffff", SemanticType::Int32).unwrap(),
            DecodedValue::Int32(i32::MAX)
        );
        assert_eq!(
            decode("80000000", SemanticType::Uint32).unwrap(),
            DecodedValue::Uint32(0x8000_0000)
        );
    }

    #[test]
    fn test_short_integers_are_left_padded() {
        assert_eq!(decode("ff", SemanticType::Int32).unwrap(), DecodedValue::Int32(255));
        assert_eq!(decode("0102", SemanticType::Uint32).unwrap(), DecodedValue::Uint32(258));
        assert!(matches!(
            decode("0000000001", SemanticType::Uint32),
            Err(ConvertError::WrongWidth { actual: 5, .. })
        ));
    }

    #[test]
    fn test_string_round_trip_is_byte_length() {
        let hex = encode(&json!("AB"), SemanticType::String).unwrap();
        assert_eq!(hex, "4142");
        assert_eq!(hex.len() / 2, 2);
        assert_eq!(
            decode(&hex, SemanticType::String).unwrap(),
            DecodedValue::String("AB".to_string())
        );
    }

    #[test]
    fn test_multibyte_utf8_string() {
        let hex = encode(&json!("°C"), SemanticType::String).unwrap();
        assert_eq!(hex, "c2b043");
        assert_eq!(
            decode(&hex, SemanticType::String).unwrap(),
            DecodedValue::String("°C".to_string())
        );
        assert_eq!(decode("c3", SemanticType::String), Err(ConvertError::InvalidUtf8));
    }

    #[test]
    fn test_float32_and_float64() {
        assert_eq!(
            decode("41c80000", SemanticType::Float32).unwrap(),
            DecodedValue::Float32(25.0)
        );
        let hex = encode(&json!(-12.5), SemanticType::Float64).unwrap();
        assert_eq!(hex, "c029000000000000");
        assert_eq!(
            decode(&hex, SemanticType::Float64).unwrap(),
            DecodedValue::Float64(-12.5)
        );
        assert!(decode("41c8", SemanticType::Float32).is_err());
        assert!(decode("41c80000", SemanticType::Float64).is_err());
    }

    #[test]
    fn test_boolean() {
        assert_eq!(decode("00", SemanticType::Boolean).unwrap(), DecodedValue::Bool(false));
        assert_eq!(decode("02", SemanticType::Boolean).unwrap(), DecodedValue::Bool(true));
        assert_eq!(encode(&json!(true), SemanticType::Boolean).unwrap(), "01");
        assert_eq!(encode(&json!(0), SemanticType::Boolean).unwrap(), "00");
    }

    #[test]
    fn test_bytearray_passthrough() {
        assert_eq!(
            decode("DEADbeef", SemanticType::ByteArray).unwrap(),
            DecodedValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(encode(&json!("0a0B"), SemanticType::ByteArray).unwrap(), "0a0b");
        assert_eq!(encode(&json!([1, 255]), SemanticType::ByteArray).unwrap(), "01ff");
        assert!(encode(&json!([256]), SemanticType::ByteArray).is_err());
    }

    #[test]
    fn test_odd_length_is_an_error() {
        assert_eq!(decode("abc", SemanticType::ByteArray), Err(ConvertError::OddLength(3)));
        assert!(matches!(
            decode("zz", SemanticType::ByteArray),
            Err(ConvertError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_unsupported_type_name() {
        assert_eq!(
            decode_as("01", "decimal128"),
            Err(ConvertError::UnsupportedType("decimal128".to_string()))
        );
        assert_eq!(
            decode_as("01", " UInt32 ").unwrap(),
            DecodedValue::Uint32(1)
        );
    }

    #[test]
    fn test_encode_range_checks() {
        assert!(matches!(
            encode(&json!(4_294_967_296u64), SemanticType::Uint32),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode(&json!(-1), SemanticType::Uint32),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert_eq!(encode(&json!("42"), SemanticType::Uint32).unwrap(), "0000002a");
        assert!(matches!(
            encode(&json!(1e40), SemanticType::Float32),
            Err(ConvertError::OutOfRange { .. })
        ));
        assert_eq!(
            encode(&json!(12), SemanticType::String),
            Err(ConvertError::ValueMismatch {
                ty: SemanticType::String,
                found: "number"
            })
        );
    }

    #[test]
    fn test_json_rendering() {
        assert_eq!(DecodedValue::Float32(1.5).to_json(), json!(1.5));
        assert_eq!(DecodedValue::Bytes(vec![1, 2]).to_json(), json!("0102"));
        assert_eq!(DecodedValue::Float64(f64::NAN).to_json(), Value::Null);
        assert_eq!(
            serde_json::to_value(DecodedValue::Int32(-7)).unwrap(),
            json!(-7)
        );
    }

    #[test]
    fn test_semantic_type_serde_names() {
        assert_eq!(
            serde_json::to_value(SemanticType::ByteArray).unwrap(),
            json!("bytearray")
        );
        assert_eq!("FLOAT64".parse::<SemanticType>().unwrap(), SemanticType::Float64);
    }
}
