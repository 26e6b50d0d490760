// Scalar field codec (C2, spec.md §4.2): encode/decode of the twelve
// scalar wire types into/from a field slot. Narrow scalars (bool,
// 8/16/32-bit numbers, f32) live entirely in the header's 40-bit
// payload; wide scalars (64-bit numbers, f64) zero the payload and
// append a second 8-byte word; bytes/string are length-prefixed and
// copied inline, padded to the next 8-byte boundary.

use claw_base::{Error, Result};

use crate::header::FieldType;
use crate::ioutil::align8;

/// A decoded or about-to-be-encoded scalar value, independent of which
/// field slot it lives in.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bytes(Vec<u8>),
    Str(String),
}

impl Scalar {
    /// The wire type tag this value would encode as.
    pub fn field_type(&self) -> FieldType {
        match self {
            Scalar::Bool(_) => FieldType::Bool,
            Scalar::I8(_) => FieldType::I8,
            Scalar::I16(_) => FieldType::I16,
            Scalar::I32(_) => FieldType::I32,
            Scalar::I64(_) => FieldType::I64,
            Scalar::U8(_) => FieldType::U8,
            Scalar::U16(_) => FieldType::U16,
            Scalar::U32(_) => FieldType::U32,
            Scalar::U64(_) => FieldType::U64,
            Scalar::F32(_) => FieldType::F32,
            Scalar::F64(_) => FieldType::F64,
            Scalar::Bytes(_) => FieldType::Bytes,
            Scalar::Str(_) => FieldType::String,
        }
    }

    /// Checks this value's type against the schema's declared type for
    /// the slot, failing with `TypeMismatch` on disagreement.
    pub fn check_type(&self, field_number: u16, expected: FieldType) -> Result<()> {
        let actual = self.field_type();
        if actual != expected {
            return Err(Error::type_mismatch(field_number, expected.name(), actual.name()));
        }
        Ok(())
    }

    /// True when this is the type's zero value, per the no-zero-compression
    /// default-omission rule (spec.md §3, S3).
    pub fn is_zero(&self) -> bool {
        match self {
            Scalar::Bool(b) => !b,
            Scalar::I8(v) => *v == 0,
            Scalar::I16(v) => *v == 0,
            Scalar::I32(v) => *v == 0,
            Scalar::I64(v) => *v == 0,
            Scalar::U8(v) => *v == 0,
            Scalar::U16(v) => *v == 0,
            Scalar::U32(v) => *v == 0,
            Scalar::U64(v) => *v == 0,
            Scalar::F32(v) => *v == 0.0,
            Scalar::F64(v) => *v == 0.0,
            Scalar::Bytes(v) => v.is_empty(),
            Scalar::Str(v) => v.is_empty(),
        }
    }

    /// Whether this value's header carries the value directly (narrow)
    /// or only a length/zero with the value following out-of-line
    /// (wide / variable).
    pub fn is_wide_or_variable(&self) -> bool {
        matches!(
            self,
            Scalar::I64(_) | Scalar::U64(_) | Scalar::F64(_) | Scalar::Bytes(_) | Scalar::Str(_)
        )
    }

    /// Total on-wire size of this field, including its 8-byte header
    /// and any appended word or inline/padded data.
    pub fn wire_size(&self) -> u64 {
        match self {
            Scalar::Bool(_)
            | Scalar::I8(_)
            | Scalar::I16(_)
            | Scalar::I32(_)
            | Scalar::U8(_)
            | Scalar::U16(_)
            | Scalar::U32(_)
            | Scalar::F32(_) => 8,
            Scalar::I64(_) | Scalar::U64(_) | Scalar::F64(_) => 16,
            Scalar::Bytes(b) => 8 + align8(b.len() as u64),
            Scalar::Str(s) => 8 + align8(s.len() as u64),
        }
    }

    /// The 40-bit header payload word for a narrow scalar. Must only be
    /// called on variants where [`Scalar::is_wide_or_variable`] is false,
    /// other than `Bytes`/`Str`, whose payload is their byte length.
    pub fn header_payload(&self) -> u64 {
        match self {
            Scalar::Bool(b) => *b as u64,
            Scalar::I8(v) => (*v as u8) as u64,
            Scalar::I16(v) => (*v as u16) as u64,
            Scalar::I32(v) => (*v as u32) as u64,
            Scalar::U8(v) => *v as u64,
            Scalar::U16(v) => *v as u64,
            Scalar::U32(v) => *v as u64,
            Scalar::F32(v) => v.to_bits() as u64,
            Scalar::I64(_) | Scalar::U64(_) | Scalar::F64(_) => 0,
            Scalar::Bytes(b) => b.len() as u64,
            Scalar::Str(s) => s.len() as u64,
        }
    }

    /// The second 8-byte word appended after the header for wide
    /// scalars (`I64`/`U64`/`F64`). Returns `None` for every other
    /// variant.
    pub fn wide_word(&self) -> Option<[u8; 8]> {
        match self {
            Scalar::I64(v) => Some(v.to_le_bytes()),
            Scalar::U64(v) => Some(v.to_le_bytes()),
            Scalar::F64(v) => Some(v.to_bits().to_le_bytes()),
            _ => None,
        }
    }

    /// Reconstructs a narrow scalar from a header's type tag and
    /// 40-bit payload. Not valid for `I64`/`U64`/`F64`/`Bytes`/`Str`.
    pub fn from_narrow_payload(ty: FieldType, payload: u64) -> Result<Scalar> {
        Ok(match ty {
            FieldType::Bool => Scalar::Bool(payload != 0),
            FieldType::I8 => Scalar::I8(payload as u8 as i8),
            FieldType::I16 => Scalar::I16(payload as u16 as i16),
            FieldType::I32 => Scalar::I32(payload as u32 as i32),
            FieldType::U8 => Scalar::U8(payload as u8),
            FieldType::U16 => Scalar::U16(payload as u16),
            FieldType::U32 => Scalar::U32(payload as u32),
            FieldType::F32 => Scalar::F32(f32::from_bits(payload as u32)),
            other => {
                return Err(Error::malformed(format!(
                    "field type {} is not a narrow scalar",
                    other.name()
                )))
            }
        })
    }

    /// Reconstructs a wide scalar from its type tag and the 8-byte
    /// word that follows the header.
    pub fn from_wide_word(ty: FieldType, word: [u8; 8]) -> Result<Scalar> {
        Ok(match ty {
            FieldType::I64 => Scalar::I64(i64::from_le_bytes(word)),
            FieldType::U64 => Scalar::U64(u64::from_le_bytes(word)),
            FieldType::F64 => Scalar::F64(f64::from_bits(u64::from_le_bytes(word))),
            other => {
                return Err(Error::malformed(format!(
                    "field type {} is not a wide scalar",
                    other.name()
                )))
            }
        })
    }

    /// Reconstructs a `Bytes`/`Str` value from its inline (unpadded)
    /// data slice, per the header's declared length.
    pub fn from_inline_data(ty: FieldType, data: &[u8]) -> Result<Scalar> {
        match ty {
            FieldType::Bytes => Ok(Scalar::Bytes(data.to_vec())),
            FieldType::String => std::str::from_utf8(data)
                .map(|s| Scalar::Str(s.to_string()))
                .map_err(|e| Error::malformed(format!("string field is not valid utf-8: {e}"))),
            other => Err(Error::malformed(format!(
                "field type {} has no inline data",
                other.name()
            ))),
        }
    }

    /// The zero value for a given schema scalar type, used by getters
    /// on an unset field slot.
    pub fn zero_for(ty: FieldType) -> Result<Scalar> {
        Ok(match ty {
            FieldType::Bool => Scalar::Bool(false),
            FieldType::I8 => Scalar::I8(0),
            FieldType::I16 => Scalar::I16(0),
            FieldType::I32 => Scalar::I32(0),
            FieldType::I64 => Scalar::I64(0),
            FieldType::U8 => Scalar::U8(0),
            FieldType::U16 => Scalar::U16(0),
            FieldType::U32 => Scalar::U32(0),
            FieldType::U64 => Scalar::U64(0),
            FieldType::F32 => Scalar::F32(0.0),
            FieldType::F64 => Scalar::F64(0.0),
            FieldType::Bytes => Scalar::Bytes(Vec::new()),
            FieldType::String => Scalar::Str(String::new()),
            other => {
                return Err(Error::malformed(format!(
                    "field type {} has no scalar zero value",
                    other.name()
                )))
            }
        })
    }

    /// Checks a string/bytes length against the 40-bit payload cap
    /// (spec.md §3), failing with `OutOfRange` if it would overflow.
    pub fn check_length_cap(&self) -> Result<()> {
        let len = match self {
            Scalar::Bytes(b) => b.len() as u64,
            Scalar::Str(s) => s.len() as u64,
            _ => return Ok(()),
        };
        if len > crate::header::MAX_PAYLOAD {
            return Err(Error::out_of_range(format!(
                "string/bytes length {len} exceeds 2^40 - 1"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_narrow_roundtrip() {
        for (scalar, ty) in [
            (Scalar::Bool(true), FieldType::Bool),
            (Scalar::I8(-1), FieldType::I8),
            (Scalar::U16(0xbeef), FieldType::U16),
            (Scalar::F32(1.5), FieldType::F32),
        ] {
            assert!(!scalar.is_wide_or_variable());
            let payload = scalar.header_payload();
            let back = Scalar::from_narrow_payload(ty, payload).unwrap();
            assert_eq!(back, scalar);
        }
    }

    #[test]
    fn test_wide_roundtrip() {
        for scalar in [Scalar::I64(-12345), Scalar::U64(u64::MAX), Scalar::F64(2.25)] {
            assert!(scalar.is_wide_or_variable());
            let word = scalar.wide_word().unwrap();
            let back = Scalar::from_wide_word(scalar.field_type(), word).unwrap();
            assert_eq!(back, scalar);
        }
    }

    #[test]
    fn test_s1_bool_and_i8_sizes() {
        // S1: both fields are 8-byte narrow scalars.
        assert_eq!(Scalar::Bool(true).wire_size(), 8);
        assert_eq!(Scalar::I8(-1).wire_size(), 8);
        assert_eq!(Scalar::I8(-1).header_payload(), 0xff);
    }

    #[test]
    fn test_s2_string_padding() {
        // S2: "Hello World" is 11 bytes, padded to 16.
        let s = Scalar::Str("Hello World".to_string());
        assert_eq!(s.header_payload(), 11);
        assert_eq!(s.wire_size(), 8 + 16);
    }

    #[test]
    fn test_s3_default_omission() {
        let z = Scalar::U16(0);
        assert!(z.is_zero());
        let nz = Scalar::U16(1);
        assert!(!nz.is_zero());
    }

    #[test]
    fn test_type_mismatch() {
        let s = Scalar::Bool(true);
        assert!(s.check_type(0, FieldType::Bool).is_ok());
        assert!(s.check_type(0, FieldType::I8).is_err());
    }

    #[test]
    fn test_length_cap() {
        let s = Scalar::Bytes(vec![0u8; 16]);
        assert!(s.check_length_cap().is_ok());
    }
}
