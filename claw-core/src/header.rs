// Bit-packed generic header (C1, spec.md §3-4.1): an 8-byte word
// bit-packed as field number (0..15), field type tag (16..23), and a
// 40-bit payload (24..63). Get/set are pure mask-and-shift; this file
// never allocates, packing small fixed fields into a plain integer
// rather than reaching for a bitfield crate.

use claw_base::{Error, Result};

pub const MAX_PAYLOAD: u64 = (1 << 40) - 1;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord, Default)]
pub struct Header(u64);

impl Header {
    #[inline]
    pub fn new(field_number: u16, ty: FieldType, payload: u64) -> Result<Self> {
        if payload > MAX_PAYLOAD {
            return Err(Error::out_of_range(format!(
                "header payload {payload} exceeds 40-bit cap"
            )));
        }
        Ok(Header(field_number as u64 | ((ty as u64) << 16) | (payload << 24)))
    }

    #[inline]
    pub fn field_number(&self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    #[inline]
    pub fn field_type(&self) -> FieldType {
        FieldType::from_u8(((self.0 >> 16) & 0xff) as u8)
    }

    #[inline]
    pub fn payload(&self) -> u64 {
        self.0 >> 24
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Header(u64::from_le_bytes(bytes))
    }
}

/// Closed set of wire type tags (spec.md §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldType {
    Unknown = 0,
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    String = 12,
    Bytes = 13,
    Struct = 14,
    ListBool = 41,
    ListI8 = 42,
    ListI16 = 43,
    ListI32 = 44,
    ListI64 = 45,
    ListU8 = 46,
    ListU16 = 47,
    ListU32 = 48,
    ListU64 = 49,
    ListF32 = 50,
    ListF64 = 51,
    ListBytes = 52,
    ListString = 53,
    ListStruct = 54,
}

impl FieldType {
    pub fn from_u8(tag: u8) -> Self {
        use FieldType::*;
        match tag {
            0 => Unknown,
            1 => Bool,
            2 => I8,
            3 => I16,
            4 => I32,
            5 => I64,
            6 => U8,
            7 => U16,
            8 => U32,
            9 => U64,
            10 => F32,
            11 => F64,
            12 => String,
            13 => Bytes,
            14 => Struct,
            41 => ListBool,
            42 => ListI8,
            43 => ListI16,
            44 => ListI32,
            45 => ListI64,
            46 => ListU8,
            47 => ListU16,
            48 => ListU32,
            49 => ListU64,
            50 => ListF32,
            51 => ListF64,
            52 => ListBytes,
            53 => ListString,
            54 => ListStruct,
            _ => Unknown,
        }
    }

    pub fn is_list(&self) -> bool {
        (*self as u8) >= 41
    }

    pub fn name(&self) -> &'static str {
        use FieldType::*;
        match self {
            Unknown => "unknown",
            Bool => "bool",
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            F32 => "f32",
            F64 => "f64",
            String => "string",
            Bytes => "bytes",
            Struct => "struct",
            ListBool => "list<bool>",
            ListI8 => "list<i8>",
            ListI16 => "list<i16>",
            ListI32 => "list<i32>",
            ListI64 => "list<i64>",
            ListU8 => "list<u8>",
            ListU16 => "list<u16>",
            ListU32 => "list<u32>",
            ListU64 => "list<u64>",
            ListF32 => "list<f32>",
            ListF64 => "list<f64>",
            ListBytes => "list<bytes>",
            ListString => "list<string>",
            ListStruct => "list<struct>",
        }
    }

    /// True for the handful of scalar types whose value is wide enough
    /// (64-bit) that it can't fit the 40-bit payload and needs a
    /// second trailing word.
    pub fn is_wide_scalar(&self) -> bool {
        matches!(self, FieldType::I64 | FieldType::U64 | FieldType::F64)
    }
}
