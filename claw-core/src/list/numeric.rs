// Fixed-width numeric lists (spec.md §4.3): elements packed
// contiguously with no per-element header, floats stored as their
// IEEE-754 bit pattern. Generic over the ten wire-numeric scalar
// types via `WireNumeric`, which supplies the byte width and
// conversions `funty::Numeric` doesn't commit us to by name.

use claw_base::{Error, Result};
use funty::Numeric;

use crate::cancel::CancelToken;
use crate::header::FieldType;
use crate::ioutil::align8;

/// A scalar type that can appear as a numeric list element. Bounded by
/// `funty::Numeric` for the usual arithmetic/ordering traits; the byte
/// conversions are spelled out here rather than assumed from `funty`,
/// since wire layout is little-endian/bit-pattern and must be exact.
pub trait WireNumeric: Numeric + Copy {
    const WIDTH: usize;
    const FIELD_TYPE: FieldType;

    fn to_wire_bytes(self) -> Vec<u8>;
    fn from_wire_bytes(bytes: &[u8]) -> Self;

    /// Wraps an owned list in the matching [`crate::message::FieldValue`]
    /// variant. Lets struct-runtime code stay generic over `T` instead
    /// of hand-matching ten numeric variants at every call site.
    fn wrap_list(list: NumericList<Self>) -> crate::message::FieldValue;
    fn unwrap_list(value: &crate::message::FieldValue) -> Option<&NumericList<Self>>;
    fn unwrap_list_mut(value: &mut crate::message::FieldValue) -> Option<&mut NumericList<Self>>;
}

macro_rules! impl_wire_numeric_int {
    ($t:ty, $width:expr, $tag:expr, $variant:ident) => {
        impl WireNumeric for $t {
            const WIDTH: usize = $width;
            const FIELD_TYPE: FieldType = $tag;

            fn to_wire_bytes(self) -> Vec<u8> {
                self.to_le_bytes().to_vec()
            }

            fn from_wire_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn wrap_list(list: NumericList<Self>) -> crate::message::FieldValue {
                crate::message::FieldValue::$variant(list)
            }

            fn unwrap_list(value: &crate::message::FieldValue) -> Option<&NumericList<Self>> {
                match value {
                    crate::message::FieldValue::$variant(l) => Some(l),
                    _ => None,
                }
            }

            fn unwrap_list_mut(value: &mut crate::message::FieldValue) -> Option<&mut NumericList<Self>> {
                match value {
                    crate::message::FieldValue::$variant(l) => Some(l),
                    _ => None,
                }
            }
        }
    };
}

impl_wire_numeric_int!(i8, 1, FieldType::ListI8, ListI8);
impl_wire_numeric_int!(i16, 2, FieldType::ListI16, ListI16);
impl_wire_numeric_int!(i32, 4, FieldType::ListI32, ListI32);
impl_wire_numeric_int!(i64, 8, FieldType::ListI64, ListI64);
impl_wire_numeric_int!(u8, 1, FieldType::ListU8, ListU8);
impl_wire_numeric_int!(u16, 2, FieldType::ListU16, ListU16);
impl_wire_numeric_int!(u32, 4, FieldType::ListU32, ListU32);
impl_wire_numeric_int!(u64, 8, FieldType::ListU64, ListU64);

impl WireNumeric for f32 {
    const WIDTH: usize = 4;
    const FIELD_TYPE: FieldType = FieldType::ListF32;

    fn to_wire_bytes(self) -> Vec<u8> {
        self.to_bits().to_le_bytes().to_vec()
    }

    fn from_wire_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_bits(u32::from_le_bytes(buf))
    }

    fn wrap_list(list: NumericList<Self>) -> crate::message::FieldValue {
        crate::message::FieldValue::ListF32(list)
    }

    fn unwrap_list(value: &crate::message::FieldValue) -> Option<&NumericList<Self>> {
        match value {
            crate::message::FieldValue::ListF32(l) => Some(l),
            _ => None,
        }
    }

    fn unwrap_list_mut(value: &mut crate::message::FieldValue) -> Option<&mut NumericList<Self>> {
        match value {
            crate::message::FieldValue::ListF32(l) => Some(l),
            _ => None,
        }
    }
}

impl WireNumeric for f64 {
    const WIDTH: usize = 8;
    const FIELD_TYPE: FieldType = FieldType::ListF64;

    fn to_wire_bytes(self) -> Vec<u8> {
        self.to_bits().to_le_bytes().to_vec()
    }

    fn from_wire_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        f64::from_bits(u64::from_le_bytes(buf))
    }

    fn wrap_list(list: NumericList<Self>) -> crate::message::FieldValue {
        crate::message::FieldValue::ListF64(list)
    }

    fn unwrap_list(value: &crate::message::FieldValue) -> Option<&NumericList<Self>> {
        match value {
            crate::message::FieldValue::ListF64(l) => Some(l),
            _ => None,
        }
    }

    fn unwrap_list_mut(value: &mut crate::message::FieldValue) -> Option<&mut NumericList<Self>> {
        match value {
            crate::message::FieldValue::ListF64(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NumericList<T: WireNumeric> {
    items: Vec<T>,
}

impl<T: WireNumeric> Default for NumericList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: WireNumeric> NumericList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<T> {
        self.items.get(index).copied().ok_or_else(|| {
            Error::out_of_range(format!(
                "numeric list index {index} out of bounds (len {})",
                self.items.len()
            ))
        })
    }

    pub fn append(&mut self, value: T) {
        self.items.push(value);
    }

    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let slot = self.items.get_mut(index).ok_or_else(|| {
            Error::out_of_range(format!(
                "numeric list index {index} out of bounds (len {})",
                self.items.len()
            ))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn iter_range<'a>(
        &'a self,
        from: usize,
        to: usize,
        cancel: &'a dyn CancelToken,
    ) -> impl Iterator<Item = T> + 'a {
        self.items[from..to.min(self.items.len())]
            .iter()
            .copied()
            .take_while(move |_| !cancel.is_cancelled())
    }

    pub fn item_count(&self) -> u64 {
        self.items.len() as u64
    }

    pub fn wire_size(&self) -> u64 {
        if self.items.is_empty() {
            return 0;
        }
        8 + align8((self.items.len() * T::WIDTH) as u64)
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.items.len() * T::WIDTH);
        for item in &self.items {
            out.extend_from_slice(&item.to_wire_bytes());
        }
        let pad = align8(out.len() as u64) as usize - out.len();
        out.extend(std::iter::repeat(0u8).take(pad));
        out
    }

    pub fn decode(item_count: u64, body: &[u8]) -> Result<Self> {
        let len = item_count as usize;
        let data_len = len * T::WIDTH;
        if body.len() < data_len {
            return Err(Error::malformed(format!(
                "numeric list body is {} bytes, expected at least {data_len} for {len} items",
                body.len()
            )));
        }
        let mut items = Vec::with_capacity(len);
        for chunk in body[..data_len].chunks_exact(T::WIDTH) {
            items.push(T::from_wire_bytes(chunk));
        }
        Ok(Self { items })
    }
}
