// Length-prefixed byte/string lists (spec.md §4.3): each entry is a
// 4-byte length followed by that many bytes, with no per-entry
// padding; the whole concatenation is padded once at the end. Data
// size and pad count are tracked incrementally so append/set stay
// O(1) instead of re-summing the list on every mutation.

use claw_base::{Error, Result};

use crate::cancel::CancelToken;
use crate::header::FieldType;
use crate::ioutil::align8;

#[derive(Clone, Debug, PartialEq)]
pub struct ByteEntryList {
    entries: Vec<Vec<u8>>,
    /// `entries` + their 4-byte length prefixes, excluding trailing pad.
    data_size: u64,
    /// Whether entries must additionally be valid UTF-8 (`ListString`)
    /// or are opaque (`ListBytes`).
    element_type: FieldType,
}

impl ByteEntryList {
    pub fn new(element_type: FieldType) -> Self {
        Self {
            entries: Vec::new(),
            data_size: 0,
            element_type,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&[u8]> {
        self.entries.get(index).map(Vec::as_slice).ok_or_else(|| {
            Error::out_of_range(format!(
                "byte list index {index} out of bounds (len {})",
                self.entries.len()
            ))
        })
    }

    pub fn get_str(&self, index: usize) -> Result<&str> {
        let bytes = self.get(index)?;
        std::str::from_utf8(bytes)
            .map_err(|e| Error::malformed(format!("string list entry is not valid utf-8: {e}")))
    }

    pub fn append(&mut self, entry: Vec<u8>) -> Result<()> {
        if entry.len() as u64 > crate::header::MAX_PAYLOAD {
            return Err(Error::out_of_range("byte list entry exceeds 2^40 - 1"));
        }
        self.data_size += 4 + entry.len() as u64;
        self.entries.push(entry);
        Ok(())
    }

    pub fn set(&mut self, index: usize, entry: Vec<u8>) -> Result<()> {
        let slot = self.entries.get_mut(index).ok_or_else(|| {
            Error::out_of_range(format!(
                "byte list index {index} out of bounds (len {})",
                self.entries.len()
            ))
        })?;
        self.data_size = self.data_size - 4 - slot.len() as u64 + 4 + entry.len() as u64;
        *slot = entry;
        Ok(())
    }

    pub fn iter_range<'a>(
        &'a self,
        from: usize,
        to: usize,
        cancel: &'a dyn CancelToken,
    ) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries[from..to.min(self.entries.len())]
            .iter()
            .map(Vec::as_slice)
            .take_while(move |_| !cancel.is_cancelled())
    }

    pub fn item_count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn wire_size(&self) -> u64 {
        if self.entries.is_empty() {
            return 0;
        }
        8 + align8(self.data_size)
    }

    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_size as usize);
        for entry in &self.entries {
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry);
        }
        let pad = align8(out.len() as u64) as usize - out.len();
        out.extend(std::iter::repeat(0u8).take(pad));
        out
    }

    pub fn decode(element_type: FieldType, item_count: u64, body: &[u8]) -> Result<Self> {
        let mut entries = Vec::with_capacity(item_count as usize);
        let mut data_size = 0u64;
        let mut cursor = 0usize;
        for _ in 0..item_count {
            if cursor + 4 > body.len() {
                return Err(Error::malformed("byte list entry length header truncated"));
            }
            let len = u32::from_le_bytes(body[cursor..cursor + 4].try_into().expect("4 bytes"));
            cursor += 4;
            let len = len as usize;
            if cursor + len > body.len() {
                return Err(Error::malformed("byte list entry data truncated"));
            }
            let entry = body[cursor..cursor + len].to_vec();
            cursor += len;
            data_size += 4 + len as u64;
            entries.push(entry);
        }
        Ok(Self {
            entries,
            data_size,
            element_type,
        })
    }

    pub fn element_type(&self) -> FieldType {
        self.element_type
    }
}
