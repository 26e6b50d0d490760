// List of bools (spec.md §4.3): bit-packed, little-endian bit order
// within each byte, stored as whole 64-bit words so capacity always
// grows in units of 64 bits. Appending within existing capacity never
// reallocates.

use claw_base::{Error, Result};

use crate::cancel::CancelToken;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoolList {
    words: Vec<u64>,
    len: usize,
}

impl BoolList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<bool> {
        if index >= self.len {
            return Err(Error::out_of_range(format!(
                "bool list index {index} out of bounds (len {})",
                self.len
            )));
        }
        let word = self.words[index / 64];
        Ok((word >> (index % 64)) & 1 != 0)
    }

    /// Appends a bit, growing capacity by a 64-bit word when the
    /// current word is exhausted.
    pub fn append(&mut self, value: bool) {
        if self.len % 64 == 0 {
            self.words.push(0);
        }
        if value {
            let word = self.words.last_mut().expect("just pushed");
            *word |= 1 << (self.len % 64);
        }
        self.len += 1;
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<()> {
        if index >= self.len {
            return Err(Error::out_of_range(format!(
                "bool list index {index} out of bounds (len {})",
                self.len
            )));
        }
        let word = &mut self.words[index / 64];
        let bit = 1u64 << (index % 64);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
        Ok(())
    }

    /// Iterates `[from, to)`, stopping early (yielding fewer than
    /// `to - from` items) if `cancel` reports cancellation between
    /// elements.
    pub fn iter_range<'a>(
        &'a self,
        from: usize,
        to: usize,
        cancel: &'a dyn CancelToken,
    ) -> impl Iterator<Item = bool> + 'a {
        (from..to.min(self.len)).scan((), move |_, i| {
            if cancel.is_cancelled() {
                None
            } else {
                Some(self.get(i).unwrap_or(false))
            }
        })
    }

    /// Total on-wire size including the field header, or 0 if the list
    /// is empty (per the "empty lists must not be written" rule).
    pub fn wire_size(&self) -> u64 {
        if self.len == 0 {
            return 0;
        }
        8 + 8 * self.word_count() as u64
    }

    fn word_count(&self) -> usize {
        self.len.div_ceil(64)
    }

    /// Item count for the field header's payload word.
    pub fn item_count(&self) -> u64 {
        self.len as u64
    }

    /// Packs the bit buffer into its on-wire byte representation,
    /// already padded to an 8-byte boundary (each word is 8 bytes).
    pub fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.word_count() * 8);
        for word in &self.words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Reconstructs a `BoolList` from an item count (from the field
    /// header) and the list's raw padded body bytes.
    pub fn decode(item_count: u64, body: &[u8]) -> Result<Self> {
        let len = item_count as usize;
        let expected_words = len.div_ceil(64);
        if body.len() != expected_words * 8 {
            return Err(Error::malformed(format!(
                "bool list body is {} bytes, expected {} for {len} items",
                body.len(),
                expected_words * 8
            )));
        }
        let mut words = Vec::with_capacity(expected_words);
        for chunk in body.chunks_exact(8) {
            words.push(u64::from_le_bytes(chunk.try_into().expect("chunk of 8")));
        }
        Ok(Self { words, len })
    }
}
