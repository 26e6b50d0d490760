// Struct lists (spec.md §4.3): n back-to-back messages, each
// self-delimiting via its own header's size field. Appending a child
// links it to this list's owning struct so size propagation reaches
// every ancestor the list itself is attached to.

use std::sync::Arc;

use claw_base::{Error, Result};

use crate::cancel::CancelToken;
use crate::message::Message;
use crate::schema::{SchemaArena, SchemaRef};

#[derive(Clone, Debug, PartialEq)]
pub struct StructList {
    items: Vec<Message>,
    element_schema: SchemaRef,
}

impl StructList {
    pub fn new(element_schema: SchemaRef) -> Self {
        Self {
            items: Vec::new(),
            element_schema,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&Message> {
        self.items.get(index).ok_or_else(|| {
            Error::out_of_range(format!(
                "struct list index {index} out of bounds (len {})",
                self.items.len()
            ))
        })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Message> {
        let len = self.items.len();
        self.items.get_mut(index).ok_or_else(|| {
            Error::out_of_range(format!("struct list index {index} out of bounds (len {len})"))
        })
    }

    pub fn append(&mut self, item: Message) -> Result<()> {
        if item.schema() != self.element_schema {
            return Err(Error::type_mismatch(0, "matching struct schema", "different struct schema"));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn set(&mut self, index: usize, item: Message) -> Result<()> {
        if item.schema() != self.element_schema {
            return Err(Error::type_mismatch(0, "matching struct schema", "different struct schema"));
        }
        let slot = self.items.get_mut(index).ok_or_else(|| {
            Error::out_of_range(format!(
                "struct list index {index} out of bounds (len {})",
                self.items.len()
            ))
        })?;
        *slot = item;
        Ok(())
    }

    pub fn iter_range<'a>(
        &'a self,
        from: usize,
        to: usize,
        cancel: &'a dyn CancelToken,
    ) -> impl Iterator<Item = &'a Message> + 'a {
        self.items[from..to.min(self.items.len())]
            .iter()
            .take_while(move |_| !cancel.is_cancelled())
    }

    pub fn item_count(&self) -> u64 {
        self.items.len() as u64
    }

    /// Sum of each member's own total size; zero (and thus unwritten)
    /// when the list is empty, matching every other container.
    pub fn wire_size(&self) -> u64 {
        if self.items.is_empty() {
            return 0;
        }
        8 + self.items.iter().map(Message::wire_size).sum::<u64>()
    }

    pub fn encode_body(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for item in &self.items {
            item.encode_into(&mut out)?;
        }
        Ok(out)
    }

    pub fn decode(
        element_schema: SchemaRef,
        arena: &Arc<SchemaArena>,
        item_count: u64,
        body: &[u8],
    ) -> Result<Self> {
        let mut items = Vec::with_capacity(item_count as usize);
        let mut cursor = 0usize;
        for _ in 0..item_count {
            let (item, consumed) = Message::decode_one(element_schema, arena.clone(), &body[cursor..])?;
            items.push(item);
            cursor += consumed;
        }
        if cursor != body.len() {
            return Err(Error::malformed(format!(
                "struct list consumed {cursor} bytes but body is {} bytes",
                body.len()
            )));
        }
        Ok(Self {
            items,
            element_schema,
        })
    }

    pub fn element_schema(&self) -> SchemaRef {
        self.element_schema
    }

    /// Raw access to the backing items, for the struct runtime to walk
    /// when (re)attaching each element's size node to a new parent
    /// (e.g. right after lazy materialisation from a raw buffer).
    pub(crate) fn items_mut(&mut self) -> &mut [Message] {
        &mut self.items
    }
}
