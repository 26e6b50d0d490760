// Reuse pool (spec.md §3 "Ownership and lifecycle", §9 "Pool reuse"):
// a small free-list that hands out zero-state `Message`s and takes
// them back reset, so a caller decoding many short-lived messages in
// a loop doesn't pay an allocation per message. Grounded in the same
// builder-chain ownership discipline the `*Writer` types elsewhere in
// this codebase follow: own the thing for exactly as long as you hold
// it, hand it back when you're done.

use std::sync::{Arc, Mutex};

use crate::message::Message;
use crate::schema::{SchemaArena, SchemaRef};

/// A free-list of reusable `Message`s for one schema. Not generic over
/// arbitrary `T`: every pooled value here is a struct runtime instance
/// tied to a fixed `(schema, arena)` pair, since reusing a slot across
/// different schemas would defeat the point (the field table shape
/// would have to be rebuilt anyway).
pub struct Pool {
    schema: SchemaRef,
    arena: Arc<SchemaArena>,
    free: Mutex<Vec<Message>>,
}

impl Pool {
    pub fn new(schema: SchemaRef, arena: Arc<SchemaArena>) -> Self {
        Pool {
            schema,
            arena,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Hands out a zero-state message: either a fresh allocation or a
    /// previously released one that was reset on the way back in.
    pub fn acquire(&self) -> Message {
        let mut free = self.free.lock().expect("pool lock poisoned");
        free.pop()
            .unwrap_or_else(|| Message::new(self.schema, self.arena.clone()))
    }

    /// Resets `message` to the zero state and returns it to the
    /// free-list. A message from a different schema is dropped instead
    /// of pooled, rather than silently corrupting the free-list.
    pub fn release(&self, mut message: Message) {
        if message.schema() != self.schema {
            return;
        }
        message.reset();
        self.free.lock().expect("pool lock poisoned").push(message);
    }

    pub fn len(&self) -> usize {
        self.free.lock().expect("pool lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
