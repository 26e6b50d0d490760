// Claw's wire runtime: a fixed-size, 8-byte-aligned binary struct
// format built for lazy field decoding and zero-allocation scalar
// reads (spec.md §1-2). Every field on the wire is a generic 8-byte
// header (field number, type tag, 40-bit payload) optionally followed
// by a body; struct and struct-list bodies are themselves sequences
// of self-delimiting fields, so a decoder never needs an out-of-band
// offset table to skip past a field it doesn't care about.
//
// Module map, in roughly bottom-up dependency order:
//
//   - [`header`] (C1) the generic 8-byte field header.
//   - [`scalar`] (C2) the eleven scalar wire types.
//   - [`list`] (C3) the four list container kinds (bool, numeric,
//     bytes/string, struct), each self-delimited the way its elements
//     naturally are.
//   - [`schema`] the struct/field descriptor types a code generator
//     hands the runtime, arena-allocated so cyclic schemas are
//     representable.
//   - [`message`] (C4) `Message`, the in-memory struct runtime: a
//     lazily-decoded field table with atomic size propagation.
//   - [`codec`] (C5) top-level `marshal`/`unmarshal` entry points.
//   - [`patch`] (C6) struct diffing, mutation recording, and patch
//     application.
//   - [`pool`] a small reuse pool for decoding many short-lived
//     messages without an allocation per message.
//   - [`cancel`] cooperative cancellation for list iteration.
//   - [`ioutil`] the `Reader`/`Writer` abstraction and alignment
//     helpers the rest of the crate is built on.
#![allow(dead_code)]

pub mod cancel;
pub mod codec;
pub mod header;
pub(crate) mod ioutil;
pub mod list;
pub mod message;
pub mod patch;
pub mod pool;
pub mod schema;
pub mod scalar;

#[cfg(test)]
mod test;
