// Struct runtime (C4, spec.md §4.4): the in-memory representation of
// a schema-typed message. Owns its field table, an optional raw
// decode buffer with a lazily-consulted offset index, an atomic
// running size kept in lockstep with its own header's payload word,
// and an optional mutation recorder.
//
// Size propagation (spec.md §9) only needs a weak-parent chain where
// nesting is real, i.e. struct-valued and struct-list fields: a child
// `Message` carries its own `SizeNode`, linked to its owner's the
// first time the slot is attached, after which any direct mutation of
// the child (through `get_struct_mut`) walks the chain on its own.
// Scalar and scalar-list fields have no such nesting, so their deltas
// are just diffed against the field's previous wire size and applied
// once, inline, at the call site.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use claw_base::{Error, Result};

use crate::header::{FieldType, Header};
use crate::ioutil::align8;
use crate::list::{BoolList, ByteEntryList, NumericList, StructList, WireNumeric};
use crate::scalar::Scalar;
use crate::schema::{FieldDescriptor, SchemaArena, SchemaRef};

/// Atomic size counter with an optional weak link to a parent's
/// counter. Parents own children; children only ever report deltas
/// upward, never mutate the chain structurally.
pub(crate) struct SizeNode {
    total: AtomicI64,
    parent: RwLock<Option<Weak<SizeNode>>>,
}

impl SizeNode {
    fn new(initial: i64) -> Arc<SizeNode> {
        Arc::new(SizeNode {
            total: AtomicI64::new(initial),
            parent: RwLock::new(None),
        })
    }

    pub(crate) fn get(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    pub(crate) fn set_parent(&self, parent: Option<Weak<SizeNode>>) {
        *self.parent.write().expect("size node parent lock poisoned") = parent;
    }

    pub(crate) fn add_delta(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.total.fetch_add(delta, Ordering::SeqCst);
        let parent = self
            .parent
            .read()
            .expect("size node parent lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(parent) = parent {
            parent.add_delta(delta);
        }
    }
}

/// The op kinds a recorder can emit, matching the patch format's
/// closed op-type tag (spec.md §4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Set,
    Delete,
    ListAppend,
    ListSet,
}

/// One recorded mutation: field number, op kind, an optional list
/// index, and the opaque payload bytes (the field's encoded
/// representation minus its own header).
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedOp {
    pub field_number: u16,
    pub op: OpKind,
    pub index: Option<u32>,
    pub payload: Vec<u8>,
}

/// A single field slot's state. Distinct from a plain `Option` because
/// an explicit delete must be distinguishable from "never touched,
/// fall back to whatever the raw buffer says".
#[derive(Clone, Debug, PartialEq, Default)]
enum SlotState {
    #[default]
    Empty,
    Deleted,
    Present(FieldValue),
}

/// A materialised field value, tagged by wire shape rather than by
/// schema type directly (bytes and string share `Scalar`; the ten
/// numeric list widths share the generic `NumericList<T>` but need one
/// enum case each since Rust has no type-indexed variant).
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Scalar(Scalar),
    ListBool(BoolList),
    ListI8(NumericList<i8>),
    ListI16(NumericList<i16>),
    ListI32(NumericList<i32>),
    ListI64(NumericList<i64>),
    ListU8(NumericList<u8>),
    ListU16(NumericList<u16>),
    ListU32(NumericList<u32>),
    ListU64(NumericList<u64>),
    ListF32(NumericList<f32>),
    ListF64(NumericList<f64>),
    ListBytes(ByteEntryList),
    Struct(Message),
    ListStruct(StructList),
}

impl FieldValue {
    fn wire_size(&self) -> u64 {
        match self {
            FieldValue::Scalar(s) => s.wire_size(),
            FieldValue::ListBool(l) => l.wire_size(),
            FieldValue::ListI8(l) => l.wire_size(),
            FieldValue::ListI16(l) => l.wire_size(),
            FieldValue::ListI32(l) => l.wire_size(),
            FieldValue::ListI64(l) => l.wire_size(),
            FieldValue::ListU8(l) => l.wire_size(),
            FieldValue::ListU16(l) => l.wire_size(),
            FieldValue::ListU32(l) => l.wire_size(),
            FieldValue::ListU64(l) => l.wire_size(),
            FieldValue::ListF32(l) => l.wire_size(),
            FieldValue::ListF64(l) => l.wire_size(),
            FieldValue::ListBytes(l) => l.wire_size(),
            FieldValue::Struct(m) => m.wire_size(),
            FieldValue::ListStruct(l) => l.wire_size(),
        }
    }

    /// Writes this field's complete wire representation, including its
    /// own 8-byte header, to `out`. A field whose wire size is 0 (an
    /// empty list) is never called from the encode walk in the first
    /// place — "empty lists must not be written" is enforced by the
    /// caller checking `wire_size() == 0` before invoking this.
    fn encode_field(&self, field_number: u16, out: &mut Vec<u8>) -> Result<()> {
        match self {
            FieldValue::Scalar(s) => encode_scalar_field(field_number, s, out),
            FieldValue::ListBool(l) => {
                write_header(out, field_number, FieldType::ListBool, l.item_count())?;
                out.extend_from_slice(&l.encode_body());
                Ok(())
            }
            FieldValue::ListI8(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListI16(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListI32(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListI64(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListU8(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListU16(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListU32(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListU64(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListF32(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListF64(l) => encode_numeric_field(field_number, l, out),
            FieldValue::ListBytes(l) => {
                write_header(out, field_number, l.element_type(), l.item_count())?;
                out.extend_from_slice(&l.encode_body());
                Ok(())
            }
            FieldValue::Struct(m) => m.encode_into(out),
            FieldValue::ListStruct(l) => {
                write_header(out, field_number, FieldType::ListStruct, l.item_count())?;
                out.extend_from_slice(&l.encode_body()?);
                Ok(())
            }
        }
    }

    /// Encodes this field's complete wire representation (its own
    /// 8-byte header plus body) for use as a recorded-op or patch-op
    /// payload. Patch ops "carry the same field-header encoding as
    /// normal messages" (spec.md §6): for narrow scalars the value
    /// lives entirely in the header's 40-bit payload, so a patch
    /// payload that dropped the header would lose the value outright.
    /// Keeping the header makes every op self-decoding from its
    /// payload alone, independent of the field's wire shape.
    pub(crate) fn encode_whole_field(&self, field_number: u16) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode_field(field_number, &mut buf)?;
        Ok(buf)
    }

    pub(crate) fn decode(
        desc: &FieldDescriptor,
        arena: Arc<SchemaArena>,
        header: Header,
        rest: &[u8],
    ) -> Result<FieldValue> {
        let ty = header.field_type();
        let payload = header.payload();
        Ok(match ty {
            FieldType::Bool
            | FieldType::I8
            | FieldType::I16
            | FieldType::I32
            | FieldType::U8
            | FieldType::U16
            | FieldType::U32
            | FieldType::F32 => FieldValue::Scalar(Scalar::from_narrow_payload(ty, payload)?),
            FieldType::I64 | FieldType::U64 | FieldType::F64 => {
                let word: [u8; 8] = rest.get(..8).ok_or_else(|| Error::malformed("truncated wide scalar word"))?.try_into().expect("8 bytes");
                FieldValue::Scalar(Scalar::from_wide_word(ty, word)?)
            }
            FieldType::Bytes | FieldType::String => {
                let data = rest.get(..payload as usize).ok_or_else(|| Error::malformed("truncated inline bytes/string data"))?;
                FieldValue::Scalar(Scalar::from_inline_data(ty, data)?)
            }
            FieldType::Struct => {
                let nested = desc.nested.ok_or_else(|| Error::malformed("struct field missing nested schema"))?;
                let (mut child, _) = Message::decode_one(nested, arena, &rest_with_header(header, rest))?;
                child.field_number = header.field_number();
                FieldValue::Struct(child)
            }
            FieldType::ListBool => FieldValue::ListBool(BoolList::decode(payload, rest)?),
            FieldType::ListI8 => FieldValue::ListI8(NumericList::decode(payload, rest)?),
            FieldType::ListI16 => FieldValue::ListI16(NumericList::decode(payload, rest)?),
            FieldType::ListI32 => FieldValue::ListI32(NumericList::decode(payload, rest)?),
            FieldType::ListI64 => FieldValue::ListI64(NumericList::decode(payload, rest)?),
            FieldType::ListU8 => FieldValue::ListU8(NumericList::decode(payload, rest)?),
            FieldType::ListU16 => FieldValue::ListU16(NumericList::decode(payload, rest)?),
            FieldType::ListU32 => FieldValue::ListU32(NumericList::decode(payload, rest)?),
            FieldType::ListU64 => FieldValue::ListU64(NumericList::decode(payload, rest)?),
            FieldType::ListF32 => FieldValue::ListF32(NumericList::decode(payload, rest)?),
            FieldType::ListF64 => FieldValue::ListF64(NumericList::decode(payload, rest)?),
            FieldType::ListBytes | FieldType::ListString => {
                FieldValue::ListBytes(ByteEntryList::decode(ty, payload, rest)?)
            }
            FieldType::ListStruct => {
                let nested = desc.nested.ok_or_else(|| Error::malformed("struct list missing nested schema"))?;
                FieldValue::ListStruct(StructList::decode(nested, &arena, payload, rest)?)
            }
            FieldType::Unknown => return Err(Error::malformed("unknown field type tag in wire data")),
        })
    }
}

/// Reassembles `[header bytes][rest]` for the one call site
/// (struct-valued field decode) that needs to hand `Message::decode_one`
/// a slice starting at the field's own header again.
fn rest_with_header(header: Header, rest: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + rest.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(rest);
    buf
}

fn write_header(out: &mut Vec<u8>, field_number: u16, ty: FieldType, payload: u64) -> Result<()> {
    let header = Header::new(field_number, ty, payload)?;
    out.extend_from_slice(&header.to_bytes());
    Ok(())
}

fn encode_scalar_field(field_number: u16, s: &Scalar, out: &mut Vec<u8>) -> Result<()> {
    write_header(out, field_number, s.field_type(), s.header_payload())?;
    if let Some(word) = s.wide_word() {
        out.extend_from_slice(&word);
    } else if let Scalar::Bytes(_) | Scalar::Str(_) = s {
        let data: &[u8] = match s {
            Scalar::Bytes(b) => b,
            Scalar::Str(s) => s.as_bytes(),
            _ => unreachable!(),
        };
        out.extend_from_slice(data);
        let pad = align8(data.len() as u64) as usize - data.len();
        out.extend(std::iter::repeat(0u8).take(pad));
    }
    Ok(())
}

fn encode_numeric_field<T: WireNumeric>(field_number: u16, l: &NumericList<T>, out: &mut Vec<u8>) -> Result<()> {
    write_header(out, field_number, T::FIELD_TYPE, l.item_count())?;
    out.extend_from_slice(&l.encode_body());
    Ok(())
}

/// Frames one bytes/string list entry "as if it were the sole item of
/// its list" for a list-append/list-set op payload (spec.md §6): the
/// entry's own 4-byte length prefix plus its data, with no outer list
/// field header, matching the per-entry framing `ByteEntryList` already
/// uses internally.
fn encode_entry_as_sole_item(entry: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + entry.len());
    buf.extend_from_slice(&(entry.len() as u32).to_le_bytes());
    buf.extend_from_slice(entry);
    buf
}

/// Inverse of [`encode_entry_as_sole_item`].
fn decode_entry_from_sole_item(payload: &[u8]) -> Result<Vec<u8>> {
    let len_bytes: [u8; 4] = payload
        .get(..4)
        .ok_or_else(|| Error::malformed("truncated list-append/list-set entry payload"))?
        .try_into()
        .expect("4 bytes");
    let len = u32::from_le_bytes(len_bytes) as usize;
    payload
        .get(4..4 + len)
        .map(|d| d.to_vec())
        .ok_or_else(|| Error::malformed("list-append/list-set entry payload shorter than its declared length"))
}

/// The in-memory representation of a schema-typed message (C4).
#[derive(Debug)]
pub struct Message {
    schema: SchemaRef,
    arena: Arc<SchemaArena>,
    /// This message's slot number in its parent (0 for a root / a
    /// list element, whose field number carries no meaning).
    field_number: u16,
    slots: Vec<SlotState>,
    index: HashMap<u16, usize>,
    raw: Option<Arc<[u8]>>,
    /// `(field_number, absolute offset into raw, size incl. that
    /// field's own header)`, ordered by field number.
    offset_index: Vec<(u16, usize, usize)>,
    excess: Option<Vec<u8>>,
    pub(crate) size: Arc<SizeNode>,
    decoding: bool,
    modified: bool,
    recorder: Option<Vec<RecordedOp>>,
}

impl Clone for Message {
    fn clone(&self) -> Self {
        // A clone is a fresh, unattached struct: its own size node, no
        // parent link, independent of whatever the original was
        // attached to. Recording state does not carry over either,
        // matching the "recorder is an explicit, caller-toggled field"
        // design (spec.md §9) rather than implicit inherited state.
        Message {
            schema: self.schema,
            arena: self.arena.clone(),
            field_number: self.field_number,
            slots: self.slots.clone(),
            index: self.index.clone(),
            raw: self.raw.clone(),
            offset_index: self.offset_index.clone(),
            excess: self.excess.clone(),
            size: SizeNode::new(self.size.get()),
            decoding: false,
            modified: self.modified,
            recorder: None,
        }
    }
}

impl PartialEq for Message {
    /// Structural equality: same schema and the same observable field
    /// values. Ignores recorder/decoding/modified bookkeeping, which
    /// the round-trip property (spec.md §8.1) does not care about.
    fn eq(&self, other: &Self) -> bool {
        if self.schema != other.schema || self.slots.len() != other.slots.len() {
            return false;
        }
        let schema = self.arena.get(self.schema);
        for desc in &schema.fields {
            if self.field_present(desc.field_number) != other.field_present(desc.field_number) {
                return false;
            }
        }
        self.snapshot_values() == other.snapshot_values()
    }
}

impl Message {
    pub fn new(schema: SchemaRef, arena: Arc<SchemaArena>) -> Self {
        let field_count = arena.get(schema).fields.len();
        let mut index = HashMap::with_capacity(field_count);
        for (i, f) in arena.get(schema).fields.iter().enumerate() {
            index.insert(f.field_number, i);
        }
        Message {
            schema,
            arena,
            field_number: 0,
            slots: vec![SlotState::Empty; field_count],
            index,
            raw: None,
            offset_index: Vec::new(),
            excess: None,
            size: SizeNode::new(8),
            decoding: false,
            modified: false,
            recorder: None,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema
    }

    pub fn wire_size(&self) -> u64 {
        self.size.get() as u64
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    fn field_descriptor(&self, field_number: u16) -> Result<&FieldDescriptor> {
        self.arena
            .get(self.schema)
            .field_by_number(field_number)
            .ok_or_else(|| Error::unknown_field(field_number, "no such field in schema"))
    }

    fn index_of(&self, field_number: u16) -> Result<usize> {
        self.index
            .get(&field_number)
            .copied()
            .ok_or_else(|| Error::unknown_field(field_number, "no such field in schema"))
    }

    pub fn field_present(&self, field_number: u16) -> bool {
        match self.index.get(&field_number) {
            Some(&idx) => match &self.slots[idx] {
                SlotState::Present(_) => true,
                SlotState::Deleted => false,
                SlotState::Empty => self.offset_index.iter().any(|e| e.0 == field_number),
            },
            None => false,
        }
    }

    /// A present field's size as it will actually appear on the wire,
    /// which for a scalar may be less than [`FieldValue::wire_size`]:
    /// when the schema's `no_zero_compression` flag is clear (the
    /// default) a zero-valued scalar is omitted entirely, so its
    /// effective size is 0 rather than its header's 8 (or 16) bytes.
    /// List and struct fields are never affected — only `Scalar`
    /// carries this omission rule.
    fn effective_wire_size(&self, value: &FieldValue) -> u64 {
        if let FieldValue::Scalar(s) = value {
            if !self.arena.get(self.schema).config.no_zero_compression && s.is_zero() {
                return 0;
            }
        }
        value.wire_size()
    }

    fn existing_wire_size(&self, idx: usize, field_number: u16) -> u64 {
        match &self.slots[idx] {
            SlotState::Present(v) => self.effective_wire_size(v),
            SlotState::Deleted => 0,
            SlotState::Empty => self
                .offset_index
                .iter()
                .find(|e| e.0 == field_number)
                .map(|e| e.2 as u64)
                .unwrap_or(0),
        }
    }

    fn materialize(&mut self, field_number: u16) -> Result<()> {
        let idx = self.index_of(field_number)?;
        if !matches!(self.slots[idx], SlotState::Empty) {
            return Ok(());
        }
        let Some(&(_, off, size)) = self.offset_index.iter().find(|e| e.0 == field_number) else {
            return Ok(());
        };
        let desc = self.field_descriptor(field_number)?.clone();
        let raw = self.raw.clone().expect("offset index implies a raw buffer");
        let slice = &raw[off..off + size];
        let header = Header::from_bytes(slice[..8].try_into().expect("8 bytes"));
        let mut value = FieldValue::decode(&desc, self.arena.clone(), header, &slice[8..])?;
        match &mut value {
            FieldValue::Struct(child) => {
                child.field_number = field_number;
                child.size.set_parent(Some(Arc::downgrade(&self.size)));
            }
            FieldValue::ListStruct(list) => {
                for item in list.items_mut() {
                    item.size.set_parent(Some(Arc::downgrade(&self.size)));
                }
            }
            _ => {}
        }
        self.slots[idx] = SlotState::Present(value);
        Ok(())
    }

    fn record(&mut self, field_number: u16, op: OpKind, index: Option<u32>, payload: Vec<u8>) {
        if let Some(rec) = &mut self.recorder {
            rec.push(RecordedOp {
                field_number,
                op,
                index,
                payload,
            });
        }
    }

    /// Applies a signed byte-count delta to this struct's running
    /// total, unless currently mid-decode (setters must not propagate
    /// deltas while the decoder is still populating the offset index).
    fn apply_delta(&mut self, delta: i64) {
        self.modified = true;
        if !self.decoding {
            self.size.add_delta(delta);
        }
    }

    // ---- scalar fields ----

    pub fn set_scalar(&mut self, field_number: u16, value: Scalar) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        value.check_type(field_number, desc.ty)?;
        value.check_length_cap()?;
        let idx = self.index_of(field_number)?;
        let old = self.existing_wire_size(idx, field_number) as i64;
        self.slots[idx] = SlotState::Present(FieldValue::Scalar(value));
        let new = self.existing_wire_size(idx, field_number) as i64;
        self.apply_delta(new - old);
        let payload = self.slots[idx].encode_payload_or_empty(field_number)?;
        self.record(field_number, OpKind::Set, None, payload);
        Ok(())
    }

    fn scalar_value(&mut self, field_number: u16, expected: FieldType) -> Result<Scalar> {
        let desc = self.field_descriptor(field_number)?;
        if desc.ty != expected {
            return Err(Error::type_mismatch(field_number, expected.name(), desc.ty.name()));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::Scalar(s)) => Ok(s.clone()),
            _ => Scalar::zero_for(expected),
        }
    }

    pub fn set_bool(&mut self, field_number: u16, value: bool) -> Result<()> {
        self.set_scalar(field_number, Scalar::Bool(value))
    }

    pub fn get_bool(&mut self, field_number: u16) -> Result<bool> {
        match self.scalar_value(field_number, FieldType::Bool)? {
            Scalar::Bool(b) => Ok(b),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_i8(&mut self, field_number: u16, value: i8) -> Result<()> {
        self.set_scalar(field_number, Scalar::I8(value))
    }

    pub fn get_i8(&mut self, field_number: u16) -> Result<i8> {
        match self.scalar_value(field_number, FieldType::I8)? {
            Scalar::I8(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_i16(&mut self, field_number: u16, value: i16) -> Result<()> {
        self.set_scalar(field_number, Scalar::I16(value))
    }

    pub fn get_i16(&mut self, field_number: u16) -> Result<i16> {
        match self.scalar_value(field_number, FieldType::I16)? {
            Scalar::I16(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_i32(&mut self, field_number: u16, value: i32) -> Result<()> {
        self.set_scalar(field_number, Scalar::I32(value))
    }

    pub fn get_i32(&mut self, field_number: u16) -> Result<i32> {
        match self.scalar_value(field_number, FieldType::I32)? {
            Scalar::I32(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_i64(&mut self, field_number: u16, value: i64) -> Result<()> {
        self.set_scalar(field_number, Scalar::I64(value))
    }

    pub fn get_i64(&mut self, field_number: u16) -> Result<i64> {
        match self.scalar_value(field_number, FieldType::I64)? {
            Scalar::I64(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_u8(&mut self, field_number: u16, value: u8) -> Result<()> {
        self.set_scalar(field_number, Scalar::U8(value))
    }

    pub fn get_u8(&mut self, field_number: u16) -> Result<u8> {
        match self.scalar_value(field_number, FieldType::U8)? {
            Scalar::U8(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_u16(&mut self, field_number: u16, value: u16) -> Result<()> {
        self.set_scalar(field_number, Scalar::U16(value))
    }

    pub fn get_u16(&mut self, field_number: u16) -> Result<u16> {
        match self.scalar_value(field_number, FieldType::U16)? {
            Scalar::U16(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_u32(&mut self, field_number: u16, value: u32) -> Result<()> {
        self.set_scalar(field_number, Scalar::U32(value))
    }

    pub fn get_u32(&mut self, field_number: u16) -> Result<u32> {
        match self.scalar_value(field_number, FieldType::U32)? {
            Scalar::U32(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_u64(&mut self, field_number: u16, value: u64) -> Result<()> {
        self.set_scalar(field_number, Scalar::U64(value))
    }

    pub fn get_u64(&mut self, field_number: u16) -> Result<u64> {
        match self.scalar_value(field_number, FieldType::U64)? {
            Scalar::U64(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_f32(&mut self, field_number: u16, value: f32) -> Result<()> {
        self.set_scalar(field_number, Scalar::F32(value))
    }

    pub fn get_f32(&mut self, field_number: u16) -> Result<f32> {
        match self.scalar_value(field_number, FieldType::F32)? {
            Scalar::F32(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_f64(&mut self, field_number: u16, value: f64) -> Result<()> {
        self.set_scalar(field_number, Scalar::F64(value))
    }

    pub fn get_f64(&mut self, field_number: u16) -> Result<f64> {
        match self.scalar_value(field_number, FieldType::F64)? {
            Scalar::F64(v) => Ok(v),
            _ => unreachable!("scalar_value already type-checked"),
        }
    }

    pub fn set_str(&mut self, field_number: u16, value: String) -> Result<()> {
        self.set_scalar(field_number, Scalar::Str(value))
    }

    pub fn set_bytes(&mut self, field_number: u16, value: Vec<u8>) -> Result<()> {
        self.set_scalar(field_number, Scalar::Bytes(value))
    }

    pub fn delete_field(&mut self, field_number: u16) -> Result<()> {
        let idx = self.index_of(field_number)?;
        let old = self.existing_wire_size(idx, field_number) as i64;
        self.slots[idx] = SlotState::Deleted;
        self.apply_delta(-old);
        self.record(field_number, OpKind::Delete, None, Vec::new());
        Ok(())
    }

    pub fn get_bytes(&mut self, field_number: u16) -> Result<&[u8]> {
        let desc = self.field_descriptor(field_number)?;
        if desc.ty != FieldType::Bytes {
            return Err(Error::type_mismatch(field_number, "bytes", desc.ty.name()));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::Scalar(Scalar::Bytes(b))) => Ok(b.as_slice()),
            _ => Ok(&[]),
        }
    }

    pub fn get_str(&mut self, field_number: u16) -> Result<&str> {
        let desc = self.field_descriptor(field_number)?;
        if desc.ty != FieldType::String {
            return Err(Error::type_mismatch(field_number, "string", desc.ty.name()));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::Scalar(Scalar::Str(s))) => Ok(s.as_str()),
            _ => Ok(""),
        }
    }

    // ---- struct-valued fields ----

    pub fn get_struct_mut(&mut self, field_number: u16) -> Result<&mut Message> {
        let desc = self.field_descriptor(field_number)?.clone();
        if desc.ty != FieldType::Struct {
            return Err(Error::type_mismatch(field_number, "struct", desc.ty.name()));
        }
        let nested = desc
            .nested
            .ok_or_else(|| Error::malformed("struct field missing nested schema"))?;
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        if matches!(self.slots[idx], SlotState::Empty) {
            let mut child = Message::new(nested, self.arena.clone());
            child.field_number = field_number;
            child.size.set_parent(Some(Arc::downgrade(&self.size)));
            let child_total = child.size.get();
            self.slots[idx] = SlotState::Present(FieldValue::Struct(child));
            self.apply_delta(child_total);
        }
        // The caller gets a `&mut` into the child regardless of whether it
        // was just materialized from raw bytes or freshly created, so this
        // struct must be treated as touched even if the caller ends up not
        // mutating anything through it — otherwise a decoded-then-mutated
        // child's passthrough-disabling change would never flip this
        // struct's own `modified` flag, and `encode_into` would stream the
        // stale raw buffer instead of re-encoding from the mutated child.
        self.modified = true;
        match &mut self.slots[idx] {
            SlotState::Present(FieldValue::Struct(m)) => Ok(m),
            _ => unreachable!("just ensured Present(Struct)"),
        }
    }

    pub fn set_struct(&mut self, field_number: u16, mut child: Message) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        if desc.ty != FieldType::Struct {
            return Err(Error::type_mismatch(field_number, "struct", desc.ty.name()));
        }
        if desc.nested != Some(child.schema) {
            return Err(Error::type_mismatch(field_number, "matching nested schema", "different schema"));
        }
        let idx = self.index_of(field_number)?;
        let old = self.existing_wire_size(idx, field_number) as i64;
        child.field_number = field_number;
        child.size.set_parent(Some(Arc::downgrade(&self.size)));
        let new = child.size.get();
        self.slots[idx] = SlotState::Present(FieldValue::Struct(child));
        self.apply_delta(new - old);
        let payload = self.slots[idx].encode_payload_or_empty(field_number)?;
        self.record(field_number, OpKind::Set, None, payload);
        Ok(())
    }

    // ---- list-of-bool fields ----

    fn ensure_list_slot(&mut self, field_number: u16, expected: FieldType, make_empty: impl FnOnce() -> FieldValue) -> Result<usize> {
        let desc = self.field_descriptor(field_number)?;
        if desc.ty != expected {
            return Err(Error::type_mismatch(field_number, expected.name(), desc.ty.name()));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        if matches!(self.slots[idx], SlotState::Empty) {
            self.slots[idx] = SlotState::Present(make_empty());
        }
        Ok(idx)
    }

    pub fn bool_list_append(&mut self, field_number: u16, value: bool) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, FieldType::ListBool, || FieldValue::ListBool(BoolList::new()))?;
        let old = self.slots[idx].wire_size_or_zero() as i64;
        let appended_index = match &mut self.slots[idx] {
            SlotState::Present(FieldValue::ListBool(l)) => {
                l.append(value);
                l.len() as u32 - 1
            }
            _ => unreachable!(),
        };
        let new = self.slots[idx].wire_size_or_zero() as i64;
        self.apply_delta(new - old);
        self.record(field_number, OpKind::ListAppend, Some(appended_index), vec![value as u8]);
        Ok(())
    }

    pub fn bool_list_set(&mut self, field_number: u16, index: usize, value: bool) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, FieldType::ListBool, || FieldValue::ListBool(BoolList::new()))?;
        match &mut self.slots[idx] {
            SlotState::Present(FieldValue::ListBool(l)) => l.set(index, value)?,
            _ => unreachable!(),
        }
        self.modified = true;
        self.record(field_number, OpKind::ListSet, Some(index as u32), vec![value as u8]);
        Ok(())
    }

    pub fn bool_list_len(&mut self, field_number: u16) -> Result<usize> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        Ok(match &self.slots[idx] {
            SlotState::Present(FieldValue::ListBool(l)) => l.len(),
            _ => 0,
        })
    }

    pub fn bool_list_get(&mut self, field_number: u16, index: usize) -> Result<bool> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::ListBool(l)) => l.get(index),
            _ => Err(Error::out_of_range(format!("bool list field {field_number} has no element {index}"))),
        }
    }

    // ---- numeric list fields ----

    pub fn numeric_list_append<T: WireNumeric>(&mut self, field_number: u16, value: T) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, T::FIELD_TYPE, || T::wrap_list(NumericList::new()))?;
        let old = self.slots[idx].wire_size_or_zero() as i64;
        let appended_index = {
            let SlotState::Present(fv) = &mut self.slots[idx] else { unreachable!() };
            let list = T::unwrap_list_mut(fv).expect("slot matches T::FIELD_TYPE");
            list.append(value);
            list.len() as u32 - 1
        };
        let new = self.slots[idx].wire_size_or_zero() as i64;
        self.apply_delta(new - old);
        self.record(field_number, OpKind::ListAppend, Some(appended_index), value.to_wire_bytes());
        Ok(())
    }

    pub fn numeric_list_set<T: WireNumeric>(&mut self, field_number: u16, index: usize, value: T) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, T::FIELD_TYPE, || T::wrap_list(NumericList::new()))?;
        {
            let SlotState::Present(fv) = &mut self.slots[idx] else { unreachable!() };
            let list = T::unwrap_list_mut(fv).expect("slot matches T::FIELD_TYPE");
            list.set(index, value)?;
        }
        self.modified = true;
        self.record(field_number, OpKind::ListSet, Some(index as u32), value.to_wire_bytes());
        Ok(())
    }

    pub fn numeric_list_len<T: WireNumeric>(&mut self, field_number: u16) -> Result<usize> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        Ok(match &self.slots[idx] {
            SlotState::Present(fv) => T::unwrap_list(fv).map(NumericList::len).unwrap_or(0),
            _ => 0,
        })
    }

    pub fn numeric_list_get<T: WireNumeric>(&mut self, field_number: u16, index: usize) -> Result<T> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(fv) => T::unwrap_list(fv)
                .ok_or_else(|| Error::type_mismatch(field_number, T::FIELD_TYPE.name(), "different list type"))?
                .get(index),
            _ => Err(Error::out_of_range(format!("numeric list field {field_number} has no element {index}"))),
        }
    }

    // ---- bytes/string list fields ----

    pub fn byte_list_append(&mut self, field_number: u16, element_type: FieldType, entry: Vec<u8>) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, element_type, || FieldValue::ListBytes(ByteEntryList::new(element_type)))?;
        let old = self.slots[idx].wire_size_or_zero() as i64;
        let appended_index = {
            let SlotState::Present(FieldValue::ListBytes(l)) = &mut self.slots[idx] else { unreachable!() };
            l.append(entry.clone())?;
            l.len() as u32 - 1
        };
        let new = self.slots[idx].wire_size_or_zero() as i64;
        self.apply_delta(new - old);
        self.record(field_number, OpKind::ListAppend, Some(appended_index), encode_entry_as_sole_item(&entry));
        Ok(())
    }

    pub fn byte_list_set(&mut self, field_number: u16, element_type: FieldType, index: usize, entry: Vec<u8>) -> Result<()> {
        let idx = self.ensure_list_slot(field_number, element_type, || FieldValue::ListBytes(ByteEntryList::new(element_type)))?;
        match &mut self.slots[idx] {
            SlotState::Present(FieldValue::ListBytes(l)) => l.set(index, entry.clone())?,
            _ => unreachable!(),
        }
        self.modified = true;
        self.record(field_number, OpKind::ListSet, Some(index as u32), encode_entry_as_sole_item(&entry));
        Ok(())
    }

    pub fn byte_list_len(&mut self, field_number: u16) -> Result<usize> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        Ok(match &self.slots[idx] {
            SlotState::Present(FieldValue::ListBytes(l)) => l.len(),
            _ => 0,
        })
    }

    pub fn byte_list_get(&mut self, field_number: u16, index: usize) -> Result<&[u8]> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::ListBytes(l)) => l.get(index),
            _ => Err(Error::out_of_range(format!("byte list field {field_number} has no element {index}"))),
        }
    }

    // ---- struct-list fields ----

    pub fn struct_list_append(&mut self, field_number: u16, mut item: Message) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        if desc.ty != FieldType::ListStruct {
            return Err(Error::type_mismatch(field_number, "list<struct>", desc.ty.name()));
        }
        let elem_schema = desc
            .nested
            .ok_or_else(|| Error::malformed("struct list missing nested schema"))?;
        if item.schema != elem_schema {
            return Err(Error::type_mismatch(field_number, "matching struct-list element schema", "different schema"));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        if matches!(self.slots[idx], SlotState::Empty) {
            self.slots[idx] = SlotState::Present(FieldValue::ListStruct(StructList::new(elem_schema)));
        }
        item.field_number = 0;
        item.size.set_parent(Some(Arc::downgrade(&self.size)));
        let item_total = item.size.get();

        let (was_empty, appended_index, payload) = {
            let SlotState::Present(FieldValue::ListStruct(list)) = &mut self.slots[idx] else { unreachable!() };
            let was_empty = list.is_empty();
            list.append(item)?;
            let appended_index = list.len() as u32 - 1;
            // A struct-list element is already self-delimiting via its
            // own header, so "encoded as if the sole item of its list"
            // is just that element's normal encoding, kept whole.
            let mut buf = Vec::new();
            list.get(appended_index as usize)?.encode_into(&mut buf)?;
            (was_empty, appended_index, buf)
        };
        let header_delta = if was_empty { 8 } else { 0 };
        self.apply_delta(item_total + header_delta);
        self.record(field_number, OpKind::ListAppend, Some(appended_index), payload);
        Ok(())
    }

    /// Replaces the struct-list element at `index` in place, re-linking
    /// its size node to this struct so propagation still reaches every
    /// ancestor (spec.md §4.4's size-propagation invariant applies to a
    /// replaced element exactly as it does to an appended one).
    pub fn struct_list_set(&mut self, field_number: u16, index: usize, mut item: Message) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        if desc.ty != FieldType::ListStruct {
            return Err(Error::type_mismatch(field_number, "list<struct>", desc.ty.name()));
        }
        let elem_schema = desc
            .nested
            .ok_or_else(|| Error::malformed("struct list missing nested schema"))?;
        if item.schema != elem_schema {
            return Err(Error::type_mismatch(field_number, "matching struct-list element schema", "different schema"));
        }
        let idx = self.index_of(field_number)?;
        self.materialize(field_number)?;
        item.field_number = 0;
        item.size.set_parent(Some(Arc::downgrade(&self.size)));
        let new_total = item.size.get();

        let (old_total, payload) = {
            let SlotState::Present(FieldValue::ListStruct(list)) = &mut self.slots[idx] else {
                return Err(Error::out_of_range(format!("struct list field {field_number} has no element {index}")));
            };
            let old_total = list.get(index)?.wire_size() as i64;
            list.set(index, item)?;
            let mut buf = Vec::new();
            list.get(index)?.encode_into(&mut buf)?;
            (old_total, buf)
        };
        self.apply_delta(new_total as i64 - old_total);
        self.record(field_number, OpKind::ListSet, Some(index as u32), payload);
        Ok(())
    }

    pub fn struct_list_get(&mut self, field_number: u16, index: usize) -> Result<&Message> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        match &self.slots[idx] {
            SlotState::Present(FieldValue::ListStruct(l)) => l.get(index),
            _ => Err(Error::out_of_range(format!("struct list field {field_number} has no element {index}"))),
        }
    }

    pub fn struct_list_get_mut(&mut self, field_number: u16, index: usize) -> Result<&mut Message> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        self.modified = true;
        match &mut self.slots[idx] {
            SlotState::Present(FieldValue::ListStruct(l)) => l.get_mut(index),
            _ => Err(Error::out_of_range(format!("struct list field {field_number} has no element {index}"))),
        }
    }

    pub fn struct_list_len(&mut self, field_number: u16) -> Result<usize> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        Ok(match &self.slots[idx] {
            SlotState::Present(FieldValue::ListStruct(l)) => l.len(),
            _ => 0,
        })
    }

    // ---- recording ----

    pub fn set_recording(&mut self, on: bool) {
        if on {
            self.recorder.get_or_insert_with(Vec::new);
        } else {
            self.recorder = None;
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn drain_recorded(&mut self) -> Vec<RecordedOp> {
        self.recorder.as_mut().map(std::mem::take).unwrap_or_default()
    }

    // ---- patch support (C6) ----

    /// Materialises `field_number` and returns a clone of its current
    /// value, or `None` if the field is absent (never set, or deleted).
    /// Diffing two messages of the same schema walks this rather than
    /// each field's typed getter, since a diff needs to compare
    /// presence and content uniformly across every field kind.
    pub(crate) fn materialized_value(&mut self, field_number: u16) -> Result<Option<FieldValue>> {
        self.materialize(field_number)?;
        let idx = self.index_of(field_number)?;
        Ok(match &self.slots[idx] {
            SlotState::Present(v) => Some(v.clone()),
            SlotState::Empty | SlotState::Deleted => None,
        })
    }

    /// Applies one patch op's effect directly, independent of the
    /// recorder (a patch replays someone else's recorded mutations, it
    /// doesn't make new ones of its own to record). `payload` is framed
    /// exactly as [`FieldValue::encode_whole_field`] and
    /// `encode_entry_as_sole_item`/struct-element-encode produce it, so
    /// this is their decode-side counterpart.
    pub(crate) fn apply_patch_op(&mut self, field_number: u16, op: OpKind, index: Option<u32>, payload: &[u8]) -> Result<()> {
        match op {
            OpKind::Delete => self.delete_field(field_number),
            OpKind::Set => self.apply_patch_set(field_number, payload),
            OpKind::ListAppend | OpKind::ListSet => self.apply_patch_list_op(field_number, op, index, payload),
        }
    }

    fn apply_patch_set(&mut self, field_number: u16, payload: &[u8]) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        let header_bytes: [u8; 8] = payload
            .get(..8)
            .ok_or_else(|| Error::patch_rejected("set op payload shorter than a field header"))?
            .try_into()
            .expect("8 bytes");
        let header = Header::from_bytes(header_bytes);
        if header.field_type() != desc.ty {
            return Err(Error::patch_rejected(format!(
                "set op for field {field_number} carries a {} value against a {} field",
                header.field_type().name(),
                desc.ty.name()
            )));
        }
        let value = FieldValue::decode(&desc, self.arena.clone(), header, &payload[8..])?;
        match value {
            FieldValue::Struct(mut child) => {
                child.field_number = field_number;
                self.set_struct(field_number, child)
            }
            FieldValue::Scalar(s) => self.set_scalar(field_number, s),
            other => self.set_whole_list(field_number, other),
        }
    }

    /// Replaces an entire list-valued field's contents in one step, for
    /// a diff-produced `set` op (spec.md §4.6: "a list field with
    /// differing contents gets a single set op carrying the new list's
    /// payload"). Bypasses the per-element append/set API entirely.
    fn set_whole_list(&mut self, field_number: u16, value: FieldValue) -> Result<()> {
        let idx = self.index_of(field_number)?;
        let old = self.existing_wire_size(idx, field_number) as i64;
        let value = if let FieldValue::ListStruct(mut list) = value {
            for item in list.items_mut() {
                item.size.set_parent(Some(Arc::downgrade(&self.size)));
            }
            FieldValue::ListStruct(list)
        } else {
            value
        };
        self.slots[idx] = SlotState::Present(value);
        let new = self.slots[idx].wire_size_or_zero() as i64;
        self.apply_delta(new - old);
        let payload = self.slots[idx].encode_payload_or_empty(field_number)?;
        self.record(field_number, OpKind::Set, None, payload);
        Ok(())
    }

    fn apply_patch_list_op(&mut self, field_number: u16, op: OpKind, index: Option<u32>, payload: &[u8]) -> Result<()> {
        let desc = self.field_descriptor(field_number)?.clone();
        let is_set = op == OpKind::ListSet;
        let index = index.map(|i| i as usize);
        match desc.ty {
            FieldType::ListBool => {
                let value = *payload.first().ok_or_else(|| Error::patch_rejected("empty bool list-op payload"))? != 0;
                if is_set {
                    self.bool_list_set(field_number, index.ok_or_else(|| Error::patch_rejected("list-set op missing index"))?, value)
                } else {
                    self.bool_list_append(field_number, value)
                }
            }
            FieldType::ListI8 => self.apply_numeric_patch_list_op::<i8>(field_number, is_set, index, payload),
            FieldType::ListI16 => self.apply_numeric_patch_list_op::<i16>(field_number, is_set, index, payload),
            FieldType::ListI32 => self.apply_numeric_patch_list_op::<i32>(field_number, is_set, index, payload),
            FieldType::ListI64 => self.apply_numeric_patch_list_op::<i64>(field_number, is_set, index, payload),
            FieldType::ListU8 => self.apply_numeric_patch_list_op::<u8>(field_number, is_set, index, payload),
            FieldType::ListU16 => self.apply_numeric_patch_list_op::<u16>(field_number, is_set, index, payload),
            FieldType::ListU32 => self.apply_numeric_patch_list_op::<u32>(field_number, is_set, index, payload),
            FieldType::ListU64 => self.apply_numeric_patch_list_op::<u64>(field_number, is_set, index, payload),
            FieldType::ListF32 => self.apply_numeric_patch_list_op::<f32>(field_number, is_set, index, payload),
            FieldType::ListF64 => self.apply_numeric_patch_list_op::<f64>(field_number, is_set, index, payload),
            FieldType::ListBytes | FieldType::ListString => {
                let entry = decode_entry_from_sole_item(payload)?;
                if is_set {
                    self.byte_list_set(field_number, desc.ty, index.ok_or_else(|| Error::patch_rejected("list-set op missing index"))?, entry)
                } else {
                    self.byte_list_append(field_number, desc.ty, entry)
                }
            }
            FieldType::ListStruct => {
                let nested = desc.nested.ok_or_else(|| Error::malformed("struct list missing nested schema"))?;
                let (item, consumed) = Message::decode_one(nested, self.arena.clone(), payload)?;
                if consumed != payload.len() {
                    return Err(Error::patch_rejected("struct list-op payload has trailing bytes"));
                }
                if is_set {
                    self.struct_list_set(field_number, index.ok_or_else(|| Error::patch_rejected("list-set op missing index"))?, item)
                } else {
                    self.struct_list_append(field_number, item)
                }
            }
            other => Err(Error::patch_rejected(format!("field {field_number} of type {} cannot take a list op", other.name()))),
        }
    }

    fn apply_numeric_patch_list_op<T: WireNumeric>(&mut self, field_number: u16, is_set: bool, index: Option<usize>, payload: &[u8]) -> Result<()> {
        if payload.len() < T::WIDTH {
            return Err(Error::patch_rejected("numeric list-op payload shorter than its element width"));
        }
        let value = T::from_wire_bytes(&payload[..T::WIDTH]);
        if is_set {
            self.numeric_list_set(field_number, index.ok_or_else(|| Error::patch_rejected("list-set op missing index"))?, value)
        } else {
            self.numeric_list_append(field_number, value)
        }
    }

    // ---- pooling ----

    /// Resets this struct to the zero state so it can be returned to a
    /// reuse pool: running total back to the bare 8-byte header, field
    /// table cleared, raw buffer and offset index released, modified
    /// flag cleared (spec.md §9 "Pool reuse").
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = SlotState::Empty;
        }
        self.raw = None;
        self.offset_index.clear();
        self.excess = None;
        self.size.set_parent(None);
        self.size.total.store(8, Ordering::SeqCst);
        self.decoding = false;
        self.modified = false;
        self.recorder = None;
        self.field_number = 0;
    }

    // ---- encode / decode ----

    /// Writes this struct's complete wire representation (its own
    /// header plus body) to `out`. Streams the raw buffer verbatim
    /// when untouched since decode (the fast passthrough path);
    /// otherwise walks the field table once.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        if !self.modified {
            if let Some(raw) = &self.raw {
                out.extend_from_slice(raw);
                return Ok(());
            }
        }
        let mut body = Vec::new();
        let schema = self.arena.get(self.schema);
        for desc in &schema.fields {
            let idx = self.index[&desc.field_number];
            match &self.slots[idx] {
                SlotState::Present(value) => {
                    if self.effective_wire_size(value) > 0 || matches!(value, FieldValue::Struct(_)) {
                        value.encode_field(desc.field_number, &mut body)?;
                    }
                }
                SlotState::Deleted => {}
                SlotState::Empty => {
                    if let Some(&(_, off, size)) = self.offset_index.iter().find(|e| e.0 == desc.field_number) {
                        let raw = self.raw.as_ref().expect("offset index implies raw buffer");
                        body.extend_from_slice(&raw[off..off + size]);
                    }
                }
            }
        }
        if let Some(excess) = &self.excess {
            body.extend_from_slice(excess);
        }
        let total = 8 + body.len() as u64;
        if total != self.wire_size() {
            return Err(Error::encode_inconsistency(total, self.wire_size()));
        }
        write_header(out, self.field_number, FieldType::Struct, total)?;
        out.extend_from_slice(&body);
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.wire_size() as usize);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    /// Decodes a single struct starting at `bytes[0]`, returning the
    /// struct and the number of bytes consumed (its own declared total
    /// size). Used both as the top-level unmarshal entry point and
    /// recursively for struct-list elements.
    pub fn decode_one(schema: SchemaRef, arena: Arc<SchemaArena>, bytes: &[u8]) -> Result<(Message, usize)> {
        if bytes.len() < 8 {
            return Err(Error::malformed("buffer shorter than one header"));
        }
        let header = Header::from_bytes(bytes[..8].try_into().expect("8 bytes"));
        if header.field_type() != FieldType::Struct {
            return Err(Error::malformed(format!(
                "expected struct header, got type tag {}",
                header.field_type().name()
            )));
        }
        let total = header.payload();
        if total % 8 != 0 {
            return Err(Error::malformed("struct size is not 8-byte aligned"));
        }
        if (total as usize) > bytes.len() {
            return Err(Error::malformed("struct declares more bytes than the buffer holds"));
        }
        let raw: Arc<[u8]> = Arc::from(&bytes[..total as usize]);
        let body = &raw[8..];

        let schema_def = arena.get(schema);
        let mut offset_index = Vec::new();
        let mut cursor = 0usize;
        let mut last_field_number: Option<u16> = None;
        let mut excess = None;

        while cursor < body.len() {
            if cursor + 8 > body.len() {
                return Err(Error::malformed("truncated field header"));
            }
            let field_header = Header::from_bytes(body[cursor..cursor + 8].try_into().expect("8 bytes"));
            let field_number = field_header.field_number();
            if let Some(last) = last_field_number {
                if field_number <= last {
                    return Err(Error::malformed("field numbers are not strictly ascending"));
                }
            }
            let beyond_schema = schema_def.field_by_number(field_number).is_none()
                && schema_def.max_field_number().is_some_and(|max| field_number > max);
            let unknown_to_schema = schema_def.field_by_number(field_number).is_none();
            if beyond_schema || (unknown_to_schema && schema_def.max_field_number().is_none()) {
                excess = Some(body[cursor..].to_vec());
                break;
            }
            if unknown_to_schema {
                return Err(Error::unknown_field(field_number, "field within schema's number range but not declared"));
            }
            let size = field_total_size(field_header.field_type(), field_header.payload(), &body[cursor + 8..])? as usize;
            if cursor + size > body.len() {
                return Err(Error::malformed("field size exceeds struct body"));
            }
            offset_index.push((field_number, 8 + cursor, size));
            cursor += size;
            last_field_number = Some(field_number);
        }

        let mut index = HashMap::with_capacity(schema_def.fields.len());
        for (i, f) in schema_def.fields.iter().enumerate() {
            index.insert(f.field_number, i);
        }
        let msg = Message {
            schema,
            arena,
            field_number: header.field_number(),
            slots: vec![SlotState::Empty; schema_def.fields.len()],
            index,
            raw: Some(raw),
            offset_index,
            excess,
            size: SizeNode::new(total as i64),
            decoding: false,
            modified: false,
            recorder: None,
        };
        Ok((msg, total as usize))
    }

    pub fn decode(schema: SchemaRef, arena: Arc<SchemaArena>, bytes: &[u8]) -> Result<Message> {
        let (msg, consumed) = Message::decode_one(schema, arena, bytes)?;
        if consumed != bytes.len() {
            return Err(Error::malformed(format!(
                "unmarshal left {} trailing bytes",
                bytes.len() - consumed
            )));
        }
        Ok(msg)
    }

    /// Reconstructs a struct from its *body* bytes alone (no leading
    /// header), synthesising one from `schema`'s own declared size.
    /// Used to apply a patch op's opaque payload, which strips the
    /// struct's own header per the "excluding its header" convention.
    pub fn from_body_bytes(schema: SchemaRef, arena: Arc<SchemaArena>, body: &[u8]) -> Result<Message> {
        let total = 8 + body.len() as u64;
        let header = Header::new(0, FieldType::Struct, total)?;
        let mut framed = Vec::with_capacity(total as usize);
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(body);
        Message::decode(schema, arena, &framed)
    }

    fn snapshot_values(&self) -> Vec<u8> {
        // A cheap structural fingerprint: encode a clone with recording
        // and decode-only state stripped. Used only by `PartialEq`, not
        // on any hot path.
        let mut clone = Message {
            schema: self.schema,
            arena: self.arena.clone(),
            field_number: 0,
            slots: self.slots.clone(),
            index: self.index.clone(),
            raw: self.raw.clone(),
            offset_index: self.offset_index.clone(),
            excess: self.excess.clone(),
            size: SizeNode::new(self.size.get()),
            decoding: false,
            modified: true,
            recorder: None,
        };
        clone.encode().unwrap_or_default()
    }
}

impl SlotState {
    fn wire_size_or_zero(&self) -> u64 {
        match self {
            SlotState::Present(v) => v.wire_size(),
            _ => 0,
        }
    }

    fn encode_payload_or_empty(&self, field_number: u16) -> Result<Vec<u8>> {
        match self {
            SlotState::Present(v) => v.encode_whole_field(field_number),
            _ => Ok(Vec::new()),
        }
    }
}

/// Per-type size function dispatch (spec.md §4.5): given a field's
/// type tag and header payload, and the bytes immediately following
/// its header, returns the field's total size including that header.
/// Bytes/string and struct-list sizes can't be read off the header
/// alone (the payload is a length or an item count, not a byte
/// count), so those two cases peek into `rest`.
fn field_total_size(ty: FieldType, payload: u64, rest: &[u8]) -> Result<u64> {
    use FieldType::*;
    Ok(match ty {
        Bool | I8 | I16 | I32 | U8 | U16 | U32 | F32 => 8,
        I64 | U64 | F64 => 16,
        Bytes | String => 8 + align8(payload),
        Struct => payload,
        ListBool => 8 + 8 * (payload as usize).div_ceil(64) as u64,
        ListI8 | ListU8 => 8 + align8(payload),
        ListI16 | ListU16 => 8 + align8(payload * 2),
        ListI32 | ListU32 | ListF32 => 8 + align8(payload * 4),
        ListI64 | ListU64 | ListF64 => 8 + align8(payload * 8),
        ListBytes | ListString => {
            let mut off = 0usize;
            let mut data_size = 0u64;
            for _ in 0..payload {
                if off + 4 > rest.len() {
                    return Err(Error::malformed("byte list entry length header truncated"));
                }
                let len = u32::from_le_bytes(rest[off..off + 4].try_into().expect("4 bytes")) as u64;
                off += 4 + len as usize;
                data_size += 4 + len;
            }
            8 + align8(data_size)
        }
        ListStruct => {
            let mut off = 0usize;
            let mut total = 0u64;
            for _ in 0..payload {
                if off + 8 > rest.len() {
                    return Err(Error::malformed("struct list item header truncated"));
                }
                let item_header = Header::from_bytes(rest[off..off + 8].try_into().expect("8 bytes"));
                if item_header.field_type() != Struct {
                    return Err(Error::malformed("struct list item is not struct-typed"));
                }
                let item_size = item_header.payload();
                off += item_size as usize;
                total += item_size;
            }
            8 + total
        }
        Unknown => return Err(Error::malformed("unknown field type tag in wire data")),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::{StructSchema, WireConfig};

    fn field(name: &str, number: u16, ty: FieldType) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            field_number: number,
            ty,
            list_element_ty: None,
            nested: None,
            enum_group: None,
            self_ref: false,
        }
    }

    fn s1_schema() -> (Arc<SchemaArena>, SchemaRef) {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![field("f0", 0, FieldType::Bool), field("f1", 1, FieldType::I8)],
            config: WireConfig::default(),
        });
        (Arc::new(arena), r)
    }

    #[test]
    fn test_s1_bool_and_i8_exact_bytes() {
        let (arena, r) = s1_schema();
        let mut m = Message::new(r, arena);
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        m.set_scalar(1, Scalar::I8(-1)).unwrap();
        let bytes = m.encode().unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[0..8], &[0x00, 0x00, 0x0e, 0x18, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..16], &[0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[16..24], &[0x01, 0x00, 0x02, 0xff, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_s2_string_padding() {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Doc".into(),
            package: "test".into(),
            path: "test/doc.claw".into(),
            fields: vec![field("f0", 0, FieldType::String)],
            config: WireConfig::default(),
        });
        let arena = Arc::new(arena);
        let mut m = Message::new(r, arena);
        m.set_scalar(0, Scalar::Str("Hello World".to_string())).unwrap();
        let bytes = m.encode().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[16..27], b"Hello World");
        assert_eq!(&bytes[27..32], &[0u8; 5]);
    }

    #[test]
    fn test_s3_default_omission() {
        // Default config (`no_zero_compression` clear): an explicitly
        // set zero scalar is still omitted from the wire, so the
        // struct encodes as just its own 8-byte header.
        let mut arena_off = SchemaArena::new();
        let r_off = arena_off.insert(StructSchema {
            name: "Counter".into(),
            package: "test".into(),
            path: "test/counter.claw".into(),
            fields: vec![field("f0", 0, FieldType::U16)],
            config: WireConfig::default(),
        });
        let arena_off = Arc::new(arena_off);
        let mut m = Message::new(r_off, arena_off.clone());
        m.set_scalar(0, Scalar::U16(0)).unwrap();
        assert_eq!(m.wire_size(), 8);
        assert_eq!(m.encode().unwrap().len(), 8);

        // A non-zero value is never omitted, flag or no flag.
        let mut m = Message::new(r_off, arena_off);
        m.set_scalar(0, Scalar::U16(1)).unwrap();
        assert_eq!(m.wire_size(), 16);
        assert_eq!(m.encode().unwrap().len(), 16);

        // Same shape with the flag set: the zero is kept so presence
        // stays distinguishable from absence.
        let mut arena_on = SchemaArena::new();
        let r_on = arena_on.insert(StructSchema {
            name: "Counter".into(),
            package: "test".into(),
            path: "test/counter.claw".into(),
            fields: vec![field("f0", 0, FieldType::U16)],
            config: WireConfig {
                no_zero_compression: true,
            },
        });
        let arena_on = Arc::new(arena_on);
        let mut m = Message::new(r_on, arena_on);
        m.set_scalar(0, Scalar::U16(0)).unwrap();
        assert_eq!(m.wire_size(), 16);
        assert_eq!(m.encode().unwrap().len(), 16);
    }

    #[test]
    fn test_round_trip_bool_i8() {
        let (arena, r) = s1_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        m.set_scalar(1, Scalar::I8(-5)).unwrap();
        let bytes = m.encode().unwrap();
        let mut back = Message::decode(r, arena, &bytes).unwrap();
        assert_eq!(back.scalar_value(0, FieldType::Bool).unwrap(), Scalar::Bool(true));
        assert_eq!(back.scalar_value(1, FieldType::I8).unwrap(), Scalar::I8(-5));
        assert_eq!(back.encode().unwrap(), bytes);
    }

    #[test]
    fn test_passthrough_unmutated_decoded_struct() {
        let (arena, r) = s1_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        m.set_scalar(1, Scalar::I8(7)).unwrap();
        let bytes = m.encode().unwrap();
        let decoded = Message::decode(r, arena, &bytes).unwrap();
        assert!(!decoded.is_modified());
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_lazy_getter_does_not_touch_other_fields() {
        let (arena, r) = s1_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        m.set_scalar(1, Scalar::I8(9)).unwrap();
        let bytes = m.encode().unwrap();
        let mut decoded = Message::decode(r, arena, &bytes).unwrap();
        assert_eq!(decoded.scalar_value(1, FieldType::I8).unwrap(), Scalar::I8(9));
        // field 0 still lazy at this point
        assert!(matches!(decoded.slots[decoded.index[&0]], SlotState::Empty));
    }

    #[test]
    fn test_delete_field_resets_size() {
        let (arena, r) = s1_schema();
        let mut m = Message::new(r, arena);
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        assert_eq!(m.wire_size(), 16);
        m.delete_field(0).unwrap();
        assert_eq!(m.wire_size(), 8);
    }

    #[test]
    fn test_numeric_list_field() {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Nums".into(),
            package: "test".into(),
            path: "test/nums.claw".into(),
            fields: vec![{
                let mut f = field("items", 0, FieldType::ListI32);
                f.list_element_ty = Some(FieldType::I32);
                f
            }],
            config: WireConfig::default(),
        });
        let arena = Arc::new(arena);
        let mut m = Message::new(r, arena.clone());
        m.numeric_list_append::<i32>(0, 10).unwrap();
        m.numeric_list_append::<i32>(0, -20).unwrap();
        assert_eq!(m.numeric_list_len::<i32>(0).unwrap(), 2);
        let bytes = m.encode().unwrap();
        let mut back = Message::decode(r, arena, &bytes).unwrap();
        assert_eq!(back.numeric_list_get::<i32>(0, 1).unwrap(), -20);
    }

    #[test]
    fn test_nested_struct_size_propagation() {
        let mut arena = SchemaArena::new();
        let child_ref = arena.insert(StructSchema {
            name: "Inner".into(),
            package: "test".into(),
            path: "test/inner.claw".into(),
            fields: vec![field("v", 0, FieldType::U32)],
            config: WireConfig::default(),
        });
        let mut outer_field = field("inner", 0, FieldType::Struct);
        outer_field.nested = Some(child_ref);
        let outer_ref = arena.insert(StructSchema {
            name: "Outer".into(),
            package: "test".into(),
            path: "test/outer.claw".into(),
            fields: vec![outer_field],
            config: WireConfig::default(),
        });
        let arena = Arc::new(arena);

        let mut outer = Message::new(outer_ref, arena);
        assert_eq!(outer.wire_size(), 8);
        {
            let inner = outer.get_struct_mut(0).unwrap();
            assert_eq!(inner.wire_size(), 8);
            inner.set_scalar(0, Scalar::U32(42)).unwrap();
            assert_eq!(inner.wire_size(), 16);
        }
        // outer's total must reflect the nested mutation automatically.
        assert_eq!(outer.wire_size(), 8 + 16);
    }

    #[test]
    fn test_excess_preservation_s6() {
        // Encode under a 3-field schema, decode under a 2-field schema,
        // re-encode: bytes must match the 3-field encoding exactly.
        let mut arena_v2 = SchemaArena::new();
        let r_v2 = arena_v2.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![
                field("f0", 0, FieldType::Bool),
                field("f1", 1, FieldType::I8),
                field("f2", 2, FieldType::U16),
            ],
            config: WireConfig::default(),
        });
        let arena_v2 = Arc::new(arena_v2);
        let mut full = Message::new(r_v2, arena_v2);
        full.set_scalar(0, Scalar::Bool(true)).unwrap();
        full.set_scalar(1, Scalar::I8(-1)).unwrap();
        full.set_scalar(2, Scalar::U16(99)).unwrap();
        let v2_bytes = full.encode().unwrap();

        let mut arena_v1 = SchemaArena::new();
        let r_v1 = arena_v1.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![field("f0", 0, FieldType::Bool), field("f1", 1, FieldType::I8)],
            config: WireConfig::default(),
        });
        let arena_v1 = Arc::new(arena_v1);
        let v1_view = Message::decode(r_v1, arena_v1, &v2_bytes).unwrap();
        assert_eq!(v1_view.encode().unwrap(), v2_bytes);
    }
}
