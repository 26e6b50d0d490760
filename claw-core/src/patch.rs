// Patch & recording (C6, spec.md §4.6/§6): a patch is a compact,
// field-ordered description of how one struct differs from another
// (or of what a recorder observed happen to one over time) — a
// version plus an ordered list of ops, each a field number, an op
// kind, an optional list index, and an opaque payload.
//
// Built in the same discipline the rest of this runtime already uses
// — explicit `Result`, field-number ordering, struct-typed wire data —
// rather than inventing a bespoke format: `Patch` is itself expressed
// as a schema-typed message and goes through the same encode/decode
// path as everything else: `version: u32 @0`, `ops: list<struct> @1`,
// each op a tiny four-field struct of its own.

use std::sync::{Arc, OnceLock};

use claw_base::{Error, Result};

use crate::codec::{marshal, unmarshal};
use crate::header::FieldType;
use crate::message::{Message, OpKind, RecordedOp};
use crate::schema::{FieldDescriptor, SchemaArena, SchemaRef, StructSchema, WireConfig};

/// The only patch wire version this runtime knows how to produce or
/// consume. A decoded patch carrying any other value is rejected with
/// [`claw_base::Error::UnsupportedPatchVersion`] rather than guessed at.
pub const PATCH_WIRE_VERSION: u32 = 1;

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

/// Schema refs for the patch wire format's own two struct types,
/// arena-built once and shared by every `Patch::encode`/`decode` call.
struct PatchSchema {
    arena: Arc<SchemaArena>,
    patch: SchemaRef,
    op: SchemaRef,
}

fn patch_schema() -> &'static PatchSchema {
    static CELL: OnceLock<PatchSchema> = OnceLock::new();
    CELL.get_or_init(|| {
        let mut arena = SchemaArena::new();
        let op = arena.insert(StructSchema {
            name: "PatchOpRecord".into(),
            package: "claw.patch".into(),
            path: "claw/patch.claw".into(),
            fields: vec![
                field("field_number", 0, FieldType::U16),
                field("op_type", 1, FieldType::U8),
                field("index", 2, FieldType::U32),
                field("payload", 3, FieldType::Bytes),
            ],
            // `index` at 0 (a list op on the first element) must stay
            // distinguishable from "no index at all" (a scalar op):
            // presence, not value, carries that meaning here, so zero
            // compression has to be off for this struct.
            config: WireConfig { no_zero_compression: true },
        });
        let mut ops_field = field("ops", 1, FieldType::ListStruct);
        ops_field.list_element_ty = Some(FieldType::Struct);
        ops_field.nested = Some(op);
        let patch = arena.insert(StructSchema {
            name: "Patch".into(),
            package: "claw.patch".into(),
            path: "claw/patch.claw".into(),
            fields: vec![field("version", 0, FieldType::U32), ops_field],
            config: WireConfig::default(),
        });
        PatchSchema {
            arena: Arc::new(arena),
            patch,
            op,
        }
    })
}

fn op_tag(op: OpKind) -> u8 {
    match op {
        OpKind::Set => 0,
        OpKind::Delete => 1,
        OpKind::ListAppend => 2,
        OpKind::ListSet => 3,
    }
}

fn op_from_tag(tag: u8) -> Result<OpKind> {
    Ok(match tag {
        0 => OpKind::Set,
        1 => OpKind::Delete,
        2 => OpKind::ListAppend,
        3 => OpKind::ListSet,
        other => return Err(Error::patch_rejected(format!("unknown patch op tag {other}"))),
    })
}

/// One op in a patch: a field, what happened to it, where (for list
/// ops), and the bytes needed to replay it.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchOp {
    pub field_number: u16,
    pub op: OpKind,
    pub index: Option<u32>,
    pub payload: Vec<u8>,
}

impl From<RecordedOp> for PatchOp {
    fn from(r: RecordedOp) -> Self {
        PatchOp {
            field_number: r.field_number,
            op: r.op,
            index: r.index,
            payload: r.payload,
        }
    }
}

/// A versioned, ordered set of struct mutations (spec.md §4.6).
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    pub version: u32,
    pub ops: Vec<PatchOp>,
}

impl Patch {
    /// Builds a patch from an unordered op list, canonicalising order
    /// by `(field_number, index.unwrap_or(0))` with a stable sort so
    /// two patches describing the same net change always compare equal
    /// byte-for-byte once encoded.
    pub fn from_ops(ops: Vec<PatchOp>) -> Self {
        let mut ops = ops;
        ops.sort_by_key(|op| (op.field_number, op.index.unwrap_or(0)));
        Patch {
            version: PATCH_WIRE_VERSION,
            ops,
        }
    }

    /// Builds a patch from a recorder's drained ops (see
    /// [`Message::drain_recorded`]), in the same canonical order.
    pub fn from_recorded(ops: Vec<RecordedOp>) -> Self {
        Self::from_ops(ops.into_iter().map(PatchOp::from).collect())
    }

    /// Computes the minimal patch that turns `a` into `b`. Both must
    /// share `schema`; every field is compared by materialised value,
    /// so a field whose content actually differs gets a single `set`
    /// (list fields included — no per-element diffing, the whole new
    /// list becomes the op's payload), a field that disappeared gets a
    /// `delete`, and an unchanged field contributes no op at all
    /// (spec.md §8 property: "applying a diff-produced patch to `a`
    /// yields a struct equal to `b`").
    pub fn diff(arena: &SchemaArena, schema: SchemaRef, a: &mut Message, b: &mut Message) -> Result<Self> {
        if a.schema() != schema || b.schema() != schema {
            return Err(Error::patch_rejected("diff operands must both match the given schema"));
        }
        let fields = &arena.get(schema).fields;
        let mut ops = Vec::new();
        for desc in fields {
            let fnum = desc.field_number;
            let av = a.materialized_value(fnum)?;
            let bv = b.materialized_value(fnum)?;
            match (av, bv) {
                (None, None) => {}
                (Some(_), None) => ops.push(PatchOp {
                    field_number: fnum,
                    op: OpKind::Delete,
                    index: None,
                    payload: Vec::new(),
                }),
                (None, Some(bv)) => ops.push(PatchOp {
                    field_number: fnum,
                    op: OpKind::Set,
                    index: None,
                    payload: bv.encode_whole_field(fnum)?,
                }),
                (Some(av), Some(bv)) => {
                    if av != bv {
                        ops.push(PatchOp {
                            field_number: fnum,
                            op: OpKind::Set,
                            index: None,
                            payload: bv.encode_whole_field(fnum)?,
                        });
                    }
                }
            }
        }
        Ok(Self::from_ops(ops))
    }

    /// Replays every op against `target` in the patch's own (already
    /// canonical) order. Ops applied before a failing one are not
    /// rolled back (patches are not transactional — callers that need
    /// atomicity should diff/apply against a scratch clone and swap it
    /// in on success).
    pub fn apply(&self, target: &mut Message) -> Result<()> {
        if self.version != PATCH_WIRE_VERSION {
            return Err(Error::unsupported_patch_version(self.version));
        }
        for op in &self.ops {
            target.apply_patch_op(op.field_number, op.op, op.index, &op.payload)?;
        }
        Ok(())
    }

    /// Encodes this patch to its own wire format: a `Patch` message per
    /// [`patch_schema`], marshalled the same way any other top-level
    /// struct is.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ps = patch_schema();
        let mut msg = Message::new(ps.patch, ps.arena.clone());
        msg.set_u32(0, self.version)?;
        for op in &self.ops {
            let mut rec = Message::new(ps.op, ps.arena.clone());
            rec.set_u16(0, op.field_number)?;
            rec.set_u8(1, op_tag(op.op))?;
            if let Some(index) = op.index {
                rec.set_u32(2, index)?;
            }
            if !op.payload.is_empty() {
                rec.set_bytes(3, op.payload.clone())?;
            }
            msg.struct_list_append(1, rec)?;
        }
        marshal(&msg)
    }

    /// Decodes a patch previously produced by [`Patch::encode`].
    /// Rejects an unknown version before attempting to interpret any
    /// op, since a newer wire shape may use op-type tags or field
    /// layouts this build doesn't understand.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let ps = patch_schema();
        let mut msg = unmarshal(ps.patch, ps.arena.clone(), bytes)?;
        let version = msg.get_u32(0)?;
        if version != PATCH_WIRE_VERSION {
            return Err(Error::unsupported_patch_version(version));
        }
        let n = msg.struct_list_len(1)?;
        let mut ops = Vec::with_capacity(n);
        for i in 0..n {
            let rec = msg.struct_list_get_mut(1, i)?;
            let field_number = rec.get_u16(0)?;
            let op = op_from_tag(rec.get_u8(1)?)?;
            let index = if rec.field_present(2) { Some(rec.get_u32(2)?) } else { None };
            let payload = rec.get_bytes(3)?.to_vec();
            ops.push(PatchOp {
                field_number,
                op,
                index,
                payload,
            });
        }
        Ok(Patch { version, ops })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn widget_schema() -> (Arc<SchemaArena>, SchemaRef) {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Widget".into(),
            package: "test".into(),
            path: "test/widget.claw".into(),
            fields: vec![
                field("name", 0, FieldType::String),
                field("count", 1, FieldType::I32),
                {
                    let mut f = field("tags", 2, FieldType::ListI32);
                    f.list_element_ty = Some(FieldType::I32);
                    f
                },
            ],
            config: WireConfig::default(),
        });
        (Arc::new(arena), r)
    }

    #[test]
    fn test_set_op_applies_narrow_scalar() {
        let (arena, r) = widget_schema();
        let mut a = Message::new(r, arena.clone());
        a.set_i32(1, 7).unwrap();
        let mut b = Message::new(r, arena.clone());
        b.set_i32(1, 42).unwrap();

        let patch = Patch::diff(&arena, r, &mut a, &mut b).unwrap();
        assert_eq!(patch.ops.len(), 1);
        patch.apply(&mut a).unwrap();
        assert_eq!(a.get_i32(1).unwrap(), 42);
    }

    #[test]
    fn test_diff_emits_delete_for_removed_field() {
        let (arena, r) = widget_schema();
        let mut a = Message::new(r, arena.clone());
        a.set_str(0, "widget".to_string()).unwrap();
        let mut b = Message::new(r, arena.clone());

        let patch = Patch::diff(&arena, r, &mut a, &mut b).unwrap();
        assert_eq!(patch.ops, vec![PatchOp {
            field_number: 0,
            op: OpKind::Delete,
            index: None,
            payload: Vec::new(),
        }]);
        patch.apply(&mut a).unwrap();
        assert_eq!(a.get_str(0).unwrap(), "");
    }

    #[test]
    fn test_diff_replaces_whole_list_with_one_set_op() {
        let (arena, r) = widget_schema();
        let mut a = Message::new(r, arena.clone());
        a.numeric_list_append(2, 1i32).unwrap();
        a.numeric_list_append(2, 2i32).unwrap();
        let mut b = Message::new(r, arena.clone());
        b.numeric_list_append(2, 9i32).unwrap();

        let patch = Patch::diff(&arena, r, &mut a, &mut b).unwrap();
        assert_eq!(patch.ops.len(), 1);
        assert_eq!(patch.ops[0].op, OpKind::Set);
        patch.apply(&mut a).unwrap();
        assert_eq!(a.numeric_list_len::<i32>(2).unwrap(), 1);
        assert_eq!(a.numeric_list_get::<i32>(2, 0).unwrap(), 9);
    }

    #[test]
    fn test_identical_structs_diff_to_empty_patch() {
        let (arena, r) = widget_schema();
        let mut a = Message::new(r, arena.clone());
        a.set_str(0, "same".to_string()).unwrap();
        let mut b = Message::new(r, arena.clone());
        b.set_str(0, "same".to_string()).unwrap();

        let patch = Patch::diff(&arena, r, &mut a, &mut b).unwrap();
        assert!(patch.ops.is_empty());
    }

    #[test]
    fn test_patch_wire_roundtrip() {
        let (arena, r) = widget_schema();
        let mut a = Message::new(r, arena.clone());
        a.set_str(0, "a".to_string()).unwrap();
        let mut b = Message::new(r, arena.clone());
        b.set_str(0, "b".to_string()).unwrap();
        b.numeric_list_append(2, 5i32).unwrap();

        let patch = Patch::diff(&arena, r, &mut a, &mut b).unwrap();
        let bytes = patch.encode().unwrap();
        let back = Patch::decode(&bytes).unwrap();
        assert_eq!(back, patch);

        patch.apply(&mut a).unwrap();
        assert_eq!(a.get_str(0).unwrap(), "b");
        assert_eq!(a.numeric_list_get::<i32>(2, 0).unwrap(), 5);
    }

    #[test]
    fn test_recorded_ops_survive_as_a_patch() {
        let (arena, r) = widget_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_recording(true);
        m.set_i32(1, 3).unwrap();
        m.numeric_list_append(2, 1i32).unwrap();
        m.numeric_list_append(2, 2i32).unwrap();
        let recorded = m.drain_recorded();
        let patch = Patch::from_recorded(recorded);

        let mut target = Message::new(r, arena.clone());
        patch.apply(&mut target).unwrap();
        assert_eq!(target.get_i32(1).unwrap(), 3);
        assert_eq!(target.numeric_list_len::<i32>(2).unwrap(), 2);
        assert_eq!(target.numeric_list_get::<i32>(2, 1).unwrap(), 2);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let bad = Patch { version: 99, ops: Vec::new() };
        let mut target = {
            let (arena, r) = widget_schema();
            Message::new(r, arena)
        };
        assert!(bad.apply(&mut target).is_err());
    }

    #[test]
    fn test_byte_list_set_op_round_trips_through_payload_framing() {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Blobs".into(),
            package: "test".into(),
            path: "test/blobs.claw".into(),
            fields: vec![{
                let mut f = field("items", 0, FieldType::ListBytes);
                f.list_element_ty = Some(FieldType::Bytes);
                f
            }],
            config: WireConfig::default(),
        });
        let arena = Arc::new(arena);
        let mut m = Message::new(r, arena.clone());
        m.set_recording(true);
        m.byte_list_append(0, FieldType::ListBytes, b"hello".to_vec()).unwrap();
        m.byte_list_set(0, FieldType::ListBytes, 0, b"world!".to_vec()).unwrap();
        let patch = Patch::from_recorded(m.drain_recorded());

        let mut target = Message::new(r, arena);
        patch.apply(&mut target).unwrap();
        assert_eq!(target.byte_list_get(0, 0).unwrap(), b"world!");
    }

    #[test]
    fn test_list_op_at_index_zero_survives_the_wire_round_trip() {
        // A `ListSet`/`ListAppend` op's index of 0 is a genuine zero
        // value, distinct from a scalar op's absent index. If the
        // patch wire format ever let that 0 get zero-compressed away,
        // decode would read it back as `None` instead of `Some(0)`.
        let (arena, r) = widget_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_recording(true);
        m.numeric_list_append(2, 1i32).unwrap();
        let recorded = m.drain_recorded();
        let patch = Patch::from_recorded(recorded);
        assert_eq!(patch.ops[0].index, Some(0));

        let bytes = patch.encode().unwrap();
        let decoded = Patch::decode(&bytes).unwrap();
        assert_eq!(decoded.ops[0].index, Some(0), "index 0 must not collapse into a missing index");
        assert_eq!(decoded, patch);
    }

    #[test]
    fn test_set_op_with_mismatched_header_type_is_rejected() {
        use crate::header::Header;

        let (arena, r) = widget_schema();
        // Field 1 is declared I32, but this op's header claims Bool.
        let header = Header::new(1, FieldType::Bool, 1).unwrap();
        let bogus = PatchOp {
            field_number: 1,
            op: OpKind::Set,
            index: None,
            payload: header.to_bytes().to_vec(),
        };
        let patch = Patch { version: PATCH_WIRE_VERSION, ops: vec![bogus] };
        let mut target = Message::new(r, arena);
        assert!(patch.apply(&mut target).is_err());
    }
}
