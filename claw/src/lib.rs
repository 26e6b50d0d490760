// The public facade: re-exports of `claw-core`'s runtime types, plus
// the "generated wrapper surface" spec.md §6 describes — the pieces a
// schema compiler's emitted code would lean on rather than touching
// `Message` directly. No parsing, no templates, no filesystem or VCS
// code lives here; a schema compiler is an external collaborator this
// crate is built to be targeted by, not one it implements.

use std::sync::Arc;

use claw_base::Result;
use claw_core::message::{Message, RecordedOp};
use claw_core::schema::{SchemaArena, SchemaRef};

pub use claw_base::{Error, Result as ClawResult};
pub use claw_core::cancel::{AtomicCancelToken, CancelToken, NeverCancel};
pub use claw_core::codec::{marshal, marshal_into, unmarshal};
pub use claw_core::header::{FieldType, Header};
pub use claw_core::message::{FieldValue, Message as RawMessage, OpKind as PatchOpKind, RecordedOp as PatchRecordedOp};
pub use claw_core::patch::{Patch, PatchOp, PATCH_WIRE_VERSION};
pub use claw_core::pool::Pool;
pub use claw_core::schema::{FieldDescriptor, SchemaArena as Arena, SchemaRef as Schema, StructSchema, WireConfig};

/// One value a raw-initialisation record can carry, covering every
/// scalar a generated constructor would accept directly (spec.md §6:
/// "a constructor that accepts a raw-initialisation record, so users
/// assemble messages directly from scalars"). List- and struct-valued
/// fields are out of scope for a raw record — those still go through
/// the generated wrapper's own typed setters once constructed.
#[derive(Clone, Debug)]
pub enum RawField {
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
    Str(String),
    Bytes(Vec<u8>),
}

/// An ordered set of `(field_number, value)` pairs, the payload a
/// generated wrapper's raw-initialisation constructor accepts.
#[derive(Clone, Debug, Default)]
pub struct RawRecord(Vec<(u16, RawField)>);

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field_number: u16, value: RawField) -> Self {
        self.0.push((field_number, value));
        self
    }
}

fn apply_raw_field(message: &mut Message, field_number: u16, value: RawField) -> Result<()> {
    match value {
        RawField::Bool(v) => message.set_bool(field_number, v),
        RawField::I8(v) => message.set_i8(field_number, v),
        RawField::I16(v) => message.set_i16(field_number, v),
        RawField::I32(v) => message.set_i32(field_number, v),
        RawField::I64(v) => message.set_i64(field_number, v),
        RawField::U8(v) => message.set_u8(field_number, v),
        RawField::U16(v) => message.set_u16(field_number, v),
        RawField::U32(v) => message.set_u32(field_number, v),
        RawField::U64(v) => message.set_u64(field_number, v),
        RawField::F32(v) => message.set_f32(field_number, v),
        RawField::F64(v) => message.set_f64(field_number, v),
        RawField::Str(v) => message.set_str(field_number, v),
        RawField::Bytes(v) => message.set_bytes(field_number, v),
    }
}

/// Implemented by a generated wrapper type (typically a single-field
/// newtype around [`Message`]) to pick up the rest of "the generated
/// wrapper surface" (spec.md §6) for free: raw-record construction,
/// marshal/unmarshal, pooled reset, and mutation recording. A wrapper
/// only has to supply its schema/arena and a way to reach its inner
/// `Message`; everything else is a default method over that.
pub trait RawInit: Sized {
    fn schema() -> SchemaRef;
    fn arena() -> Arc<SchemaArena>;
    fn wrap(message: Message) -> Self;
    fn message(&self) -> &Message;
    fn message_mut(&mut self) -> &mut Message;

    /// Builds an instance directly from scalars, one setter call per
    /// field instead of chaining the wrapper's own typed setters.
    fn from_raw(record: RawRecord) -> Result<Self> {
        let mut message = Message::new(Self::schema(), Self::arena());
        for (field_number, value) in record.0 {
            apply_raw_field(&mut message, field_number, value)?;
        }
        Ok(Self::wrap(message))
    }

    fn marshal(&self) -> Result<Vec<u8>> {
        claw_core::codec::marshal(self.message())
    }

    fn unmarshal(bytes: &[u8]) -> Result<Self> {
        let message = claw_core::codec::unmarshal(Self::schema(), Self::arena(), bytes)?;
        Ok(Self::wrap(message))
    }

    /// Resets the wrapper's message to the zero state for pool reuse
    /// (spec.md §6 "a reset for pooling").
    fn reset(&mut self) {
        self.message_mut().reset();
    }

    fn set_recording(&mut self, on: bool) {
        self.message_mut().set_recording(on);
    }

    fn is_recording(&self) -> bool {
        self.message().is_recording()
    }

    fn drain_recorded(&mut self) -> Vec<RecordedOp> {
        self.message_mut().drain_recorded()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use claw_core::header::FieldType;
    use claw_core::schema::{FieldDescriptor, StructSchema, WireConfig};
    use std::sync::OnceLock;

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

    fn point_arena_and_schema() -> (Arc<SchemaArena>, SchemaRef) {
        static CELL: OnceLock<(Arc<SchemaArena>, SchemaRef)> = OnceLock::new();
        CELL.get_or_init(|| {
            let mut arena = SchemaArena::new();
            let r = arena.insert(StructSchema {
                name: "Point".into(),
                package: "test".into(),
                path: "test/point.claw".into(),
                fields: vec![field("x", 0, FieldType::I32), field("y", 1, FieldType::I32)],
                config: WireConfig::default(),
            });
            (Arc::new(arena), r)
        })
        .clone()
    }

    struct Point(Message);

    impl RawInit for Point {
        fn schema() -> SchemaRef {
            point_arena_and_schema().1
        }
        fn arena() -> Arc<SchemaArena> {
            point_arena_and_schema().0
        }
        fn wrap(message: Message) -> Self {
            Point(message)
        }
        fn message(&self) -> &Message {
            &self.0
        }
        fn message_mut(&mut self) -> &mut Message {
            &mut self.0
        }
    }

    #[test]
    fn test_raw_init_constructs_and_marshals() {
        let record = RawRecord::new().with(0, RawField::I32(3)).with(1, RawField::I32(4));
        let mut p = Point::from_raw(record).unwrap();
        assert_eq!(p.message_mut().get_i32(0).unwrap(), 3);
        assert_eq!(p.message_mut().get_i32(1).unwrap(), 4);

        let bytes = p.marshal().unwrap();
        let back = Point::unmarshal(&bytes).unwrap();
        assert_eq!(back.marshal().unwrap(), bytes);
    }

    #[test]
    fn test_reset_and_recording_delegate_to_the_inner_message() {
        let mut p = Point::from_raw(RawRecord::new().with(0, RawField::I32(1))).unwrap();
        p.set_recording(true);
        p.message_mut().set_i32(1, 9).unwrap();
        assert_eq!(p.drain_recorded().len(), 1);

        p.reset();
        assert!(!p.message().field_present(0));
    }
}
