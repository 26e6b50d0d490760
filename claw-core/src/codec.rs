// Top-level marshal/unmarshal entry points (C5, spec.md §4.5). Thin
// wrappers over `Message::encode_into`/`decode_one`: the struct runtime
// already knows how to encode and lazily decode itself, so this module
// only adds the "whole buffer, nothing left over" contract a top-level
// caller expects but a nested decode (a struct-valued field, a
// struct-list element) must not enforce.

use std::sync::Arc;

use claw_base::Result;

use crate::message::Message;
use crate::schema::{SchemaArena, SchemaRef};

/// Encodes `message` to a fresh byte vector.
pub fn marshal(message: &Message) -> Result<Vec<u8>> {
    message.encode()
}

/// Encodes `message` by appending to an existing buffer, for callers
/// batching several top-level messages back to back.
pub fn marshal_into(message: &Message, out: &mut Vec<u8>) -> Result<()> {
    message.encode_into(out)
}

/// Decodes exactly one message of `schema` from `bytes`, requiring the
/// whole slice to be consumed.
pub fn unmarshal(schema: SchemaRef, arena: Arc<SchemaArena>, bytes: &[u8]) -> Result<Message> {
    Message::decode(schema, arena, bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::FieldType;
    use crate::scalar::Scalar;
    use crate::schema::{FieldDescriptor, StructSchema, WireConfig};

    fn pod_schema() -> (Arc<SchemaArena>, SchemaRef) {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![FieldDescriptor {
                name: "f0".into(),
                field_number: 0,
                ty: FieldType::Bool,
                list_element_ty: None,
                nested: None,
                enum_group: None,
                self_ref: false,
            }],
            config: WireConfig::default(),
        });
        (Arc::new(arena), r)
    }

    #[test]
    fn test_marshal_unmarshal_roundtrip() {
        let (arena, r) = pod_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        let bytes = marshal(&m).unwrap();
        let back = unmarshal(r, arena, &bytes).unwrap();
        assert_eq!(marshal(&back).unwrap(), bytes);
    }

    #[test]
    fn test_unmarshal_rejects_trailing_bytes() {
        let (arena, r) = pod_schema();
        let mut m = Message::new(r, arena.clone());
        m.set_scalar(0, Scalar::Bool(true)).unwrap();
        let mut bytes = marshal(&m).unwrap();
        bytes.extend_from_slice(&[0u8; 8]);
        assert!(unmarshal(r, arena, &bytes).is_err());
    }
}
