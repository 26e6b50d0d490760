// Cross-module integration tests: the end-to-end scenarios (spec.md
// §8) that don't belong to any single module's own `#[cfg(test)]`
// block because they exercise the struct runtime, the codec, and the
// patch machinery together.

use std::sync::Arc;

use test_log::test;

use crate::codec::{marshal, unmarshal};
use crate::header::{FieldType, Header};
use crate::ioutil::annotations::Annotations;
use crate::message::Message;
use crate::patch::Patch;
use crate::pool::Pool;
use crate::schema::{FieldDescriptor, SchemaArena, SchemaRef, StructSchema, WireConfig};

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

/// `Account { name: string @0, balance_cents: i64 @1, tags: list<i32>
/// @2, owner: Owner @3 }`, `Owner { email: string @0 }` — enough
/// nesting and field-kind variety to exercise struct, scalar-list and
/// wide-scalar handling together.
fn account_schema() -> (Arc<SchemaArena>, SchemaRef) {
    let mut arena = SchemaArena::new();
    let owner = arena.insert(StructSchema {
        name: "Owner".into(),
        package: "test".into(),
        path: "test/account.claw".into(),
        fields: vec![field("email", 0, FieldType::String)],
        config: WireConfig::default(),
    });
    let mut tags = field("tags", 2, FieldType::ListI32);
    tags.list_element_ty = Some(FieldType::I32);
    let mut owner_field = field("owner", 3, FieldType::Struct);
    owner_field.nested = Some(owner);
    let account = arena.insert(StructSchema {
        name: "Account".into(),
        package: "test".into(),
        path: "test/account.claw".into(),
        fields: vec![
            field("name", 0, FieldType::String),
            field("balance_cents", 1, FieldType::I64),
            tags,
            owner_field,
        ],
        config: WireConfig::default(),
    });
    arena.validate().unwrap();
    (Arc::new(arena), account)
}

fn sample_account(arena: &Arc<SchemaArena>, schema: SchemaRef, owner_schema: SchemaRef) -> Message {
    let mut m = Message::new(schema, arena.clone());
    m.set_str(0, "ada".to_string()).unwrap();
    m.set_i64(1, 10_000).unwrap();
    m.numeric_list_append(2, 1i32).unwrap();
    m.numeric_list_append(2, 2i32).unwrap();
    let mut owner = Message::new(owner_schema, arena.clone());
    owner.set_str(0, "ada@example.com".to_string()).unwrap();
    m.set_struct(3, owner).unwrap();
    m
}

#[test]
fn test_nested_roundtrip_and_passthrough() {
    let (arena, account) = account_schema();
    let owner_schema = arena.get(account).fields[3].nested.unwrap();
    let m = sample_account(&arena, account, owner_schema);

    let bytes = marshal(&m).unwrap();
    let mut back = unmarshal(account, arena.clone(), &bytes).unwrap();
    assert_eq!(marshal(&back).unwrap(), bytes, "decode-then-encode must be a passthrough");

    assert_eq!(back.get_str(0).unwrap(), "ada");
    assert_eq!(back.get_i64(1).unwrap(), 10_000);
    assert_eq!(back.numeric_list_len::<i32>(2).unwrap(), 2);
    assert_eq!(back.get_struct_mut(3).unwrap().get_str(0).unwrap(), "ada@example.com");
}

#[test]
fn test_patch_minimizes_to_touched_fields_only() {
    let (arena, account) = account_schema();
    let owner_schema = arena.get(account).fields[3].nested.unwrap();
    let mut a = sample_account(&arena, account, owner_schema);
    let mut b = sample_account(&arena, account, owner_schema);
    b.set_i64(1, 25_000).unwrap();

    let patch = Patch::diff(&arena, account, &mut a, &mut b).unwrap();
    assert_eq!(patch.ops.len(), 1, "only the changed balance field should produce an op");
    assert_eq!(patch.ops[0].field_number, 1);

    patch.apply(&mut a).unwrap();
    assert_eq!(marshal(&a).unwrap(), marshal(&b).unwrap());
}

#[test]
fn test_patch_round_trips_across_the_wire() {
    let (arena, account) = account_schema();
    let owner_schema = arena.get(account).fields[3].nested.unwrap();
    let mut a = sample_account(&arena, account, owner_schema);
    let mut b = sample_account(&arena, account, owner_schema);
    b.numeric_list_append(2, 3i32).unwrap();
    b.set_str(0, "grace".to_string()).unwrap();

    let patch = Patch::diff(&arena, account, &mut a, &mut b).unwrap();
    let wire = patch.encode().unwrap();
    let decoded = Patch::decode(&wire).unwrap();
    assert_eq!(decoded, patch);

    decoded.apply(&mut a).unwrap();
    assert_eq!(marshal(&a).unwrap(), marshal(&b).unwrap());
}

#[test]
fn test_unknown_trailing_field_survives_a_patch_to_an_unrelated_field() {
    // A peer on a newer schema version wrote a field this schema
    // doesn't know about (field 9, an i32). Decoding with the older
    // schema must keep those bytes as excess and carry them through
    // untouched even once we patch a field the old schema does know.
    let (arena, account) = account_schema();
    let owner_schema = arena.get(account).fields[3].nested.unwrap();
    let base = sample_account(&arena, account, owner_schema);
    let mut bytes = marshal(&base).unwrap();

    let excess_header = Header::new(9, FieldType::I32, 7).unwrap();
    bytes.extend_from_slice(&excess_header.to_bytes());
    let root_header = Header::from_bytes(bytes[..8].try_into().unwrap());
    let new_total = root_header.payload() + 8;
    let patched_root = Header::new(0, FieldType::Struct, new_total).unwrap();
    bytes[..8].copy_from_slice(&patched_root.to_bytes());

    let mut decoded = unmarshal(account, arena.clone(), &bytes).unwrap();
    let mut target = sample_account(&arena, account, owner_schema);
    target.set_i64(1, 1).unwrap();

    let patch = Patch::diff(&arena, account, &mut decoded, &mut target).unwrap();
    patch.apply(&mut decoded).unwrap();

    let re_encoded = marshal(&decoded).unwrap();
    assert_eq!(
        &re_encoded[re_encoded.len() - 8..],
        &excess_header.to_bytes(),
        "the unknown field 9 must still be the last thing on the wire"
    );
}

#[test]
fn test_pool_reuse_feeds_recorded_mutations_into_a_patch() {
    let (arena, account) = account_schema();
    let pool = Pool::new(account, arena.clone());

    let mut first = pool.acquire();
    first.set_recording(true);
    first.set_str(0, "first".to_string()).unwrap();
    let ops = first.drain_recorded();
    pool.release(first);

    let mut second = pool.acquire();
    assert!(!second.field_present(0), "a released message must come back zeroed");
    let patch = Patch::from_recorded(ops);
    patch.apply(&mut second).unwrap();
    assert_eq!(second.get_str(0).unwrap(), "first");
}

#[test]
fn test_annotated_hexdump_covers_every_written_byte() {
    let (arena, account) = account_schema();
    let owner_schema = arena.get(account).fields[3].nested.unwrap();
    let m = sample_account(&arena, account, owner_schema);
    let bytes = marshal(&m).unwrap();

    let mut ann = Annotations::new();
    ann.annotate(0..8, "root header");
    ann.annotate(8..16, "name field header");
    let rendered = ann.render_hexdump(&bytes).unwrap();
    assert!(rendered.contains("root header"));
    assert!(rendered.contains("name field header"));
}
