// Schema descriptor types (spec.md §6): the artifact a code generator
// hands the runtime. A schema is a tree of named structs, each with an
// ordered list of typed fields, but cyclic schemas (struct A reachable
// from itself) can't be expressed by value — so structs live in an
// arena and reference each other by index (`SchemaRef`), the same way
// the header's 40-bit payload stands in for an out-of-line size rather
// than embedding it.

use claw_base::{Error, Result};

use crate::header::FieldType;

/// Index of a [`StructSchema`] within a [`SchemaArena`]. Cheap to copy
/// and clone across struct boundaries; stable for the arena's lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct SchemaRef(pub(crate) usize);

/// Per-schema-file flag (spec.md §4 edge cases): when set, a zero
/// scalar is still written so presence can be distinguished from
/// absence; when clear (the default), zero scalars are omitted.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WireConfig {
    pub no_zero_compression: bool,
}

/// One field of a [`StructSchema`].
#[derive(Clone, Debug)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_number: u16,
    pub ty: FieldType,
    /// Element type, present only when `ty` is one of the `List*` tags.
    pub list_element_ty: Option<FieldType>,
    /// Target struct, present when `ty` (or `list_element_ty`) is
    /// `Struct`/`ListStruct`.
    pub nested: Option<SchemaRef>,
    pub enum_group: Option<String>,
    /// True when `nested` points back at the struct this field belongs
    /// to — lets a decoder recognise recursion without walking the
    /// arena to discover it.
    pub self_ref: bool,
}

impl FieldDescriptor {
    fn validate(&self, owner: SchemaRef) -> Result<()> {
        if self.ty.is_list() && self.list_element_ty.is_none() {
            return Err(Error::malformed(format!(
                "field '{}' (#{}) is a list type but declares no element tag",
                self.name, self.field_number
            )));
        }
        if !self.ty.is_list() && self.list_element_ty.is_some() {
            return Err(Error::malformed(format!(
                "field '{}' (#{}) is scalar but declares a list element tag",
                self.name, self.field_number
            )));
        }
        let element_is_struct = self
            .list_element_ty
            .map(|t| t == FieldType::Struct)
            .unwrap_or(false);
        let needs_nested = self.ty == FieldType::Struct
            || self.ty == FieldType::ListStruct
            || element_is_struct;
        if needs_nested && self.nested.is_none() && !self.self_ref {
            return Err(Error::malformed(format!(
                "field '{}' (#{}) is struct-typed but declares no nested descriptor",
                self.name, self.field_number
            )));
        }
        if self.self_ref {
            match self.nested {
                Some(r) if r == owner => {}
                Some(_) => {
                    return Err(Error::malformed(format!(
                        "field '{}' (#{}) marked self-referential but points at a different struct",
                        self.name, self.field_number
                    )))
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// A named struct definition: an identifier, a package/path pair, and
/// an ordered list of field descriptors.
#[derive(Clone, Debug)]
pub struct StructSchema {
    pub name: String,
    pub package: String,
    pub path: String,
    pub fields: Vec<FieldDescriptor>,
    pub config: WireConfig,
}

impl StructSchema {
    /// Field descriptor for a given wire field number, if the schema
    /// declares one. Field numbers need not be contiguous, so this is
    /// a linear scan; callers on a hot path should cache the result.
    pub fn field_by_number(&self, field_number: u16) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.field_number == field_number)
    }

    /// Highest field number this schema knows about, or `None` if the
    /// struct has no fields. Anything past this on the wire is excess.
    pub fn max_field_number(&self) -> Option<u16> {
        self.fields.iter().map(|f| f.field_number).max()
    }
}

/// Arena of interned struct schemas. Structs reference each other by
/// [`SchemaRef`] rather than by value, so a schema graph with cycles
/// (struct A transitively including struct A) is representable without
/// infinite recursion.
#[derive(Clone, Debug, Default)]
pub struct SchemaArena {
    structs: Vec<StructSchema>,
}

impl SchemaArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a struct schema and returns a stable reference to it.
    /// The schema is not validated until [`SchemaArena::validate`] is
    /// called, since a struct's own fields may reference structs
    /// inserted later (forward references are expected for cycles).
    pub fn insert(&mut self, schema: StructSchema) -> SchemaRef {
        self.structs.push(schema);
        SchemaRef(self.structs.len() - 1)
    }

    pub fn get(&self, r: SchemaRef) -> &StructSchema {
        &self.structs[r.0]
    }

    pub fn len(&self) -> usize {
        self.structs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Validates every struct's field descriptors and every nested
    /// reference, rejecting a list field with no element tag or a
    /// struct field with no nested descriptor (spec.md §6).
    pub fn validate(&self) -> Result<()> {
        for (idx, s) in self.structs.iter().enumerate() {
            let owner = SchemaRef(idx);
            for f in &s.fields {
                f.validate(owner)?;
                if let Some(nested) = f.nested {
                    if nested.0 >= self.structs.len() {
                        return Err(Error::malformed(format!(
                            "field '{}' in struct '{}' references out-of-arena schema {:?}",
                            f.name, s.name, nested
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn scalar_field(name: &str, number: u16, ty: FieldType) -> FieldDescriptor {
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

    #[test]
    fn test_flat_schema_validates() {
        let mut arena = SchemaArena::new();
        arena.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![
                scalar_field("f0", 0, FieldType::Bool),
                scalar_field("f1", 1, FieldType::I8),
            ],
            config: WireConfig::default(),
        });
        arena.validate().unwrap();
    }

    #[test]
    fn test_list_field_missing_element_tag_rejected() {
        let mut arena = SchemaArena::new();
        let mut f = scalar_field("items", 0, FieldType::ListU32);
        f.list_element_ty = None;
        arena.insert(StructSchema {
            name: "Bad".into(),
            package: "test".into(),
            path: "test/bad.claw".into(),
            fields: vec![f],
            config: WireConfig::default(),
        });
        assert!(arena.validate().is_err());
    }

    #[test]
    fn test_struct_field_missing_nested_rejected() {
        let mut arena = SchemaArena::new();
        let f = scalar_field("child", 0, FieldType::Struct);
        arena.insert(StructSchema {
            name: "Bad".into(),
            package: "test".into(),
            path: "test/bad.claw".into(),
            fields: vec![f],
            config: WireConfig::default(),
        });
        assert!(arena.validate().is_err());
    }

    #[test]
    fn test_self_referential_struct() {
        let mut arena = SchemaArena::new();
        // Reserve the slot first so the field can name it.
        let list_node = arena.insert(StructSchema {
            name: "ListNode".into(),
            package: "test".into(),
            path: "test/list_node.claw".into(),
            fields: vec![],
            config: WireConfig::default(),
        });
        let mut next = scalar_field("next", 0, FieldType::Struct);
        next.nested = Some(list_node);
        next.self_ref = true;
        arena.structs_mut()[list_node.0].fields.push(next);
        arena.validate().unwrap();
    }

    // Test-only accessor: production code never mutates a schema once
    // inserted, but the self-referential test above needs to patch a
    // struct's fields in after reserving its slot.
    impl SchemaArena {
        fn structs_mut(&mut self) -> &mut Vec<StructSchema> {
            &mut self.structs
        }
    }

    #[test]
    fn test_max_field_number_and_lookup() {
        let mut arena = SchemaArena::new();
        let r = arena.insert(StructSchema {
            name: "Pod".into(),
            package: "test".into(),
            path: "test/pod.claw".into(),
            fields: vec![
                scalar_field("f0", 0, FieldType::Bool),
                scalar_field("f2", 2, FieldType::U16),
            ],
            config: WireConfig::default(),
        });
        let schema = arena.get(r);
        assert_eq!(schema.max_field_number(), Some(2));
        assert!(schema.field_by_number(1).is_none());
        assert_eq!(schema.field_by_number(2).unwrap().name, "f2");
    }
}
