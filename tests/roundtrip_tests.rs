// tests/roundtrip_tests.rs

#![allow(missing_docs)]

use segcode::{
    ObjectSegment, PrimitiveKind, Registry, Result, Segcode, TypeDescriptor, TypeRef, Value,
};
use std::sync::Arc;

fn registry() -> Arc<Registry> {
    let kind = TypeRef::enumeration("Kind", PrimitiveKind::I16);
    Arc::new(
        Registry::builder()
            .add_type(
                TypeDescriptor::new("Point")
                    .property(0, "x", TypeRef::I32)
                    .property(1, "y", TypeRef::I32),
            )
            .add_type(
                TypeDescriptor::new("Everything")
                    .property(0, "flag", TypeRef::BOOL)
                    .property(1, "small", TypeRef::U8)
                    .property(2, "tiny", TypeRef::I8)
                    .property(3, "short", TypeRef::U16)
                    .property(4, "signed_short", TypeRef::I16)
                    .property(5, "word", TypeRef::U32)
                    .property(6, "number", TypeRef::I32)
                    .property(7, "big", TypeRef::U64)
                    .property(8, "signed_big", TypeRef::I64)
                    .property(9, "ratio", TypeRef::F32)
                    .property(10, "precise", TypeRef::F64)
                    .property(11, "letter", TypeRef::CHAR)
                    .property(12, "color", TypeRef::enumeration("Color", PrimitiveKind::U8))
                    .property(13, "kind", kind.clone())
                    .property(14, "maybe", TypeRef::nullable(TypeRef::I32))
                    .property(15, "maybe_none", TypeRef::nullable(TypeRef::F64))
                    .property(16, "maybe_kind", TypeRef::nullable(kind))
                    .property(17, "name", TypeRef::String)
                    .property(18, "blob", TypeRef::Bytes)
                    .property(19, "raw", TypeRef::Array(Box::new(TypeRef::U8)))
                    .property(20, "origin", TypeRef::object("Point"))
                    .cached_property(21, "points", TypeRef::list(TypeRef::object("Point")))
                    .cached_property(
                        22,
                        "scores",
                        TypeRef::dictionary(TypeRef::String, TypeRef::I64),
                    )
                    .cached_property(23, "groups", TypeRef::lookup(TypeRef::I32, TypeRef::String))
                    .cached_property(
                        24,
                        "pair",
                        TypeRef::key_tuple(vec![TypeRef::I32, TypeRef::String]),
                    )
                    .cached_property(
                        25,
                        "packed",
                        TypeRef::key_tuple(vec![TypeRef::U8, TypeRef::F64]),
                    )
                    .property(26, "words", TypeRef::list(TypeRef::String))
                    .property(27, "missing_point", TypeRef::object("Point")),
            )
            .build()
            .unwrap(),
    )
}

fn point(registry: &Registry, x: i32, y: i32) -> Result<ObjectSegment> {
    Ok(registry
        .new_object("Point")?
        .set("x", x)?
        .set("y", y)?
        .build())
}

fn encode_everything(registry: &Registry) -> Result<Vec<u8>> {
    registry
        .new_object("Everything")?
        .set("flag", true)?
        .set("small", 200u8)?
        .set("tiny", -5i8)?
        .set("short", 60_000u16)?
        .set("signed_short", -30_000i16)?
        .set("word", 4_000_000_000u32)?
        .set("number", -123_456)?
        .set("big", u64::MAX)?
        .set("signed_big", i64::MIN)?
        .set("ratio", 1.5f32)?
        .set("precise", -0.25f64)?
        .set("letter", 'λ')?
        .set("color", Value::Enum(3))?
        .set("kind", Value::Enum(-2))?
        .set("maybe", Some(5))?
        .set("maybe_none", Value::Null)?
        .set("maybe_kind", Value::Enum(-7))?
        .set("name", "everything")?
        .set("blob", vec![1u8, 2, 3])?
        .set("raw", Value::Bytes(vec![9; 5]))?
        .set("origin", point(registry, 10, 20)?)?
        .set(
            "points",
            Value::List(vec![
                point(registry, 1, 2)?.into(),
                Value::Null,
                point(registry, 3, 4)?.into(),
            ]),
        )?
        .set(
            "scores",
            Value::Dict(vec![("a".into(), Value::I64(1)), ("bb".into(), Value::I64(-2))]),
        )?
        .set(
            "groups",
            Value::Lookup(vec![
                (Value::I32(1), vec!["one".into(), "uno".into()]),
                (Value::I32(2), vec![]),
            ]),
        )?
        .set("pair", Value::Tuple(vec![Value::I32(9), "nine".into()]))?
        .set("packed", Value::Tuple(vec![Value::U8(1), Value::F64(2.5)]))?
        .set("words", Value::list(["x", "yz"]))?
        .encode()
}

#[test]
fn test_every_shape_round_trips() -> Result<()> {
    let registry = registry();
    let bytes = encode_everything(&registry)?;
    let doc = Segcode::decode(Arc::clone(&registry), "Everything", bytes)?;
    let e = doc.root().unwrap();

    assert_eq!(*e.get("flag")?, Value::Bool(true));
    assert_eq!(*e.get("small")?, Value::U8(200));
    assert_eq!(*e.get("tiny")?, Value::I8(-5));
    assert_eq!(*e.get("short")?, Value::U16(60_000));
    assert_eq!(*e.get("signed_short")?, Value::I16(-30_000));
    assert_eq!(*e.get("word")?, Value::U32(4_000_000_000));
    assert_eq!(*e.get("number")?, Value::I32(-123_456));
    assert_eq!(*e.get("big")?, Value::U64(u64::MAX));
    assert_eq!(*e.get("signed_big")?, Value::I64(i64::MIN));
    assert_eq!(*e.get("ratio")?, Value::F32(1.5));
    assert_eq!(*e.get("precise")?, Value::F64(-0.25));
    assert_eq!(*e.get("letter")?, Value::Char('λ'));
    assert_eq!(*e.get("color")?, Value::Enum(3));
    assert_eq!(*e.get("kind")?, Value::Enum(-2));
    assert_eq!(*e.get("maybe")?, Value::I32(5));
    assert_eq!(*e.get("maybe_none")?, Value::Null);
    assert_eq!(*e.get("maybe_kind")?, Value::Enum(-7));
    assert_eq!(e.get("name")?.as_str(), Some("everything"));
    assert_eq!(e.get("blob")?.as_bytes(), Some(&[1u8, 2, 3][..]));
    assert_eq!(e.get("raw")?.as_bytes(), Some(&[9u8; 5][..]));

    let origin = e.object("origin")?.unwrap();
    assert_eq!(origin.type_name()?, "Point");
    assert_eq!(*origin.get("x")?, Value::I32(10));
    assert_eq!(*origin.get("y")?, Value::I32(20));
    assert!(e.object("missing_point")?.is_none());

    assert_eq!(e.get("points")?.as_list().unwrap().len(), 3);
    assert_eq!(*e.list_object("points", 0)?.unwrap().get("y")?, Value::I32(2));
    assert!(e.list_object("points", 1)?.is_none());
    assert_eq!(*e.list_object("points", 2)?.unwrap().get("x")?, Value::I32(3));

    assert_eq!(
        *e.get("scores")?,
        Value::Dict(vec![("a".into(), Value::I64(1)), ("bb".into(), Value::I64(-2))])
    );
    assert_eq!(
        *e.get("groups")?,
        Value::Lookup(vec![
            (Value::I32(1), vec!["one".into(), "uno".into()]),
            (Value::I32(2), vec![]),
        ])
    );
    assert_eq!(
        *e.get("pair")?,
        Value::Tuple(vec![Value::I32(9), "nine".into()])
    );
    assert_eq!(
        *e.get("packed")?,
        Value::Tuple(vec![Value::U8(1), Value::F64(2.5)])
    );
    assert_eq!(*e.get("words")?, Value::list(["x", "yz"]));
    Ok(())
}

#[test]
fn test_untouched_document_serializes_to_input() -> Result<()> {
    let registry = registry();
    let bytes = encode_everything(&registry)?;
    let doc = Segcode::decode(Arc::clone(&registry), "Everything", bytes.clone())?;

    // Reading materializes caches but modifies nothing.
    let e = doc.root().unwrap();
    e.get("points")?;
    e.get("scores")?;

    assert!(!doc.is_dirty());
    assert_eq!(doc.serialize()?, bytes);
    Ok(())
}

#[test]
fn test_forced_re_encode_is_canonical() -> Result<()> {
    let registry = registry();
    let bytes = encode_everything(&registry)?;
    let mut doc = Segcode::decode(Arc::clone(&registry), "Everything", bytes.clone())?;

    {
        let mut e = doc.root_mut().unwrap();
        // Touch every variable property without changing a value.
        for name in ["name", "blob", "words", "points", "scores", "groups", "pair", "packed"] {
            e.value_mut(name)?;
        }
    }
    assert!(doc.is_dirty());
    assert!(!doc.root().unwrap().can_direct_copy());
    assert_eq!(doc.serialize()?, bytes);
    Ok(())
}

#[test]
fn test_builder_defaults() -> Result<()> {
    let registry = registry();
    let bytes = registry.new_object("Everything")?.encode()?;
    let doc = Segcode::decode(Arc::clone(&registry), "Everything", bytes)?;
    let e = doc.root().unwrap();

    assert_eq!(*e.get("flag")?, Value::Bool(false));
    assert_eq!(*e.get("signed_big")?, Value::I64(0));
    assert_eq!(*e.get("letter")?, Value::Char('\0'));
    assert_eq!(*e.get("kind")?, Value::Enum(0));
    assert_eq!(*e.get("maybe")?, Value::Null);
    assert_eq!(*e.get("name")?, Value::Null);
    assert_eq!(*e.get("points")?, Value::Null);
    assert!(e.sequence("points")?.is_none());
    Ok(())
}

#[test]
fn test_type_mismatch_is_rejected() -> Result<()> {
    let registry = registry();
    let builder = registry.new_object("Everything")?;

    let err = builder.set("number", "not a number").unwrap_err();
    assert!(matches!(err, segcode::SegcodeError::TypeMismatch { .. }));

    let builder = registry.new_object("Everything")?;
    assert!(builder.set("flag", Value::Null).is_err());

    let builder = registry.new_object("Everything")?;
    // 300 does not fit the u8 storage of Color.
    assert!(builder.set("color", Value::Enum(300)).is_err());

    let builder = registry.new_object("Everything")?;
    let wrong_object = registry.new_object("Everything")?.build();
    assert!(builder.set("origin", wrong_object).is_err());

    // Container elements are checked when encoding.
    let encoded = registry
        .new_object("Everything")?
        .set("words", Value::list([1, 2]))?
        .encode();
    assert!(encoded.is_err());
    Ok(())
}

fn item_v1() -> TypeDescriptor {
    TypeDescriptor::new("Item")
        .property(0, "id", TypeRef::I32)
        .property(1, "name", TypeRef::String)
}

fn item_v2() -> TypeDescriptor {
    item_v1()
        .property(2, "score", TypeRef::I64)
        .property(3, "note", TypeRef::String)
        .cached_property(4, "tags", TypeRef::list(TypeRef::I32))
}

#[test]
fn test_older_payload_reads_defaults() -> Result<()> {
    let v1 = Registry::builder().add_type(item_v1()).build()?;
    let v2 = Arc::new(Registry::builder().add_type(item_v2()).build()?);

    let old_bytes = v1.new_object("Item")?.set("id", 42)?.set("name", "old")?.encode()?;
    // Header sized for the v1 schema: indices 0 and 1.
    assert_eq!(i32::from_le_bytes(old_bytes[4..8].try_into().unwrap()), 1);

    let doc = Segcode::decode(Arc::clone(&v2), "Item", old_bytes.clone())?;
    let item = doc.root().unwrap();
    assert_eq!(item.segment().binary_last_index(), 1);
    assert_eq!(*item.get("id")?, Value::I32(42));
    assert_eq!(item.get("name")?.as_str(), Some("old"));
    assert_eq!(*item.get("score")?, Value::I64(0));
    assert_eq!(*item.get("note")?, Value::Null);
    assert_eq!(*item.get("tags")?, Value::Null);

    // Untouched, the old bytes are kept as they are.
    assert_eq!(doc.serialize()?, old_bytes);
    Ok(())
}

#[test]
fn test_writing_a_new_fixed_field_upgrades_the_payload() -> Result<()> {
    let v1 = Registry::builder().add_type(item_v1()).build()?;
    let v2 = Arc::new(Registry::builder().add_type(item_v2()).build()?);

    let old_bytes = v1.new_object("Item")?.set("id", 42)?.set("name", "old")?.encode()?;
    let mut doc = Segcode::decode(Arc::clone(&v2), "Item", old_bytes)?;

    doc.root_mut().unwrap().set("score", 99i64)?;
    let item = doc.root().unwrap();
    assert!(item.segment().has_extra_fixed());
    assert!(!item.can_direct_copy());
    assert_eq!(*item.get("score")?, Value::I64(99));

    let upgraded = doc.serialize()?;
    let fresh = v2
        .new_object("Item")?
        .set("id", 42)?
        .set("name", "old")?
        .set("score", 99i64)?
        .encode()?;
    assert_eq!(upgraded, fresh);

    let reread = Segcode::decode(Arc::clone(&v2), "Item", upgraded)?;
    let item = reread.root().unwrap();
    assert_eq!(item.segment().binary_last_index(), 4);
    assert_eq!(*item.get("score")?, Value::I64(99));
    assert_eq!(item.get("name")?.as_str(), Some("old"));
    Ok(())
}

fn holder(item: TypeDescriptor) -> Result<Registry> {
    Registry::builder()
        .add_type(item)
        .add_type(
            TypeDescriptor::new("Holder")
                .property(0, "main", TypeRef::object("Item"))
                .cached_property(1, "spares", TypeRef::list(TypeRef::object("Item")))
                .property(2, "label", TypeRef::String),
        )
        .build()
}

#[test]
fn test_new_fixed_field_in_nested_older_payload_reaches_the_root() -> Result<()> {
    let v1 = holder(item_v1())?;
    let v2 = Arc::new(holder(item_v2())?);
    let old_item = |id: i32| -> Result<Value> {
        Ok(v1.new_object("Item")?.set("id", id)?.set("name", "old")?.build().into())
    };
    let old_bytes = v1
        .new_object("Holder")?
        .set("main", old_item(1)?)?
        .set("spares", vec![old_item(2)?])?
        .set("label", "h")?
        .encode()?;

    let mut doc = Segcode::decode(Arc::clone(&v2), "Holder", old_bytes)?;
    {
        let mut root = doc.root_mut().unwrap();
        let mut main = root.object_mut("main")?.unwrap();
        main.set("score", 77i64)?;
        assert!(main.to_ref().segment().has_extra_fixed());
        assert!(main.is_dirty());
    }

    let root = doc.root().unwrap();
    assert!(doc.is_dirty());
    assert!(!root.can_direct_copy());
    assert!(!root.object("main")?.unwrap().can_direct_copy());
    // Off the path, the older list element is still copied as it is.
    assert!(root.list_object("spares", 0)?.unwrap().can_direct_copy());

    let reread = Segcode::decode(Arc::clone(&v2), "Holder", doc.serialize()?)?;
    let root = reread.root().unwrap();
    let main = root.object("main")?.unwrap();
    assert_eq!(main.segment().binary_last_index(), 4);
    assert_eq!(*main.get("score")?, Value::I64(77));
    assert_eq!(*main.get("id")?, Value::I32(1));
    assert_eq!(main.get("name")?.as_str(), Some("old"));

    let spare = root.list_object("spares", 0)?.unwrap();
    assert_eq!(spare.segment().binary_last_index(), 1);
    assert_eq!(*spare.get("id")?, Value::I32(2));
    assert_eq!(*spare.get("score")?, Value::I64(0));
    assert_eq!(root.get("label")?.as_str(), Some("h"));
    Ok(())
}

#[test]
fn test_newer_payload_reads_under_older_schema() -> Result<()> {
    let v1 = Arc::new(Registry::builder().add_type(item_v1()).build()?);
    let v2 = Registry::builder().add_type(item_v2()).build()?;

    let new_bytes = v2
        .new_object("Item")?
        .set("id", 1)?
        .set("name", "new")?
        .set("score", 5i64)?
        .set("tags", Value::list([1, 2, 3]))?
        .encode()?;

    let mut doc = Segcode::decode(Arc::clone(&v1), "Item", new_bytes.clone())?;
    assert_eq!(*doc.root().unwrap().get("id")?, Value::I32(1));
    assert_eq!(doc.root().unwrap().get("name")?.as_str(), Some("new"));
    // Unknown trailing properties survive a direct copy.
    assert_eq!(doc.serialize()?, new_bytes);

    // A re-encode under the older schema drops them.
    doc.root_mut().unwrap().set("name", "renamed")?;
    let rewritten = doc.serialize()?;
    let expected = v1.new_object("Item")?.set("id", 1)?.set("name", "renamed")?.encode()?;
    assert_eq!(rewritten, expected);
    Ok(())
}
