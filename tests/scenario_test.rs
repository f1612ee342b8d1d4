// tests/scenario_test.rs

#![allow(missing_docs)]

use segcode::{Registry, Segcode, TypeDescriptor, TypeRef, Value};
use std::sync::Arc;

fn item_registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .add_type(
                TypeDescriptor::new("Item")
                    .property(0, "Id", TypeRef::I32)
                    .property(1, "Name", TypeRef::String)
                    .cached_property(5, "Tag", TypeRef::list(TypeRef::I32)),
            )
            .build()
            .unwrap(),
    )
}

fn encode_item(registry: &Registry) -> Vec<u8> {
    registry
        .new_object("Item")
        .unwrap()
        .set("Id", 7)
        .unwrap()
        .set("Name", "a")
        .unwrap()
        .set("Tag", Value::list([1, 2]))
        .unwrap()
        .encode()
        .unwrap()
}

fn le(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

#[test]
fn test_scenario_exact_layout() {
    let registry = item_registry();
    let bytes = encode_item(&registry);

    let mut expected = Vec::new();
    // Header: total size, binary last index, offsets for indices 0..=5.
    for v in [57, 5, 32, 36, -1, -1, -1, 41] {
        expected.extend_from_slice(&le(v));
    }
    // Fixed region: Id.
    expected.extend_from_slice(&le(7));
    // Name.
    expected.extend_from_slice(&le(1));
    expected.push(b'a');
    // Tag: total size, count, then a fixed-stride element table.
    for v in [16, 2, 1, 2] {
        expected.extend_from_slice(&le(v));
    }

    assert_eq!(bytes, expected);
}

#[test]
fn test_scenario_lazy_read_and_in_place_write() {
    let registry = item_registry();
    let original = encode_item(&registry);

    let mut doc = Segcode::decode(Arc::clone(&registry), "Item", original.clone()).unwrap();
    {
        let item = doc.root().unwrap();
        assert_eq!(item.segment().binary_last_index(), 5);

        // Decoding the object located Tag but did not decode it.
        assert!(!item.is_materialized("Tag").unwrap());
        let tag = item.get("Tag").unwrap();
        assert_eq!(tag.as_list().unwrap(), &[Value::I32(1), Value::I32(2)]);
        assert!(item.is_materialized("Tag").unwrap());

        assert_eq!(*item.get("Id").unwrap(), Value::I32(7));
        assert_eq!(item.get("Name").unwrap().as_str(), Some("a"));
    }

    doc.root_mut().unwrap().set("Id", 8).unwrap();
    // In-place fixed writes need no re-encode.
    assert!(!doc.is_dirty());
    assert!(doc.root().unwrap().can_direct_copy());

    let out = doc.serialize().unwrap();
    assert_eq!(out.len(), original.len());
    assert_eq!(&out[..32], &original[..32]);
    assert_eq!(&out[32..36], &le(8));
    // Name and Tag are byte-identical.
    assert_eq!(&out[36..], &original[36..]);

    let reread = Segcode::decode(registry, "Item", out).unwrap();
    assert_eq!(*reread.root().unwrap().get("Id").unwrap(), Value::I32(8));
}

#[test]
fn test_scenario_by_index_access() {
    let registry = item_registry();
    let doc = Segcode::decode(Arc::clone(&registry), "Item", encode_item(&registry)).unwrap();
    let item = doc.root().unwrap();

    assert_eq!(*item.get(0).unwrap(), Value::I32(7));
    assert_eq!(item.get(1u32).unwrap().as_str(), Some("a"));
    assert!(matches!(
        item.get(2),
        Err(segcode::SegcodeError::UnknownProperty(_))
    ));
    assert!(matches!(
        item.get("Missing"),
        Err(segcode::SegcodeError::UnknownProperty(_))
    ));
}
