// tests/property_tests.rs

#![allow(missing_docs)]

use proptest::prelude::*;
use segcode::{Registry, Segcode, TypeDescriptor, TypeRef, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .add_type(
                TypeDescriptor::new("Record")
                    .property(0, "id", TypeRef::I64)
                    .property(1, "score", TypeRef::nullable(TypeRef::F64))
                    .property(2, "name", TypeRef::String)
                    .cached_property(3, "tags", TypeRef::list(TypeRef::I32))
                    .property(4, "data", TypeRef::Bytes)
                    .cached_property(5, "counts", TypeRef::dictionary(TypeRef::String, TypeRef::U16)),
            )
            .build()
            .unwrap(),
    )
}

#[derive(Debug, Clone)]
struct Record {
    id: i64,
    score: Option<f64>,
    name: String,
    tags: Vec<i32>,
    data: Vec<u8>,
    counts: BTreeMap<String, u16>,
}

fn record() -> impl Strategy<Value = Record> {
    (
        any::<i64>(),
        proptest::option::of(-1.0e9f64..1.0e9),
        "[a-zA-Z0-9 ]{0,24}",
        proptest::collection::vec(any::<i32>(), 0..32),
        proptest::collection::vec(any::<u8>(), 0..64),
        proptest::collection::btree_map("[a-z]{1,8}", any::<u16>(), 0..8),
    )
        .prop_map(|(id, score, name, tags, data, counts)| Record {
            id,
            score,
            name,
            tags,
            data,
            counts,
        })
}

fn counts_value(counts: &BTreeMap<String, u16>) -> Value {
    Value::Dict(
        counts
            .iter()
            .map(|(k, v)| (Value::from(k.as_str()), Value::U16(*v)))
            .collect(),
    )
}

fn encode(registry: &Registry, r: &Record) -> Vec<u8> {
    registry
        .new_object("Record")
        .unwrap()
        .set("id", r.id)
        .unwrap()
        .set("score", r.score)
        .unwrap()
        .set("name", r.name.as_str())
        .unwrap()
        .set("tags", Value::list(r.tags.iter().copied()))
        .unwrap()
        .set("data", r.data.clone())
        .unwrap()
        .set("counts", counts_value(&r.counts))
        .unwrap()
        .encode()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_untouched_documents_copy_verbatim(r in record()) {
        let registry = registry();
        let bytes = encode(&registry, &r);
        let doc = Segcode::decode(Arc::clone(&registry), "Record", bytes.clone()).unwrap();
        let root = doc.root().unwrap();

        let id = root.get("id").unwrap();
        let score = root.get("score").unwrap();
        let name = root.get("name").unwrap();
        let tags = root.get("tags").unwrap();
        let data = root.get("data").unwrap();
        let counts = root.get("counts").unwrap();
        prop_assert_eq!(&*id, &Value::I64(r.id));
        prop_assert_eq!(&*score, &Value::from(r.score));
        prop_assert_eq!(name.as_str(), Some(r.name.as_str()));
        prop_assert_eq!(&*tags, &Value::list(r.tags.iter().copied()));
        prop_assert_eq!(data.as_bytes(), Some(r.data.as_slice()));
        prop_assert_eq!(&*counts, &counts_value(&r.counts));

        prop_assert_eq!(doc.serialize().unwrap(), bytes);
    }

    #[test]
    fn prop_edits_match_a_fresh_encoding(r in record(), name in "[a-z]{0,40}", id in any::<i64>()) {
        let registry = registry();
        let mut doc = Segcode::decode(Arc::clone(&registry), "Record", encode(&registry, &r)).unwrap();
        {
            let mut root = doc.root_mut().unwrap();
            root.set("id", id).unwrap();
            root.set("name", name.as_str()).unwrap();
        }

        let expected = Record { id, name, ..r };
        prop_assert_eq!(doc.serialize().unwrap(), encode(&registry, &expected));
    }

    #[test]
    fn prop_arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let registry = registry();
        if let Ok(doc) = Segcode::decode(Arc::clone(&registry), "Record", bytes.clone()) {
            if let Some(root) = doc.root() {
                for name in ["id", "score", "name", "tags", "data", "counts"] {
                    let _ = root.get(name);
                }
            }
            let _ = doc.serialize();
        }
        let validated = Segcode::builder()
            .validate(true)
            .decode(Arc::clone(&registry), "Record", bytes);
        if let Ok(doc) = validated {
            // Everything reachable was checked up front.
            if let Some(root) = doc.root() {
                for name in ["name", "tags", "data", "counts"] {
                    prop_assert!(root.get(name).is_ok());
                }
            }
        }
    }
}
