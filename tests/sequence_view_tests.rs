// tests/sequence_view_tests.rs

#![allow(missing_docs)]

use segcode::{Registry, Result, Segcode, SegcodeError, TypeDescriptor, TypeRef, Value};
use std::sync::Arc;

fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .add_type(
                TypeDescriptor::new("User")
                    .property(0, "id", TypeRef::U64)
                    .property(1, "name", TypeRef::String),
            )
            .add_type(
                TypeDescriptor::new("Db")
                    .cached_property(0, "ids", TypeRef::list(TypeRef::I64))
                    .cached_property(1, "names", TypeRef::list(TypeRef::String))
                    .cached_property(2, "users", TypeRef::list(TypeRef::object("User")))
                    .cached_property(
                        3,
                        "by_name",
                        TypeRef::dictionary(TypeRef::String, TypeRef::object("User")),
                    )
                    .cached_property(4, "grid", TypeRef::dictionary(TypeRef::I32, TypeRef::F64))
                    .cached_property(5, "groups", TypeRef::lookup(TypeRef::String, TypeRef::I32))
                    .cached_property(
                        6,
                        "pair",
                        TypeRef::key_tuple(vec![TypeRef::String, TypeRef::I32]),
                    )
                    .property(7, "plain", TypeRef::list(TypeRef::I32)),
            )
            .build()
            .unwrap(),
    )
}

const USERS: u64 = 1_000;

fn encode_db(registry: &Registry) -> Result<Vec<u8>> {
    let user = |i: u64| -> Result<Value> {
        Ok(registry
            .new_object("User")?
            .set("id", i)?
            .set("name", format!("user-{i}"))?
            .build()
            .into())
    };
    let users = (0..USERS).map(&user).collect::<Result<Vec<_>>>()?;
    let by_name = (0..10)
        .map(|i| -> Result<(Value, Value)> { Ok((Value::from(format!("user-{i}")), user(i)?)) })
        .collect::<Result<Vec<_>>>()?;

    registry
        .new_object("Db")?
        .set("ids", Value::list((0..USERS).map(|i| i as i64 * 10)))?
        .set("names", Value::list(["ann", "bob", "cyd"]))?
        .set("users", users)?
        .set("by_name", Value::Dict(by_name))?
        .set(
            "grid",
            Value::Dict(vec![(Value::I32(1), Value::F64(0.5)), (Value::I32(2), Value::F64(1.5))]),
        )?
        .set(
            "groups",
            Value::Lookup(vec![
                ("even".into(), vec![Value::I32(0), Value::I32(2)]),
                ("odd".into(), vec![Value::I32(1)]),
            ]),
        )?
        .set("pair", Value::Tuple(vec!["k".into(), Value::I32(5)]))?
        .set("plain", Value::list([1, 2, 3]))?
        .encode()
}

#[test]
fn test_index_access_without_materializing() -> Result<()> {
    let registry = registry();
    let doc = Segcode::decode(Arc::clone(&registry), "Db", encode_db(&registry)?)?;
    let db = doc.root().unwrap();

    let ids = db.sequence("ids")?.unwrap();
    assert_eq!(ids.len(), USERS as usize);
    assert_eq!(ids.get(0)?, Value::I64(0));
    assert_eq!(ids.get(999)?, Value::I64(9_990));
    assert!(matches!(ids.get(USERS as usize), Err(SegcodeError::Format(_))));

    let names = db.sequence("names")?.unwrap();
    assert_eq!(names.get(1)?, Value::from("bob"));

    let users = db.sequence("users")?.unwrap();
    let user = users.get(777)?;
    let user = user.as_object().unwrap();
    assert_eq!(*user.get(&registry, doc.buffer(), "id")?, Value::U64(777));
    assert_eq!(
        user.get(&registry, doc.buffer(), "name")?.as_str(),
        Some("user-777")
    );

    // Views read bytes in place; the caches stay untouched.
    assert!(!db.is_materialized("ids")?);
    assert!(!db.is_materialized("users")?);
    Ok(())
}

#[test]
fn test_dictionary_and_lookup_find() -> Result<()> {
    let registry = registry();
    let doc = Segcode::decode(Arc::clone(&registry), "Db", encode_db(&registry)?)?;
    let db = doc.root().unwrap();

    let by_name = db.sequence("by_name")?.unwrap();
    assert_eq!(by_name.len(), 10);
    let found = by_name.find(&"user-4".into())?.unwrap();
    let found = found.as_object().unwrap();
    assert_eq!(*found.get(&registry, doc.buffer(), "id")?, Value::U64(4));
    assert!(by_name.find(&"nobody".into())?.is_none());

    let grid = db.sequence("grid")?.unwrap();
    assert_eq!(grid.encoded_len(), 8 + 2 * (4 + 8));
    assert_eq!(grid.find(&Value::I32(2))?, Some(Value::F64(1.5)));
    assert_eq!(
        grid.get(0)?,
        Value::Tuple(vec![Value::I32(1), Value::F64(0.5)])
    );

    let groups = db.sequence("groups")?.unwrap();
    assert_eq!(
        groups.find(&"even".into())?,
        Some(Value::list([0, 2]))
    );
    assert_eq!(
        groups.get(1)?,
        Value::Tuple(vec!["odd".into(), Value::list([1])])
    );

    let pair = db.sequence("pair")?.unwrap();
    assert_eq!(pair.len(), 2);
    assert_eq!(pair.get(1)?, Value::I32(5));
    assert!(matches!(
        pair.find(&Value::I32(5)),
        Err(SegcodeError::TypeMismatch { .. })
    ));
    Ok(())
}

#[test]
fn test_views_need_clean_cached_bytes() -> Result<()> {
    let registry = registry();
    let mut doc = Segcode::decode(Arc::clone(&registry), "Db", encode_db(&registry)?)?;

    assert!(matches!(
        doc.root().unwrap().sequence("plain"),
        Err(SegcodeError::TypeMismatch { .. })
    ));

    doc.root_mut()
        .unwrap()
        .set("names", Value::list(["zed"]))?;
    let db = doc.root().unwrap();
    assert!(db.sequence("names")?.is_none());
    assert_eq!(*db.get("names")?, Value::list(["zed"]));
    // Other containers are still viewable.
    assert_eq!(db.sequence("ids")?.unwrap().len(), USERS as usize);
    Ok(())
}
