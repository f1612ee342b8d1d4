// tests/file_tests.rs

#![allow(missing_docs)]

use segcode::{Registry, Result, Segcode, SegcodeError, TypeDescriptor, TypeRef, Value};
use std::fs;
use std::sync::Arc;
use tempfile::{NamedTempFile, tempdir};

fn registry() -> Arc<Registry> {
    Arc::new(
        Registry::builder()
            .add_type(
                TypeDescriptor::new("Level")
                    .property(0, "id", TypeRef::U32)
                    .property(1, "name", TypeRef::String)
                    .cached_property(2, "heights", TypeRef::list(TypeRef::F32)),
            )
            .build()
            .unwrap(),
    )
}

fn level_bytes(registry: &Registry) -> Result<Vec<u8>> {
    registry
        .new_object("Level")?
        .set("id", 42u32)?
        .set("name", "caves")?
        .set("heights", Value::list((0..256).map(|i| i as f32 * 0.25)))?
        .encode()
}

#[test]
fn test_open_reads_lazily_from_the_mapping() -> Result<()> {
    let registry = registry();
    let bytes = level_bytes(&registry)?;
    let file = NamedTempFile::new()?;
    fs::write(file.path(), &bytes)?;

    let doc = Segcode::open(Arc::clone(&registry), "Level", file.path())?;
    let level = doc.root().unwrap();
    assert_eq!(*level.get("id")?, Value::U32(42));
    assert_eq!(level.get("name")?.as_str(), Some("caves"));
    assert_eq!(level.sequence("heights")?.unwrap().get(8)?, Value::F32(2.0));
    assert_eq!(doc.serialize()?, bytes);
    Ok(())
}

#[test]
fn test_writes_stay_in_the_mapping_until_saved() -> Result<()> {
    let registry = registry();
    let bytes = level_bytes(&registry)?;
    let dir = tempdir()?;
    let source = dir.path().join("level.seg");
    let target = dir.path().join("level-edited.seg");
    fs::write(&source, &bytes)?;

    let mut doc = Segcode::open(Arc::clone(&registry), "Level", &source)?;
    {
        let mut level = doc.root_mut().unwrap();
        level.set("id", 7u32)?;
        level.set("name", "tunnels")?;
    }
    assert!(doc.is_dirty());

    // The mapping is private: the file still holds the original bytes.
    assert_eq!(fs::read(&source)?, bytes);

    doc.save(&target)?;
    let reopened = Segcode::open(Arc::clone(&registry), "Level", &target)?;
    let level = reopened.root().unwrap();
    assert_eq!(*level.get("id")?, Value::U32(7));
    assert_eq!(level.get("name")?.as_str(), Some("tunnels"));
    assert_eq!(level.get("heights")?.as_list().map(<[Value]>::len), Some(256));
    Ok(())
}

#[test]
fn test_open_with_validation() -> Result<()> {
    let registry = registry();
    let mut bytes = level_bytes(&registry)?;
    let file = NamedTempFile::new()?;
    fs::write(file.path(), &bytes)?;
    Segcode::builder()
        .validate(true)
        .open(Arc::clone(&registry), "Level", file.path())?;

    // Corrupt the string length.
    let name_at = 8 + 3 * 4 + 4;
    bytes[name_at..name_at + 4].copy_from_slice(&(-3i32).to_le_bytes());
    fs::write(file.path(), &bytes)?;
    let err = Segcode::builder()
        .validate(true)
        .open(Arc::clone(&registry), "Level", file.path())
        .unwrap_err();
    assert!(matches!(err, SegcodeError::Format(_)), "{err}");
    Ok(())
}

#[test]
fn test_missing_and_empty_files() {
    let registry = registry();
    let dir = tempdir().unwrap();

    let err = Segcode::open(Arc::clone(&registry), "Level", dir.path().join("nope.seg")).unwrap_err();
    assert!(matches!(err, SegcodeError::Io(_)));

    let empty = dir.path().join("empty.seg");
    fs::write(&empty, []).unwrap();
    assert!(Segcode::open(Arc::clone(&registry), "Level", &empty).is_err());
}
