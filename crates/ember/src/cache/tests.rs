use std::path::Path;

use super::*;
use crate::family::ModelFamily;
use crate::precision::Precision;
use crate::source::{ModelSource, RepoId};

fn demo_key(precision: Precision) -> CacheKey {
    let source = ModelSource::Remote(RepoId::parse("org/demo-model").unwrap());
    CacheKey::new(&source, precision).unwrap()
}

fn stage(store: &CacheStore, key: &CacheKey, name: &str, body: &[u8]) -> std::path::PathBuf {
    let staging = store.create_staging_dir(key).unwrap();
    let path = staging.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_lookup_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    assert!(store.lookup(&demo_key(Precision::Int4), ModelFamily::GptNeox).is_none());
    assert!(store.entries().unwrap().is_empty());
}

#[test]
fn test_promote_then_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let staged = stage(&store, &key, "gptneox-int4.gguf", b"weights");
    let entry = store.promote(&key, ModelFamily::GptNeox, &staged).unwrap();

    assert!(!staged.exists());
    assert_eq!(entry.manifest().size_bytes, 7);
    assert_eq!(entry.manifest().source, "org/demo-model");
    assert_eq!(
        entry.artifact_path(),
        dir.path().join("models--org--demo-model/int4/gptneox-int4.gguf")
    );

    let found = store.lookup(&key, ModelFamily::GptNeox).expect("valid entry");
    assert_eq!(found.artifact_path(), entry.artifact_path());
    assert_eq!(store.entries().unwrap().len(), 1);
}

#[test]
fn test_lookup_rejects_other_family() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let staged = stage(&store, &key, "a.gguf", b"x");
    store.promote(&key, ModelFamily::GptNeox, &staged).unwrap();

    assert!(store.lookup(&key, ModelFamily::Llama).is_none());
}

#[test]
fn test_truncated_artifact_is_stale() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let staged = stage(&store, &key, "a.gguf", b"complete");
    let entry = store.promote(&key, ModelFamily::GptNeox, &staged).unwrap();
    std::fs::write(entry.artifact_path(), b"part").unwrap();

    assert!(store.lookup(&key, ModelFamily::GptNeox).is_none());
}

#[test]
fn test_artifact_without_manifest_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let entry_dir = store.entry_dir(&key);
    std::fs::create_dir_all(&entry_dir).unwrap();
    std::fs::write(entry_dir.join("a.gguf"), b"orphan").unwrap();

    assert!(store.lookup(&key, ModelFamily::GptNeox).is_none());
}

#[test]
fn test_corrupt_manifest_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let entry_dir = store.entry_dir(&key);
    std::fs::create_dir_all(&entry_dir).unwrap();
    std::fs::write(entry_dir.join("a.gguf"), b"x").unwrap();
    std::fs::write(entry_dir.join(MANIFEST_FILE_NAME), b"{ not json").unwrap();

    assert!(store.lookup(&key, ModelFamily::GptNeox).is_none());
}

#[test]
fn test_manifest_from_other_key_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let int4 = demo_key(Precision::Int4);
    let int8 = demo_key(Precision::Int8);

    let staged = stage(&store, &int4, "a.gguf", b"x");
    let entry = store.promote(&int4, ModelFamily::GptNeox, &staged).unwrap();

    // Copy the int4 entry into the int8 slot by hand.
    let int8_dir = store.entry_dir(&int8);
    std::fs::create_dir_all(&int8_dir).unwrap();
    for name in ["a.gguf", MANIFEST_FILE_NAME] {
        std::fs::copy(entry.dir().join(name), int8_dir.join(name)).unwrap();
    }

    assert!(store.lookup(&int8, ModelFamily::GptNeox).is_none());
    assert!(store.lookup(&int4, ModelFamily::GptNeox).is_some());
}

#[test]
fn test_promote_rejects_reserved_names() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    let staged = stage(&store, &key, MANIFEST_FILE_NAME, b"x");
    assert!(store.promote(&key, ModelFamily::GptNeox, &staged).is_err());
}

#[test]
fn test_clear_staging_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let key = demo_key(Precision::Int4);

    store.create_staging_dir(&key).unwrap();
    store.create_staging_dir(&key).unwrap();
    assert_eq!(store.clear_staging(&key).unwrap(), 2);
    assert_eq!(store.clear_staging(&key).unwrap(), 0);

    assert!(store.remove(&key).unwrap());
    assert!(!store.remove(&key).unwrap());
    assert!(!Path::new(&store.entry_dir(&key)).exists());
}
