//! Unit tests for the scope tracking stores.

use canvas_spawn::pane::{FileScopeStore, MemoryScopeStore, ScopeStore, TrackingRecord};
use canvas_spawn::AppError;

fn exercise_store(store: &dyn ScopeStore) {
    assert!(store.get("abc123").expect("get").is_none(), "starts empty");

    store.put("abc123", "%4").expect("put");
    assert_eq!(
        store.get("abc123").expect("get").map(|r| r.pane_id),
        Some("%4".to_owned())
    );

    store.put("abc123", "%9").expect("overwrite");
    assert_eq!(
        store.get("abc123").expect("get").map(|r| r.pane_id),
        Some("%9".to_owned())
    );

    store.put("def456", "%2").expect("put second scope");
    let mut scopes: Vec<String> = store
        .entries()
        .expect("entries")
        .into_iter()
        .map(|(scope, _)| scope)
        .collect();
    scopes.sort();
    assert_eq!(scopes, vec!["abc123".to_owned(), "def456".to_owned()]);

    store.clear("abc123").expect("clear");
    assert!(store.get("abc123").expect("get").is_none());
    store.clear("abc123").expect("clearing twice is a no-op");
}

#[test]
fn memory_store_tracks_records() {
    exercise_store(&MemoryScopeStore::new());
}

#[test]
fn file_store_tracks_records() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path().join("scopes")).expect("open");
    exercise_store(&store);
}

#[test]
fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scopes");

    FileScopeStore::open(&path)
        .expect("open")
        .put("abc123", "%5")
        .expect("put");

    let reopened = FileScopeStore::open(&path).expect("reopen");
    let record = reopened.get("abc123").expect("get").expect("record");
    assert_eq!(record.pane_id, "%5");
}

#[test]
fn file_store_treats_corrupt_record_as_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path()).expect("open");
    std::fs::write(dir.path().join("abc123.json"), "{not json").expect("write");

    assert!(store.get("abc123").expect("get").is_none());
}

#[test]
fn file_store_ignores_foreign_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path()).expect("open");
    std::fs::write(dir.path().join("notes.txt"), "hello").expect("write");
    store.put("abc123", "%1").expect("put");

    let entries = store.entries().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, "abc123");
}

#[test]
fn file_store_rejects_path_like_scopes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path()).expect("open");

    let err = store.put("../escape", "%1").expect_err("must reject");
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("invalid scope")));
}

#[test]
fn file_store_keeps_lease_token() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path()).expect("open");

    store
        .put_record("abc123", &TrackingRecord::new("%3").with_lease("4f1c9a"))
        .expect("put record");
    let record = store.get("abc123").expect("get").expect("record");
    assert_eq!(record.pane_id, "%3");
    assert_eq!(record.lease.as_deref(), Some("4f1c9a"));

    store.put("abc123", "%3").expect("plain put");
    let record = store.get("abc123").expect("get").expect("record");
    assert!(record.lease.is_none(), "plain put drops the lease holder");
}

#[test]
fn record_without_lease_field_still_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileScopeStore::open(dir.path()).expect("open");
    std::fs::write(
        dir.path().join("abc123.json"),
        r#"{"pane_id":"%8","updated_at":"2026-01-15T14:00:00Z"}"#,
    )
    .expect("write");

    let record = store.get("abc123").expect("get").expect("record");
    assert_eq!(record.pane_id, "%8");
    assert!(record.lease.is_none());
}
