//! Growth, full write-back, and space-reclamation behavior.

use stashdb::Registry;
use tempfile::tempdir;

#[test]
fn file_grows_and_keeps_everything_readable() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("growth").unwrap();

    let initial_total = store.total_size();
    let payload = "x".repeat(512);

    let mut wrote = 0;
    while store.total_size() == initial_total {
        assert!(store.set_string(&format!("key{wrote}"), &payload));
        wrote += 1;
        assert!(wrote < 10_000, "file never grew");
    }

    for i in 0..wrote {
        assert_eq!(
            store.get_string(&format!("key{i}")).as_deref(),
            Some(payload.as_str()),
            "key{i} lost after growth"
        );
    }
    assert!(store.actual_size() <= store.total_size() - 4);
}

#[test]
fn total_size_never_shrinks_while_appending() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("monotonic").unwrap();

    let payload = "y".repeat(300);
    let mut last_total = store.total_size();
    for i in 0..200 {
        store.set_string(&format!("key{}", i % 7), &payload);
        let total = store.total_size();
        assert!(total >= last_total, "total size shrank without compaction");
        last_total = total;
    }
}

#[test]
fn overwriting_one_key_reclaims_through_compaction() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("single-key").unwrap();

    let payload = "z".repeat(1024);
    for _ in 0..500 {
        assert!(store.set_string("k", &payload));
    }
    // one live record: compaction must keep the file far smaller than the
    // 500 appended versions would need
    assert_eq!(store.get_string("k").as_deref(), Some(payload.as_str()));
    assert_eq!(store.count(), 1);
    assert!(store.total_size() < 500 * 1024);
}

#[test]
fn full_writeback_preserves_semantics() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("semantics").unwrap();

    for i in 0..50 {
        store.set_i32(&format!("n{i}"), i);
    }
    for i in 0..50 {
        if i % 3 == 0 {
            store.remove_value_for_key(&format!("n{i}"));
        }
    }
    for i in 0..50 {
        if i % 5 == 0 && i % 3 != 0 {
            store.set_i32(&format!("n{i}"), i * 100);
        }
    }

    let before: Vec<(String, i32)> = (0..50)
        .map(|i| (format!("n{i}"), store.get_i32(&format!("n{i}"), -1)))
        .collect();
    let size_before = store.actual_size();

    assert!(store.full_writeback());

    for (key, expected) in &before {
        assert_eq!(store.get_i32(key, -1), *expected, "{key} changed across write-back");
    }
    assert!(store.actual_size() <= size_before);
}

#[test]
fn writeback_drops_shadowed_records_and_tombstones() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("reclaim").unwrap();

    store.set_string("keep", "value");
    for _ in 0..100 {
        store.set_string("churn", "version");
    }
    store.remove_value_for_key("churn");

    let before = store.actual_size();
    assert!(store.full_writeback());
    let after = store.actual_size();

    assert!(after < before, "write-back reclaimed nothing: {before} -> {after}");
    assert_eq!(store.get_string("keep").as_deref(), Some("value"));
    assert_eq!(store.count(), 1);
}

#[test]
fn batch_remove_compacts_immediately() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("batch").unwrap();

    for i in 0..10 {
        store.set_string(&format!("key{i}"), &"v".repeat(100));
    }
    let before = store.actual_size();

    let doomed: Vec<String> = (0..8).map(|i| format!("key{i}")).collect();
    assert!(store.remove_values_for_keys(&doomed));

    assert_eq!(store.count(), 2);
    assert!(store.actual_size() < before, "batch remove did not reclaim space");
    assert_eq!(store.get_string("key8").as_deref(), Some(&*"v".repeat(100)));
    assert_eq!(store.get_string("key9").as_deref(), Some(&*"v".repeat(100)));
    assert_eq!(store.get_string("key0"), None);
}

#[test]
fn batch_remove_of_one_key_appends_a_tombstone() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("batch-one").unwrap();

    store.set_i32("a", 1);
    store.set_i32("b", 2);
    let before = store.actual_size();

    assert!(store.remove_values_for_keys(std::slice::from_ref(&"a".to_string())));
    assert!(!store.contains_key("a"));
    // tombstone path appends; no immediate compaction
    assert!(store.actual_size() > before);
}

#[test]
fn batch_remove_of_nothing_is_refused() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("batch-none").unwrap();
    assert!(!store.remove_values_for_keys(&[]));
}

#[test]
fn compacted_store_reopens_identically() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("survivor").unwrap();
        for i in 0..30 {
            store.set_i32(&format!("k{i}"), i * 11);
        }
        store.remove_values_for_keys(&(0..15).map(|i| format!("k{i}")).collect::<Vec<_>>());
    }

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("survivor").unwrap();
    assert_eq!(store.count(), 15);
    for i in 15..30 {
        assert_eq!(store.get_i32(&format!("k{i}"), -1), i * 11);
    }
}
