//! Round-trip, last-write-wins, tombstone, and reopen-durability coverage
//! for the typed API over a plain-mode store.

use stashdb::{OpenOptions, Registry};
use tempfile::tempdir;

#[test]
fn scalar_roundtrip_every_type() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("scalars").unwrap();

    assert!(store.set_bool("bool", true));
    assert!(store.set_i32("i32", -42));
    assert!(store.set_u32("u32", u32::MAX));
    assert!(store.set_i64("i64", i64::MIN));
    assert!(store.set_u64("u64", u64::MAX));
    assert!(store.set_f32("f32", 1.5));
    assert!(store.set_f64("f64", -2.25));

    assert!(store.get_bool("bool", false));
    assert_eq!(store.get_i32("i32", 0), -42);
    assert_eq!(store.get_u32("u32", 0), u32::MAX);
    assert_eq!(store.get_i64("i64", 0), i64::MIN);
    assert_eq!(store.get_u64("u64", 0), u64::MAX);
    assert_eq!(store.get_f32("f32", 0.0), 1.5);
    assert_eq!(store.get_f64("f64", 0.0), -2.25);
}

#[test]
fn string_bytes_and_list_roundtrip() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("blobs").unwrap();

    assert!(store.set_string("greeting", "hello world"));
    assert!(store.set_bytes("raw", &[0, 1, 2, 254, 255]));
    let list = vec!["one".to_string(), "two".to_string(), "three".to_string()];
    assert!(store.set_string_list("list", &list));

    assert_eq!(store.get_string("greeting").as_deref(), Some("hello world"));
    assert_eq!(store.get_bytes("raw").as_deref(), Some(&[0u8, 1, 2, 254, 255][..]));
    assert_eq!(store.get_string_list("list"), Some(list));
}

#[test]
fn absent_key_returns_default() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("defaults").unwrap();

    assert_eq!(store.get_i32("missing", 7), 7);
    assert!(!store.get_bool("missing", false));
    assert_eq!(store.get_string("missing"), None);
    assert_eq!(store.get_bytes("missing"), None);
    assert!(!store.contains_key("missing"));
}

#[test]
fn present_but_empty_string_is_some() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("empties").unwrap();

    assert!(store.set_string("empty", ""));
    assert!(store.contains_key("empty"));
    assert_eq!(store.get_string("empty"), Some(String::new()));

    assert!(store.set_string_list("empty-list", &[]));
    assert_eq!(store.get_string_list("empty-list"), Some(Vec::new()));
}

#[test]
fn last_write_wins() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("lww").unwrap();

    for value in [1, 22, 333, 4444, -5] {
        assert!(store.set_i32("counter", value));
    }
    assert_eq!(store.get_i32("counter", 0), -5);
    assert_eq!(store.count(), 1);

    assert!(store.set_string("counter", "now a string"));
    assert_eq!(store.get_string("counter").as_deref(), Some("now a string"));
}

#[test]
fn remove_then_get_is_default() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("tombstones").unwrap();

    assert!(store.set_i32("a", 1));
    assert!(store.set_i32("b", 2));
    assert!(store.remove_value_for_key("a"));

    assert_eq!(store.get_i32("a", 0), 0);
    assert_eq!(store.get_i32("b", 0), 2);
    assert!(!store.contains_key("a"));
    assert_eq!(store.all_keys(), vec!["b".to_string()]);
    assert_eq!(store.count(), 1);
}

#[test]
fn tombstone_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("halflife").unwrap();
        store.set_i32("kept", 10);
        store.set_i32("gone", 20);
        store.remove_value_for_key("gone");
    }

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("halflife").unwrap();
    assert_eq!(store.get_i32("kept", 0), 10);
    assert!(!store.contains_key("gone"));
    assert_eq!(store.count(), 1);
}

#[test]
fn durability_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("durable").unwrap();
        store.set_string("name", "alice");
        store.set_i64("stamp", 1_234_567_890_123);
        store.set_bool("flag", true);
    }

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("durable").unwrap();
    assert_eq!(store.get_string("name").as_deref(), Some("alice"));
    assert_eq!(store.get_i64("stamp", 0), 1_234_567_890_123);
    assert!(store.get_bool("flag", false));

    let mut keys = store.all_keys();
    keys.sort();
    assert_eq!(keys, ["flag", "name", "stamp"]);
}

#[test]
fn empty_key_fails_silently() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("nokeys").unwrap();

    assert!(!store.set_i32("", 1));
    assert!(!store.set_string("", "x"));
    assert_eq!(store.get_i32("", 9), 9);
    assert!(!store.contains_key(""));
    assert!(!store.remove_value_for_key(""));
    assert_eq!(store.count(), 0);
}

#[test]
fn type_confusion_returns_default_not_panic() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("confusion").unwrap();

    // a one-byte bool can never decode as a 4-byte float
    store.set_bool("b", true);
    assert_eq!(store.get_f32("b", 3.5), 3.5);
    assert_eq!(store.get_string_list("b"), None);

    // a varint scalar is not valid string framing
    store.set_i32("n", 200);
    assert_eq!(store.get_string("n"), None);
}

#[test]
fn get_value_size_reports_framing() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("sizes").unwrap();

    store.set_string("s", "hello");
    // stored value is varint(5) + 5 bytes
    assert_eq!(store.get_value_size("s", false), 6);
    assert_eq!(store.get_value_size("s", true), 5);

    store.set_i32("n", 42);
    assert_eq!(store.get_value_size("n", false), 1);
    assert_eq!(store.get_value_size("n", true), 1);

    assert_eq!(store.get_value_size("missing", true), 0);
}

#[test]
fn special_character_ids_round_trip() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();

    let store = registry.open_default("user/config:v2").unwrap();
    assert!(store.set_i32("k", 5));
    assert_eq!(store.mmap_id(), "user/config:v2");
    assert!(dir.path().join("specialCharacter").is_dir());
    drop(store);
    registry.close_all();

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("user/config:v2").unwrap();
    assert_eq!(store.get_i32("k", 0), 5);
}

#[test]
fn clear_all_empties_the_store() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("wipe").unwrap();

    for i in 0..20 {
        store.set_i32(&format!("key{i}"), i);
    }
    assert_eq!(store.count(), 20);

    assert!(store.clear_all());
    assert_eq!(store.count(), 0);
    assert_eq!(store.actual_size(), 0);
    assert_eq!(store.get_i32("key3", -1), -1);

    // still usable afterwards
    assert!(store.set_i32("fresh", 1));
    assert_eq!(store.get_i32("fresh", 0), 1);
}

#[test]
fn clear_memory_cache_loses_no_data() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("cache").unwrap();

    store.set_string("k", "v");
    store.clear_memory_cache();
    assert_eq!(store.get_string("k").as_deref(), Some("v"));
    assert_eq!(store.count(), 1);
}

#[test]
fn read_only_store_serves_reads_and_refuses_writes() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("frozen").unwrap();
        store.set_i32("k", 11);
    }

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open(OpenOptions::new("frozen").read_only()).unwrap();
    assert!(store.is_read_only());
    assert_eq!(store.get_i32("k", 0), 11);

    assert!(!store.set_i32("k", 99));
    assert!(!store.remove_value_for_key("k"));
    assert!(!store.clear_all());
    assert_eq!(store.get_i32("k", 0), 11);
}

#[test]
fn read_only_open_of_missing_store_fails() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(dir.path()).unwrap();
    assert!(registry.open(OpenOptions::new("absent").read_only()).is_err());
}
