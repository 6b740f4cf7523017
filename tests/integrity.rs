//! Corruption handling: CRC tamper detection, file-length errors, and the
//! recovery policies the error handler can pick.

use std::fs::OpenOptions as FsOpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stashdb::{ErrorKind, RecoverStrategy, Registry};
use tempfile::tempdir;

fn flip_byte(path: &std::path::Path, offset: u64) {
    let mut file = FsOpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    let mut byte = [0u8; 1];
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0x01;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}

fn overwrite_u32(path: &std::path::Path, offset: u64, value: u32) {
    let mut file = FsOpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&value.to_le_bytes()).unwrap();
}

#[test]
fn tampered_payload_fires_the_crc_handler() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("tampered").unwrap();
        store.set_string("k", "v1");
    }
    flip_byte(&dir.path().join("tampered"), 4);

    let fired = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new(dir.path()).unwrap();
    {
        let fired = Arc::clone(&fired);
        registry.set_error_handler(Box::new(move |mmap_id, kind| {
            assert_eq!(mmap_id, "tampered");
            assert_eq!(kind, ErrorKind::CrcCheckFail);
            fired.fetch_add(1, Ordering::SeqCst);
            RecoverStrategy::Discard
        }));
    }

    let store = registry.open_default("tampered").unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(store.count(), 0);
}

#[test]
fn discard_leaves_a_usable_empty_store() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("reset").unwrap();
        store.set_i32("k", 1);
    }
    flip_byte(&dir.path().join("reset"), 4);

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("reset").unwrap();

    // default policy discards; the store must be writable again
    assert_eq!(store.count(), 0);
    assert!(store.set_i32("k", 2));
    assert_eq!(store.get_i32("k", 0), 2);
}

#[test]
fn keep_strategy_preserves_the_parseable_prefix() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("partial").unwrap();
        store.set_i32("k", 1);
    }
    flip_byte(&dir.path().join("partial"), 4);

    let registry = Registry::new(dir.path()).unwrap();
    registry.set_error_handler(Box::new(|_, _| RecoverStrategy::KeepSameAsOld));
    let store = registry.open_default("partial").unwrap();

    assert!(store.count() <= 1);
    // recovered state is consistent: follow-up writes and reads work
    assert!(store.set_i32("fresh", 9));
    assert_eq!(store.get_i32("fresh", 0), 9);
}

#[test]
fn keep_strategy_retains_records_before_the_corruption() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("prefix").unwrap();
        store.set_string("first", "intact");
        store.set_string("second", "doomed");
    }
    // first record: varint(5) "first" varint(7) varint(6) "intact" = 14 bytes
    // corrupt a byte inside the second record; the first must stay readable
    flip_byte(&dir.path().join("prefix"), 4 + 15);

    let registry = Registry::new(dir.path()).unwrap();
    registry.set_error_handler(Box::new(|_, _| RecoverStrategy::KeepSameAsOld));
    let store = registry.open_default("prefix").unwrap();

    assert_eq!(store.get_string("first").as_deref(), Some("intact"));
    assert!(store.count() >= 1);
}

#[test]
fn oversized_length_prefix_fires_the_length_handler() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("lied").unwrap();
        store.set_i32("a", 1);
        store.set_i32("b", 2);
    }
    overwrite_u32(&dir.path().join("lied"), 0, u32::MAX - 16);

    let fired = Arc::new(AtomicUsize::new(0));
    let registry = Registry::new(dir.path()).unwrap();
    {
        let fired = Arc::clone(&fired);
        registry.set_error_handler(Box::new(move |_, kind| {
            assert_eq!(kind, ErrorKind::FileLengthError);
            fired.fetch_add(1, Ordering::SeqCst);
            RecoverStrategy::Discard
        }));
    }

    let store = registry.open_default("lied").unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(store.count(), 0);
}

#[test]
fn length_error_with_keep_strategy_recovers_the_records() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("clamped").unwrap();
        store.set_i32("a", 1);
        store.set_i32("b", 2);
    }
    overwrite_u32(&dir.path().join("clamped"), 0, u32::MAX - 16);

    let registry = Registry::new(dir.path()).unwrap();
    registry.set_error_handler(Box::new(|_, _| RecoverStrategy::KeepSameAsOld));
    let store = registry.open_default("clamped").unwrap();

    // the prefix that parses is exactly the two original records
    assert_eq!(store.count(), 2);
    assert_eq!(store.get_i32("a", 0), 1);
    assert_eq!(store.get_i32("b", 0), 2);
}

#[test]
fn recovery_rewrites_a_consistent_file() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("healed").unwrap();
        store.set_string("first", "intact");
        store.set_string("second", "doomed");
    }
    flip_byte(&dir.path().join("healed"), 4 + 15);

    {
        let registry = Registry::new(dir.path()).unwrap();
        registry.set_error_handler(Box::new(|_, _| RecoverStrategy::KeepSameAsOld));
        let store = registry.open_default("healed").unwrap();
        assert_eq!(store.get_string("first").as_deref(), Some("intact"));
    }

    // after recovery's write-back, a reopen with the default (discard)
    // policy must find a clean file and keep the survivors
    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("healed").unwrap();
    assert_eq!(store.get_string("first").as_deref(), Some("intact"));
}

#[test]
fn tampering_the_meta_file_is_survivable() {
    let dir = tempdir().unwrap();
    {
        let registry = Registry::new(dir.path()).unwrap();
        let store = registry.open_default("meta-tamper").unwrap();
        store.set_i32("k", 1);
    }
    // corrupt the stored crc digest
    flip_byte(&dir.path().join("meta-tamper.crc"), 0);

    let registry = Registry::new(dir.path()).unwrap();
    let store = registry.open_default("meta-tamper").unwrap();
    // default policy discards; no crash either way
    assert!(store.count() <= 1);
    assert!(store.set_i32("k2", 2));
    assert_eq!(store.get_i32("k2", 0), 2);
}
