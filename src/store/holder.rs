//! # In-Memory Index
//!
//! The index projects the append-only log into a key → value-location map.
//! It is rebuilt on every load, updated on every append, and dropped by
//! `clear_memory_cache`; nothing in it is authoritative beyond the lifetime
//! of the current mapping.
//!
//! A holder references the record's value bytes inside the mapping by
//! absolute file offset. Crypt-mode holders additionally carry the cipher
//! state snapshotted at the byte preceding the value, which is what makes a
//! point read O(value) instead of O(payload) in crypt mode.

use hashbrown::HashMap;

use crate::crypto::AesStatus;

/// Location of one key's committed value inside the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValueHolder {
    /// Absolute file offset of the first value byte.
    pub offset: u32,
    /// Length of the value byte run.
    pub value_size: u32,
    /// Cipher state at the byte preceding the value; `None` in plain mode.
    pub crypt_status: Option<AesStatus>,
}

impl KeyValueHolder {
    pub fn new(offset: u32, value_size: u32, crypt_status: Option<AesStatus>) -> Self {
        Self {
            offset,
            value_size,
            crypt_status,
        }
    }
}

/// Key equality is exact byte equality; insertion order is insignificant.
pub type Index = HashMap<String, KeyValueHolder>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_insert_shadows_earlier() {
        let mut index = Index::default();
        index.insert("k".to_string(), KeyValueHolder::new(4, 10, None));
        index.insert("k".to_string(), KeyValueHolder::new(24, 3, None));

        let holder = &index["k"];
        assert_eq!(holder.offset, 24);
        assert_eq!(holder.value_size, 3);
        assert_eq!(index.len(), 1);
    }
}
