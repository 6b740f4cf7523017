//! # Store
//!
//! The engine's public face: a typed key–value API over one memory-mapped
//! data file and its `.crc` meta sibling. Writes append length-prefixed
//! records to the mapping and commit through the meta file; reads resolve
//! the key in the in-memory index and decode straight out of the mapping.
//!
//! ## Lock Hierarchy
//!
//! Acquire in this order, release in reverse:
//!
//! 1. the registry mutex (only when touching the registry)
//! 2. the instance mutex wrapping [`StoreInner`]
//! 3. the shared or exclusive inter-process lock on the meta file
//!
//! Every public method takes the instance mutex first; the engine paths in
//! [`io`] take the file lock where they touch the files. Blocking calls
//! have no timeout and cannot be cancelled.
//!
//! ## Failure Contract
//!
//! Mutating calls return `bool`; queries return the caller's default (or
//! `None`). The underlying error chain is logged, never thrown — a store
//! whose disk is failing degrades to refusing writes while reads keep
//! serving the last consistent in-memory state.

pub mod holder;
mod io;
mod registry;

pub use registry::Registry;

use std::path::Path;
use std::sync::Arc;

use eyre::Result;
use log::{error, warn};
use parking_lot::Mutex;

use crate::config::{OpenOptions, ProcessMode, SyncFlag};
use crate::crypto::AesCfb;
use crate::encoding::coded::{
    self, encode_bool, encode_data, encode_f32, encode_f64, encode_i32, encode_i64,
    encode_string_list, encode_u32, encode_u64,
};
use crate::encoding::varint::varint_len;
use crate::encoding::CodedInput;
use crate::paths;
use crate::storage::{FileLock, LockType, MemoryFile, MetaInfo};
use crate::store::holder::Index;
use crate::store::registry::Handlers;

/// Everything guarded by the instance mutex.
pub(crate) struct StoreInner {
    pub(crate) mmap_id: String,
    pub(crate) file: MemoryFile,
    pub(crate) meta_file: MemoryFile,
    pub(crate) meta_info: MetaInfo,
    pub(crate) crypter: Option<AesCfb>,
    pub(crate) dic: Index,
    pub(crate) file_lock: FileLock,
    pub(crate) actual_size: usize,
    pub(crate) crc_digest: u32,
    pub(crate) need_load_from_file: bool,
    pub(crate) has_full_writeback: bool,
    pub(crate) read_only: bool,
    pub(crate) handlers: Arc<Handlers>,
}

/// One open store instance. Obtained from [`Registry::open`]; the registry
/// hands out the same `Arc<Store>` for the same identity, so its locks are
/// shared by everyone who opened it.
pub struct Store {
    mmap_id: String,
    mmap_key: String,
    mode: ProcessMode,
    read_only: bool,
    inner: Mutex<StoreInner>,
}

impl Store {
    pub(crate) fn open(
        options: OpenOptions,
        root_dir: &Path,
        handlers: Arc<Handlers>,
    ) -> Result<Self> {
        let mmap_id = options.mmap_id.clone();
        let mmap_key = options.mmap_key(root_dir);
        let relative_path = options.relative_path.as_deref();

        let data_path = paths::data_path(&mmap_id, root_dir, relative_path);
        let meta_path = paths::meta_path(&mmap_id, root_dir, relative_path);
        if !options.read_only {
            paths::prepare_parent_dir(&data_path)?;
        }

        let file = MemoryFile::open(&data_path, options.read_only)?;
        let meta_file = MemoryFile::open(&meta_path, options.read_only)?;
        let file_lock = FileLock::new(meta_file.fd(), options.mode == ProcessMode::MultiProcess);
        let crypter = options.crypt_key.as_deref().map(AesCfb::new);

        let mut inner = StoreInner {
            mmap_id: mmap_id.clone(),
            file,
            meta_file,
            meta_info: MetaInfo::default(),
            crypter,
            dic: Index::default(),
            file_lock,
            actual_size: 0,
            crc_digest: 0,
            need_load_from_file: true,
            has_full_writeback: false,
            read_only: options.read_only,
            handlers,
        };
        inner.with_file_lock(LockType::Shared, |inner| inner.load_from_file())?;

        Ok(Self {
            mmap_id,
            mmap_key,
            mode: options.mode,
            read_only: options.read_only,
            inner: Mutex::new(inner),
        })
    }

    pub fn mmap_id(&self) -> &str {
        &self.mmap_id
    }

    pub(crate) fn mmap_key(&self) -> &str {
        &self.mmap_key
    }

    pub fn is_multi_process(&self) -> bool {
        self.mode == ProcessMode::MultiProcess
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_file_valid(&self) -> bool {
        self.inner.lock().file.is_file_valid()
    }

    // ------------------------------------------------------------------
    // set
    // ------------------------------------------------------------------

    fn set_encoded(&self, key: &str, value: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock();
        match inner.set_data_for_key(value, key) {
            Ok(()) => true,
            Err(err) => {
                error!("[{}] set '{}' failed: {:#}", self.mmap_id, key, err);
                false
            }
        }
    }

    pub fn set_bool(&self, key: &str, value: bool) -> bool {
        self.set_encoded(key, &encode_bool(value))
    }

    pub fn set_i32(&self, key: &str, value: i32) -> bool {
        self.set_encoded(key, &encode_i32(value))
    }

    pub fn set_u32(&self, key: &str, value: u32) -> bool {
        self.set_encoded(key, &encode_u32(value))
    }

    pub fn set_i64(&self, key: &str, value: i64) -> bool {
        self.set_encoded(key, &encode_i64(value))
    }

    pub fn set_u64(&self, key: &str, value: u64) -> bool {
        self.set_encoded(key, &encode_u64(value))
    }

    pub fn set_f32(&self, key: &str, value: f32) -> bool {
        self.set_encoded(key, &encode_f32(value))
    }

    pub fn set_f64(&self, key: &str, value: f64) -> bool {
        self.set_encoded(key, &encode_f64(value))
    }

    pub fn set_string(&self, key: &str, value: &str) -> bool {
        self.set_encoded(key, &encode_data(value.as_bytes()))
    }

    pub fn set_bytes(&self, key: &str, value: &[u8]) -> bool {
        self.set_encoded(key, &encode_data(value))
    }

    pub fn set_string_list(&self, key: &str, value: &[String]) -> bool {
        self.set_encoded(key, &encode_data(&encode_string_list(value)))
    }

    // ------------------------------------------------------------------
    // get
    // ------------------------------------------------------------------

    fn decode_scalar<T>(
        &self,
        key: &str,
        default: T,
        read: impl FnOnce(&mut CodedInput) -> Result<T>,
    ) -> T {
        if key.is_empty() {
            return default;
        }
        let mut inner = self.inner.lock();
        match inner.get_data_for_key(key) {
            Ok(Some(data)) if !data.is_empty() => {
                let mut input = CodedInput::new(&data);
                match read(&mut input) {
                    Ok(value) => value,
                    Err(err) => {
                        error!("[{}] decode '{}' failed: {:#}", self.mmap_id, key, err);
                        default
                    }
                }
            }
            Ok(_) => default,
            Err(err) => {
                error!("[{}] get '{}' failed: {:#}", self.mmap_id, key, err);
                default
            }
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.decode_scalar(key, default, |input| input.read_bool())
    }

    pub fn get_i32(&self, key: &str, default: i32) -> i32 {
        self.decode_scalar(key, default, |input| input.read_i32())
    }

    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.decode_scalar(key, default, |input| input.read_u32())
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.decode_scalar(key, default, |input| input.read_i64())
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.decode_scalar(key, default, |input| input.read_u64())
    }

    pub fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.decode_scalar(key, default, |input| input.read_f32())
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.decode_scalar(key, default, |input| input.read_f64())
    }

    fn get_decoded<T>(&self, key: &str, read: impl FnOnce(&mut CodedInput) -> Result<T>) -> Option<T> {
        if key.is_empty() {
            return None;
        }
        let mut inner = self.inner.lock();
        match inner.get_data_for_key(key) {
            Ok(Some(data)) if !data.is_empty() => {
                let mut input = CodedInput::new(&data);
                match read(&mut input) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        error!("[{}] decode '{}' failed: {:#}", self.mmap_id, key, err);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(err) => {
                error!("[{}] get '{}' failed: {:#}", self.mmap_id, key, err);
                None
            }
        }
    }

    /// An absent key is `None`; a present key holding an empty string is
    /// `Some("")`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_decoded(key, |input| input.read_string())
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.get_decoded(key, |input| input.read_data().map(<[u8]>::to_vec))
    }

    pub fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.get_decoded(key, |input| {
            let items = input.read_data()?;
            coded::decode_string_list(items)
        })
    }

    /// Size of the stored value bytes. With `actual`, data-holder values
    /// report their unwrapped payload length when the framing matches.
    pub fn get_value_size(&self, key: &str, actual: bool) -> usize {
        if key.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        match inner.get_data_for_key(key) {
            Ok(Some(data)) => {
                if actual {
                    let mut input = CodedInput::new(&data);
                    if let Ok(len) = input.read_raw_varint() {
                        let len = len as usize;
                        if varint_len(len as u64) + len == data.len() {
                            return len;
                        }
                    }
                }
                data.len()
            }
            Ok(None) => 0,
            Err(err) => {
                error!("[{}] get '{}' failed: {:#}", self.mmap_id, key, err);
                0
            }
        }
    }

    // ------------------------------------------------------------------
    // enumeration
    // ------------------------------------------------------------------

    fn refreshed<R>(&self, f: impl FnOnce(&StoreInner) -> R) -> R {
        let mut inner = self.inner.lock();
        if let Err(err) = inner.check_load_data() {
            warn!("[{}] refresh failed: {:#}", self.mmap_id, err);
        }
        f(&inner)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        self.refreshed(|inner| inner.dic.contains_key(key))
    }

    pub fn count(&self) -> usize {
        self.refreshed(|inner| inner.dic.len())
    }

    /// Size of the data file, mapping included.
    pub fn total_size(&self) -> usize {
        self.refreshed(|inner| inner.file.file_size())
    }

    /// Committed payload bytes, shadowed records and tombstones included.
    pub fn actual_size(&self) -> usize {
        self.refreshed(|inner| inner.actual_size)
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.refreshed(|inner| inner.dic.keys().cloned().collect())
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    /// Appends a tombstone for `key`. Space comes back on the next
    /// compaction.
    pub fn remove_value_for_key(&self, key: &str) -> bool {
        self.set_encoded(key, &[])
    }

    /// Removes a batch of keys and compacts immediately. A single-element
    /// batch degrades to the tombstone path.
    pub fn remove_values_for_keys(&self, keys: &[String]) -> bool {
        match keys {
            [] => false,
            [key] => self.remove_value_for_key(key),
            _ => {
                let mut inner = self.inner.lock();
                match inner.remove_values_for_keys(keys) {
                    Ok(_) => true,
                    Err(err) => {
                        error!("[{}] batch remove failed: {:#}", self.mmap_id, err);
                        false
                    }
                }
            }
        }
    }

    /// Empties the store and signals peers to reload.
    pub fn clear_all(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.clear_all() {
            Ok(()) => true,
            Err(err) => {
                error!("[{}] clear_all failed: {:#}", self.mmap_id, err);
                false
            }
        }
    }

    /// Drops the in-memory index and mapping; the next operation reloads
    /// from disk. No data is lost.
    pub fn clear_memory_cache(&self) {
        self.inner.lock().clear_memory_cache();
    }

    // ------------------------------------------------------------------
    // maintenance
    // ------------------------------------------------------------------

    /// Rewrites the payload from the live index, reclaiming the space held
    /// by shadowed records and tombstones.
    pub fn full_writeback(&self) -> bool {
        let mut inner = self.inner.lock();
        let result = inner.with_file_lock(LockType::Exclusive, |inner| {
            inner.check_load_data()?;
            inner.full_writeback()
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                error!("[{}] full write-back failed: {:#}", self.mmap_id, err);
                false
            }
        }
    }

    /// Flushes both files' pages to disk.
    pub fn sync(&self, flag: SyncFlag) {
        let mut inner = self.inner.lock();
        if inner.need_load_from_file || !inner.file.is_file_valid() {
            return;
        }
        let result = inner.with_file_lock(LockType::Exclusive, |inner| {
            inner.file.msync(flag)?;
            inner.meta_file.msync(flag)
        });
        if let Err(err) = result {
            error!("[{}] sync failed: {:#}", self.mmap_id, err);
        }
    }

    /// Forces a cross-process freshness check right now.
    pub fn check_content_changed(&self) {
        let mut inner = self.inner.lock();
        if let Err(err) = inner.check_load_data() {
            warn!("[{}] content check failed: {:#}", self.mmap_id, err);
        }
    }

    // ------------------------------------------------------------------
    // inter-process lock passthrough
    // ------------------------------------------------------------------

    /// Takes the exclusive inter-process lock and holds it until
    /// [`Store::unlock`]. Re-entrant within the process.
    pub fn lock(&self) {
        self.inner.lock().file_lock.lock(LockType::Exclusive);
    }

    pub fn unlock(&self) {
        self.inner.lock().file_lock.unlock(LockType::Exclusive);
    }

    pub fn try_lock(&self) -> bool {
        self.inner.lock().file_lock.try_lock(LockType::Exclusive)
    }

    // ------------------------------------------------------------------
    // crypt key
    // ------------------------------------------------------------------

    /// The current crypt key as a string, empty for plain stores.
    pub fn crypt_key(&self) -> String {
        let inner = self.inner.lock();
        match &inner.crypter {
            Some(crypter) => {
                let key = crypter.key();
                let len = key.iter().position(|&b| b == 0).unwrap_or(key.len());
                String::from_utf8_lossy(&key[..len]).into_owned()
            }
            None => String::new(),
        }
    }

    /// Compares against the current key and, on any change, transitions
    /// the store (plain ↔ crypt, or key rotation) by re-encrypting the
    /// whole payload. `None` or an empty key means plain mode.
    pub fn check_reset_crypt_key(&self, new_key: Option<&str>) -> bool {
        let key = new_key.map(str::as_bytes).filter(|key| !key.is_empty());
        let mut inner = self.inner.lock();
        match inner.re_key(key) {
            Ok(()) => true,
            Err(err) => {
                error!("[{}] crypt key change failed: {:#}", self.mmap_id, err);
                false
            }
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        let inner = self.inner.lock();
        if !inner.need_load_from_file && inner.file.is_file_valid() {
            let _ = inner.file.msync(SyncFlag::Async);
            let _ = inner.meta_file.msync(SyncFlag::Async);
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("mmap_id", &self.mmap_id)
            .field("mode", &self.mode)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
