//! # Engine I/O Paths
//!
//! The load / append / write-back state machine behind the public API.
//! Everything here runs with the instance mutex already held; functions
//! that touch the files additionally take the shared or exclusive
//! inter-process lock, in that order, per the crate's lock hierarchy.
//!
//! ## Commit Protocol
//!
//! Every mutation follows the same two-file order: payload bytes into the
//! data mapping first, then `(actual_size, crc_digest)` into the meta file.
//! Appends keep the meta sequence; full write-backs and resets bump it.
//! A peer that reads a stale or torn meta entry fails the CRC check and
//! reloads — it never observes a half-applied mutation as valid.
//!
//! ## Load
//!
//! `load_from_file` reads the meta entry, seeds the cipher IV, sanity-checks
//! the size prefix against the file, verifies the payload CRC, and walks
//! the records into the index. Corruption routes through the registered
//! error handler: `Discard` empties the store; `KeepSameAsOld` indexes the
//! parseable prefix and immediately rewrites it so the on-disk state is
//! consistent again.
//!
//! ## Append
//!
//! `ensure_memory_size` decides between appending in place, compacting, and
//! growing the file geometrically with average-item-size headroom so
//! steady-state workloads do not compact on every write. In crypt mode the
//! record is encrypted as a continuation of the payload stream, and the
//! cipher state is snapshotted between key and value for the index.
//!
//! ## Cross-Process Freshness
//!
//! `check_load_data` is the cheap happens-before edge: a changed meta
//! sequence means a peer rewrote the payload (full reload); a changed CRC
//! with the same sequence means a peer appended (parse only the tail).

use crc32fast::Hasher;
use eyre::{ensure, Result};
use log::{debug, error, info, warn};

use crate::config::constants::{
    default_mmap_size, AES_BLOCK_LEN, CURRENT_FORMAT_VERSION, FIXED32_SIZE,
    GROWTH_MIN_ITEM_HEADROOM,
};
use crate::config::{ErrorKind, RecoverStrategy};
use crate::crypto::AesCfb;
use crate::encoding::varint::varint_len;
use crate::encoding::CodedOutput;
use crate::storage::{LockType, MetaInfo, SeqPolicy};
use crate::store::holder::{Index, KeyValueHolder};
use crate::store::StoreInner;

/// Serialized live records plus the bookkeeping needed to rebuild the
/// index after the buffer lands in the file.
pub(crate) struct EncodePlan {
    buffer: Vec<u8>,
    entries: Vec<PlanEntry>,
}

struct PlanEntry {
    key: String,
    /// Offset of the first value byte within `buffer`.
    value_offset: u32,
    value_size: u32,
}

impl StoreInner {
    /// Runs `f` under the inter-process lock. The lock outlives early
    /// returns from `f`; a panic aborts the process's claim anyway when
    /// the descriptor closes.
    pub(crate) fn with_file_lock<R>(
        &mut self,
        lock_type: LockType,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.file_lock.lock(lock_type);
        let result = f(self);
        self.file_lock.unlock(lock_type);
        result
    }

    fn read_actual_size(&self) -> Result<usize> {
        let mem = self.file.memory()?;
        ensure!(mem.len() >= FIXED32_SIZE, "file smaller than the size prefix");
        // INVARIANT: slice length checked above
        Ok(u32::from_le_bytes(mem[..FIXED32_SIZE].try_into().unwrap()) as usize)
    }

    /// Commits `(actual_size, crc)` to both files: size prefix into the
    /// data mapping, then the meta entry. The caller has already placed
    /// the payload bytes.
    pub(crate) fn write_actual_size(
        &mut self,
        actual_size: usize,
        crc_digest: u32,
        new_iv: Option<&[u8; AES_BLOCK_LEN]>,
        policy: SeqPolicy,
    ) -> Result<()> {
        ensure!(!self.read_only, "[{}] read-only store cannot commit", self.mmap_id);

        {
            let mem = self.file.memory_mut()?;
            mem[..FIXED32_SIZE].copy_from_slice(&(actual_size as u32).to_le_bytes());
        }

        self.actual_size = actual_size;
        self.crc_digest = crc_digest;
        self.meta_info.set_actual_size(actual_size as u32);
        self.meta_info.set_crc_digest(crc_digest);
        if new_iv.is_some() && self.meta_info.version() < CURRENT_FORMAT_VERSION as u32 {
            self.meta_info.set_version(CURRENT_FORMAT_VERSION as u32);
        }

        let meta_mem = self.meta_file.memory_mut()?;
        self.meta_info.write(meta_mem, new_iv, policy)
    }

    /// Recomputes the payload CRC and returns whether it matches the meta
    /// entry, caching the computed digest either way.
    pub(crate) fn check_file_crc_valid(&mut self, actual_size: usize, expected: u32) -> bool {
        let Ok(mem) = self.file.memory() else {
            return false;
        };
        if FIXED32_SIZE + actual_size > mem.len() {
            return false;
        }

        let mut hasher = Hasher::new();
        hasher.update(&mem[FIXED32_SIZE..FIXED32_SIZE + actual_size]);
        let computed = hasher.finalize();
        self.crc_digest = computed;

        if computed != expected {
            error!(
                "[{}] crc check failed: stored {:#010x}, computed {:#010x}",
                self.mmap_id, expected, computed
            );
        }
        computed == expected
    }

    /// Re-establishes a consistent meta entry after recovery: full CRC
    /// over the current payload, new sequence, optionally a new IV.
    pub(crate) fn recalculate_crc_digest(
        &mut self,
        new_iv: Option<&[u8; AES_BLOCK_LEN]>,
    ) -> Result<()> {
        let actual_size = self.actual_size;
        let crc = {
            let mem = self.file.memory()?;
            ensure!(FIXED32_SIZE + actual_size <= mem.len(), "payload exceeds mapping");
            let mut hasher = Hasher::new();
            hasher.update(&mem[FIXED32_SIZE..FIXED32_SIZE + actual_size]);
            hasher.finalize()
        };
        self.write_actual_size(actual_size, crc, new_iv, SeqPolicy::IncreaseSequence)
    }

    /// Installs a fresh random IV on the cipher, returning it for the next
    /// meta write. No-op for plain stores.
    fn reset_crypter_iv(&mut self) -> Option<[u8; AES_BLOCK_LEN]> {
        let crypter = self.crypter.as_mut()?;
        let iv = AesCfb::random_iv();
        crypter.reset_iv(Some(&iv));
        Some(iv)
    }

    // ------------------------------------------------------------------
    // load
    // ------------------------------------------------------------------

    pub(crate) fn load_from_file(&mut self) -> Result<()> {
        if self.meta_file.is_file_valid() {
            self.meta_info = MetaInfo::read(self.meta_file.memory()?);
        }
        if let Some(crypter) = &mut self.crypter {
            if self.meta_info.uses_random_iv() {
                crypter.reset_iv(Some(self.meta_info.vector()));
            } else {
                crypter.reset_iv(None);
            }
        }

        if !self.file.is_file_valid() {
            self.file.reload()?;
        }

        let file_size = self.file.file_size();
        self.actual_size = self.read_actual_size()?;
        self.dic.clear();
        self.has_full_writeback = false;

        let mut load = false;
        let mut need_writeback = false;

        if self.actual_size + FIXED32_SIZE <= file_size {
            if self.check_file_crc_valid(self.actual_size, self.meta_info.crc_digest()) {
                load = true;
            } else {
                match self.handlers.on_error(&self.mmap_id, ErrorKind::CrcCheckFail) {
                    RecoverStrategy::KeepSameAsOld => {
                        load = true;
                        need_writeback = true;
                    }
                    RecoverStrategy::Discard => {}
                }
            }
        } else {
            error!(
                "[{}] file length error: size prefix {} does not fit file of {} bytes",
                self.mmap_id, self.actual_size, file_size
            );
            match self.handlers.on_error(&self.mmap_id, ErrorKind::FileLengthError) {
                RecoverStrategy::KeepSameAsOld => {
                    self.actual_size = file_size - FIXED32_SIZE;
                    load = true;
                    need_writeback = true;
                }
                RecoverStrategy::Discard => {}
            }
        }

        // cleared before the recovery paths below: both re-enter engine
        // entry points that would otherwise trigger a recursive load
        self.need_load_from_file = false;

        if load {
            self.construct_index(0, self.actual_size)?;
            info!(
                "[{}] loaded {} keys from {} payload bytes",
                self.mmap_id,
                self.dic.len(),
                self.actual_size
            );
            if need_writeback && !self.read_only {
                self.with_file_lock(LockType::Exclusive, |inner| inner.full_writeback())?;
            }
        } else {
            self.dic.clear();
            if self.read_only {
                self.actual_size = 0;
                self.crc_digest = 0;
            } else {
                warn!("[{}] discarding corrupted content", self.mmap_id);
                self.with_file_lock(LockType::Exclusive, |inner| inner.discard_all())?;
            }
        }

        Ok(())
    }

    /// Empties the payload and re-seeds the meta entry with a bumped
    /// sequence (and a fresh IV in crypt mode) so peers reload.
    fn discard_all(&mut self) -> Result<()> {
        self.dic.clear();
        self.actual_size = 0;
        let new_iv = self.reset_crypter_iv();
        self.recalculate_crc_digest(new_iv.as_ref())
    }

    /// Walks `payload[start..end)` into the index. Tolerant: parsing stops
    /// at the first malformed record and keeps what was indexed so far. In
    /// crypt mode the instance cipher must be positioned at `start`; it
    /// ends positioned at `end`.
    fn construct_index(&mut self, start: usize, end: usize) -> Result<()> {
        let mem = self.file.memory()?;
        ensure!(FIXED32_SIZE + end <= mem.len(), "payload range exceeds mapping");
        let ciphertext = &mem[FIXED32_SIZE + start..FIXED32_SIZE + end];

        // In crypt mode the records are parsed from a decrypted copy while
        // a tracker cipher re-walks the ciphertext to snapshot per-value
        // stream positions.
        let mut tracker = self.crypter.as_ref().cloned();
        let decrypted;
        let plaintext: &[u8] = match &mut self.crypter {
            Some(crypter) => {
                let mut plain = ciphertext.to_vec();
                crypter.decrypt(&mut plain);
                decrypted = plain;
                &decrypted
            }
            None => ciphertext,
        };

        let mut pos = 0usize;
        while pos < plaintext.len() {
            let record_start = pos;

            let Ok((key_len, key_len_bytes)) = crate::encoding::decode_varint(&plaintext[pos..])
            else {
                break;
            };
            pos += key_len_bytes;
            let key_len = key_len as usize;
            if key_len == 0 || plaintext.len() - pos < key_len {
                break;
            }
            let Ok(key) = std::str::from_utf8(&plaintext[pos..pos + key_len]) else {
                break;
            };
            let key = key.to_string();
            pos += key_len;

            let Ok((value_len, value_len_bytes)) = crate::encoding::decode_varint(&plaintext[pos..])
            else {
                break;
            };
            pos += value_len_bytes;
            let value_len = value_len as usize;
            if plaintext.len() - pos < value_len {
                break;
            }
            let value_offset = pos;
            pos += value_len;

            let crypt_status = tracker.as_mut().map(|tracker| {
                tracker.advance_over_ciphertext(&ciphertext[record_start..value_offset]);
                let status = tracker.status();
                tracker.advance_over_ciphertext(&ciphertext[value_offset..pos]);
                status
            });

            if value_len == 0 {
                self.dic.remove(&key);
            } else {
                self.dic.insert(
                    key,
                    KeyValueHolder::new(
                        (FIXED32_SIZE + start + value_offset) as u32,
                        value_len as u32,
                        crypt_status,
                    ),
                );
            }
        }

        if pos < plaintext.len() {
            warn!(
                "[{}] stopped indexing at byte {} of {}: malformed record",
                self.mmap_id,
                start + pos,
                end
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // cross-process freshness
    // ------------------------------------------------------------------

    pub(crate) fn check_load_data(&mut self) -> Result<()> {
        if self.need_load_from_file {
            return self.with_file_lock(LockType::Shared, |inner| inner.load_from_file());
        }
        if !self.file_lock.is_enabled() || !self.meta_file.is_file_valid() {
            return Ok(());
        }

        let meta = MetaInfo::read(self.meta_file.memory()?);
        if meta.sequence() != self.meta_info.sequence() {
            debug!(
                "[{}] meta sequence changed {} -> {}, reloading",
                self.mmap_id,
                self.meta_info.sequence(),
                meta.sequence()
            );
            self.reload_whole_file()?;
            self.notify_content_changed();
        } else if meta.crc_digest() != self.meta_info.crc_digest() {
            debug!(
                "[{}] meta crc changed {:#010x} -> {:#010x}, catching up",
                self.mmap_id,
                self.meta_info.crc_digest(),
                meta.crc_digest()
            );
            let fits = meta.actual_size() as usize + FIXED32_SIZE <= self.file.file_size();
            let grew = meta.actual_size() as usize >= self.actual_size;
            if !(fits && grew) || self.partial_load_from_file(&meta).is_err() {
                self.reload_whole_file()?;
            }
            self.notify_content_changed();
        }
        Ok(())
    }

    fn reload_whole_file(&mut self) -> Result<()> {
        self.clear_memory_cache();
        self.with_file_lock(LockType::Shared, |inner| {
            inner.file.reload()?;
            inner.meta_file.reload()?;
            inner.load_from_file()
        })
    }

    /// Catches up with a peer's appends without dropping the index: only
    /// the appended tail is CRC-checked and parsed. The instance cipher is
    /// already positioned at the old end of payload, so crypt snapshots
    /// continue seamlessly.
    fn partial_load_from_file(&mut self, meta: &MetaInfo) -> Result<()> {
        let old_actual_size = self.actual_size;
        let new_actual_size = self.read_actual_size()?;
        ensure!(
            new_actual_size == meta.actual_size() as usize,
            "size prefix {} disagrees with meta {}",
            new_actual_size,
            meta.actual_size()
        );
        ensure!(
            new_actual_size >= old_actual_size
                && new_actual_size + FIXED32_SIZE <= self.file.file_size(),
            "appended region out of bounds"
        );

        let crc = {
            let mem = self.file.memory()?;
            let mut hasher = Hasher::new_with_initial(self.crc_digest);
            hasher.update(&mem[FIXED32_SIZE + old_actual_size..FIXED32_SIZE + new_actual_size]);
            hasher.finalize()
        };
        ensure!(
            crc == meta.crc_digest(),
            "appended tail fails crc: computed {:#010x}, meta {:#010x}",
            crc,
            meta.crc_digest()
        );

        self.construct_index(old_actual_size, new_actual_size)?;
        self.actual_size = new_actual_size;
        self.crc_digest = crc;
        self.meta_info = *meta;
        self.has_full_writeback = false;
        info!(
            "[{}] partial load: {} appended bytes, {} keys live",
            self.mmap_id,
            new_actual_size - old_actual_size,
            self.dic.len()
        );
        Ok(())
    }

    fn notify_content_changed(&self) {
        self.handlers.on_content_changed(&self.mmap_id);
    }

    // ------------------------------------------------------------------
    // point reads
    // ------------------------------------------------------------------

    pub(crate) fn get_data_for_key(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_load_data()?;
        let Some(holder) = self.dic.get(key).cloned() else {
            return Ok(None);
        };

        let mem = self.file.memory()?;
        let start = holder.offset as usize;
        let end = start + holder.value_size as usize;
        ensure!(end <= mem.len(), "index entry points past the mapping");

        let mut value = mem[start..end].to_vec();
        if let (Some(crypter), Some(status)) = (&self.crypter, &holder.crypt_status) {
            crypter.clone_with_status(status).decrypt(&mut value);
        }
        Ok(Some(value))
    }

    // ------------------------------------------------------------------
    // append path
    // ------------------------------------------------------------------

    pub(crate) fn set_data_for_key(&mut self, value: &[u8], key: &str) -> Result<()> {
        ensure!(!self.read_only, "[{}] store is read-only", self.mmap_id);
        self.with_file_lock(LockType::Exclusive, |inner| {
            inner.check_load_data()?;
            if value.is_empty() {
                inner.remove_data_for_key(key)?;
                Ok(())
            } else {
                inner.append_data_with_key(value, key)
            }
        })
    }

    /// Appends a tombstone if the key is live. The caller holds the
    /// exclusive lock and has refreshed the index.
    pub(crate) fn remove_data_for_key(&mut self, key: &str) -> Result<bool> {
        if !self.dic.contains_key(key) {
            return Ok(false);
        }
        self.append_data_with_key(&[], key)?;
        Ok(true)
    }

    fn append_data_with_key(&mut self, value: &[u8], key: &str) -> Result<()> {
        let key_bytes = key.as_bytes();
        let record_size = varint_len(key_bytes.len() as u64)
            + key_bytes.len()
            + varint_len(value.len() as u64)
            + value.len();

        self.ensure_memory_size(record_size)?;
        ensure!(self.file.is_file_valid(), "[{}] data file is not mapped", self.mmap_id);

        let write_offset = FIXED32_SIZE + self.actual_size;
        ensure!(
            write_offset + record_size <= self.file.file_size(),
            "record of {} bytes does not fit at offset {}",
            record_size,
            write_offset
        );

        let mut record = vec![0u8; record_size];
        {
            let mut output = CodedOutput::new(&mut record);
            output.write_data(key_bytes)?;
            output.write_data(value)?;
        }
        let value_rel = record_size - value.len();

        // Continue the payload cipher stream; the snapshot between key and
        // value is what the index stores for point decryption.
        let crypt_status = match &mut self.crypter {
            Some(crypter) => {
                crypter.encrypt(&mut record[..value_rel]);
                let status = crypter.status();
                crypter.encrypt(&mut record[value_rel..]);
                Some(status)
            }
            None => None,
        };

        {
            let mem = self.file.memory_mut()?;
            mem[write_offset..write_offset + record_size].copy_from_slice(&record);
        }

        let mut hasher = Hasher::new_with_initial(self.crc_digest);
        hasher.update(&record);
        let new_crc = hasher.finalize();
        self.write_actual_size(
            self.actual_size + record_size,
            new_crc,
            None,
            SeqPolicy::KeepSequence,
        )?;

        if value.is_empty() {
            self.dic.remove(key);
            debug!("[{}] removed key '{}'", self.mmap_id, key);
        } else {
            self.dic.insert(
                key.to_string(),
                KeyValueHolder::new(
                    (write_offset + value_rel) as u32,
                    value.len() as u32,
                    crypt_status,
                ),
            );
        }
        self.has_full_writeback = false;
        Ok(())
    }

    /// Makes room for an incoming record: append in place when it fits,
    /// otherwise compact, growing the file geometrically first when even
    /// the live set plus headroom would not fit.
    fn ensure_memory_size(&mut self, new_size: usize) -> Result<()> {
        let space_left = self
            .file
            .file_size()
            .saturating_sub(FIXED32_SIZE + self.actual_size);
        if new_size < space_left && !self.dic.is_empty() {
            return Ok(());
        }

        let plan = self.prepare_encode()?;
        let len_needed = FIXED32_SIZE + plan.buffer.len() + new_size;
        let count = self.dic.len().max(1);
        let avg_item_size = len_needed / count;
        let future_usage = avg_item_size * GROWTH_MIN_ITEM_HEADROOM.max(self.dic.len() / 2);

        let mut file_size = self.file.file_size();
        if len_needed >= file_size || len_needed + future_usage >= file_size {
            let old_size = file_size;
            while len_needed + future_usage >= file_size {
                file_size *= 2;
            }
            info!(
                "[{}] growing file {} -> {} bytes ({} needed, {} headroom)",
                self.mmap_id, old_size, file_size, len_needed, future_usage
            );
            self.file.truncate(file_size)?;
        }

        self.do_full_writeback(plan)
    }

    // ------------------------------------------------------------------
    // full write-back
    // ------------------------------------------------------------------

    /// Serializes the live index into one contiguous plaintext buffer,
    /// decrypting values out of the current payload as needed.
    fn prepare_encode(&self) -> Result<EncodePlan> {
        let mem = self.file.memory()?;

        let mut live: Vec<(&String, Vec<u8>)> = Vec::with_capacity(self.dic.len());
        for (key, holder) in &self.dic {
            let start = holder.offset as usize;
            let end = start + holder.value_size as usize;
            ensure!(end <= mem.len(), "index entry points past the mapping");
            let mut value = mem[start..end].to_vec();
            if let (Some(crypter), Some(status)) = (&self.crypter, &holder.crypt_status) {
                crypter.clone_with_status(status).decrypt(&mut value);
            }
            live.push((key, value));
        }

        let total: usize = live
            .iter()
            .map(|(key, value)| {
                varint_len(key.len() as u64) + key.len() + varint_len(value.len() as u64) + value.len()
            })
            .sum();

        let mut buffer = vec![0u8; total];
        let mut entries = Vec::with_capacity(live.len());
        let mut output = CodedOutput::new(&mut buffer);
        for (key, value) in live {
            output.write_data(key.as_bytes())?;
            output.write_raw_varint(value.len() as u64)?;
            let value_offset = output.position() as u32;
            output.write_raw_bytes(&value)?;
            entries.push(PlanEntry {
                key: key.clone(),
                value_offset,
                value_size: value.len() as u32,
            });
        }

        Ok(EncodePlan { buffer, entries })
    }

    /// Lands a prepared plan as the whole payload: re-encrypts from a
    /// fresh random IV in crypt mode, rewrites `payload[0..len]`, commits
    /// with `IncreaseSequence`, and rebuilds the index against the new
    /// offsets.
    fn do_full_writeback(&mut self, plan: EncodePlan) -> Result<()> {
        let total = plan.buffer.len();
        ensure!(
            FIXED32_SIZE + total <= self.file.file_size(),
            "write-back of {} bytes does not fit file of {}",
            total,
            self.file.file_size()
        );

        let mut buffer = plan.buffer;
        let mut new_dic = Index::with_capacity(plan.entries.len());

        let new_iv = match &mut self.crypter {
            Some(crypter) => {
                let iv = AesCfb::random_iv();
                crypter.reset_iv(Some(&iv));
                let mut pos = 0usize;
                for entry in &plan.entries {
                    let value_offset = entry.value_offset as usize;
                    let value_end = value_offset + entry.value_size as usize;
                    crypter.encrypt(&mut buffer[pos..value_offset]);
                    let status = crypter.status();
                    crypter.encrypt(&mut buffer[value_offset..value_end]);
                    new_dic.insert(
                        entry.key.clone(),
                        KeyValueHolder::new(
                            (FIXED32_SIZE + value_offset) as u32,
                            entry.value_size,
                            Some(status),
                        ),
                    );
                    pos = value_end;
                }
                Some(iv)
            }
            None => {
                for entry in &plan.entries {
                    new_dic.insert(
                        entry.key.clone(),
                        KeyValueHolder::new(
                            (FIXED32_SIZE + entry.value_offset as usize) as u32,
                            entry.value_size,
                            None,
                        ),
                    );
                }
                None
            }
        };

        {
            let mem = self.file.memory_mut()?;
            mem[FIXED32_SIZE..FIXED32_SIZE + total].copy_from_slice(&buffer);
        }

        let mut hasher = Hasher::new();
        hasher.update(&buffer);
        let crc = hasher.finalize();

        self.dic = new_dic;
        self.write_actual_size(total, crc, new_iv.as_ref(), SeqPolicy::IncreaseSequence)?;
        self.has_full_writeback = true;
        debug!(
            "[{}] full write-back: {} keys, {} payload bytes",
            self.mmap_id,
            self.dic.len(),
            total
        );
        Ok(())
    }

    /// Compaction entry point. The caller holds the exclusive lock; the
    /// flag makes repeat calls free until the next mutation.
    pub(crate) fn full_writeback(&mut self) -> Result<()> {
        if self.has_full_writeback {
            return Ok(());
        }
        ensure!(!self.read_only, "[{}] store is read-only", self.mmap_id);
        if self.need_load_from_file {
            self.check_load_data()?;
        }
        ensure!(self.file.is_file_valid(), "[{}] data file is not mapped", self.mmap_id);

        let plan = self.prepare_encode()?;
        let len_needed = FIXED32_SIZE + plan.buffer.len();
        if len_needed > self.file.file_size() {
            let mut file_size = self.file.file_size();
            while len_needed > file_size {
                file_size *= 2;
            }
            self.file.truncate(file_size)?;
        }
        self.do_full_writeback(plan)
    }

    // ------------------------------------------------------------------
    // resets
    // ------------------------------------------------------------------

    /// Empties the store in place: the payload shrinks back to one page,
    /// the index clears, and the bumped sequence tells peers to reload.
    pub(crate) fn clear_all(&mut self) -> Result<()> {
        ensure!(!self.read_only, "[{}] store is read-only", self.mmap_id);
        self.with_file_lock(LockType::Exclusive, |inner| {
            inner.check_load_data()?;
            let page = default_mmap_size();
            if inner.file.file_size() > page {
                inner.file.truncate(page)?;
            }
            inner.dic.clear();
            let new_iv = inner.reset_crypter_iv();
            inner.actual_size = 0;
            inner.recalculate_crc_digest(new_iv.as_ref())?;
            inner.has_full_writeback = true;
            info!("[{}] cleared", inner.mmap_id);
            Ok(())
        })
    }

    /// Drops every in-memory projection of the file. The next operation
    /// reloads from disk.
    pub(crate) fn clear_memory_cache(&mut self) {
        if self.need_load_from_file {
            return;
        }
        debug!("[{}] clearing memory cache", self.mmap_id);
        self.need_load_from_file = true;
        self.dic.clear();
        self.has_full_writeback = false;

        if let Some(crypter) = &mut self.crypter {
            if self.meta_info.uses_random_iv() {
                crypter.reset_iv(Some(self.meta_info.vector()));
            } else {
                crypter.reset_iv(None);
            }
        }

        self.file.clear_memory_cache();
        self.actual_size = 0;
        self.crc_digest = 0;
    }

    // ------------------------------------------------------------------
    // key change
    // ------------------------------------------------------------------

    /// Transitions between plain and crypt mode, or rotates the key. Any
    /// actual change re-encrypts (or decrypts) the whole payload through a
    /// full write-back under the exclusive lock.
    pub(crate) fn re_key(&mut self, new_key: Option<&[u8]>) -> Result<()> {
        ensure!(!self.read_only, "[{}] store is read-only", self.mmap_id);
        self.with_file_lock(LockType::Exclusive, |inner| {
            inner.check_load_data()?;

            let unchanged = match (&inner.crypter, new_key) {
                (Some(crypter), Some(key)) => crypter.key() == &AesCfb::pad_key(key),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return Ok(());
            }

            info!(
                "[{}] changing crypt key ({} -> {})",
                inner.mmap_id,
                if inner.crypter.is_some() { "crypt" } else { "plain" },
                if new_key.is_some() { "crypt" } else { "plain" },
            );

            // serialize with the old key before installing the new one
            let plan = inner.prepare_encode()?;
            inner.crypter = new_key.map(AesCfb::new);

            let len_needed = FIXED32_SIZE + plan.buffer.len();
            if len_needed > inner.file.file_size() {
                let mut file_size = inner.file.file_size();
                while len_needed > file_size {
                    file_size *= 2;
                }
                inner.file.truncate(file_size)?;
            }
            inner.do_full_writeback(plan)
        })
    }

    /// Batch removal: drops the keys from the index in memory, then
    /// reclaims their records in one immediate write-back. Returns how
    /// many keys were live.
    pub(crate) fn remove_values_for_keys(&mut self, keys: &[String]) -> Result<usize> {
        ensure!(!self.read_only, "[{}] store is read-only", self.mmap_id);
        self.with_file_lock(LockType::Exclusive, |inner| {
            inner.check_load_data()?;

            let mut removed = 0usize;
            for key in keys {
                if inner.dic.remove(key).is_some() {
                    removed += 1;
                }
            }
            if removed > 0 {
                debug!("[{}] batch removed {} keys", inner.mmap_id, removed);
                inner.has_full_writeback = false;
                inner.full_writeback()?;
            }
            Ok(removed)
        })
    }
}
