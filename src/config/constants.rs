//! # Configuration Constants
//!
//! This module centralizes the fixed sizes and format constants the engine
//! depends on. Constants that depend on each other are co-located to prevent
//! mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! default_mmap_size() (OS page size, 4096 floor)
//!       │
//!       ├─> MemoryFile::open rounds file sizes up to this granularity
//!       │
//!       └─> the meta file is created at exactly this size
//!
//! FIXED32_SIZE (4 bytes)
//!       │
//!       └─> data file layout: payload starts at offset FIXED32_SIZE,
//!           so actual_size + FIXED32_SIZE <= file size must always hold
//!
//! AES_KEY_LEN (16) == AES_BLOCK_LEN (16)
//!       │
//!       ├─> crypt keys are zero-padded / truncated to AES_KEY_LEN
//!       │
//!       └─> meta iv / vector fields are AES_BLOCK_LEN bytes each
//!
//! GROWTH_MIN_ITEM_HEADROOM (8)
//!       │
//!       └─> ensure_memory_size reserves avg_item_size * max(8, count/2)
//!           beyond the live payload before settling on a file size
//! ```
//!
//! ## Format Versions
//!
//! `FormatVersion` identifies the on-disk generation recorded in the meta
//! file. `Baseline` derives the cipher IV from the crypt key; `RandomIv`
//! stores a random IV in the meta `vector` field and refreshes it on every
//! full write-back. New stores are always created at `RandomIv`; both
//! generations stay readable.

/// Size of the little-endian `actual_size` prefix at offset 0 of the data file.
pub const FIXED32_SIZE: usize = 4;

/// AES-128 key length in bytes. Crypt keys are zero-padded or truncated to this.
pub const AES_KEY_LEN: usize = 16;

/// AES block (and IV) length in bytes.
pub const AES_BLOCK_LEN: usize = 16;

/// Suffix of the meta file sitting next to the data file.
pub const CRC_SUFFIX: &str = ".crc";

/// Characters that force an id's on-disk name through the MD5 fallback.
pub const SPECIAL_CHARACTERS: &str = "\\/:*?\"<>|";

/// Subdirectory holding files for ids with special characters in them.
pub const SPECIAL_CHARACTER_DIRECTORY_NAME: &str = "specialCharacter";

/// Minimum item headroom reserved when sizing the file during growth.
pub const GROWTH_MIN_ITEM_HEADROOM: usize = 8;

/// On-disk format generations. Stored in the meta `version` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum FormatVersion {
    /// Cipher IV derived from the crypt key.
    Baseline = 0,
    /// Cipher IV stored in the meta `vector` field, refreshed per write-back.
    RandomIv = 1,
}

/// Format version written by this implementation.
pub const CURRENT_FORMAT_VERSION: FormatVersion = FormatVersion::RandomIv;

/// Returns the OS page size, used as the mmap granularity and the minimum
/// file size. Falls back to 4096 if the sysconf probe fails.
pub fn default_mmap_size() -> usize {
    // SAFETY: sysconf is a simple libc query with no memory-safety
    // preconditions; a negative return means the key is unsupported.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}
