//! # Storage Layer
//!
//! The file-level building blocks under the engine:
//!
//! - [`mmap`]: `MemoryFile`, one fd plus one whole-file shared mapping
//! - [`lock`]: `FileLock`, the re-entrant inter-process advisory lock held
//!   over the meta file
//! - [`meta`]: `MetaInfo`, the fixed 48-byte commit record in the `.crc`
//!   file
//!
//! ## Two-File Commit
//!
//! Durability is a two-file protocol: payload bytes land in the data file
//! first, then `(actual_size, crc_digest, sequence)` lands in the meta
//! file. A reader that catches the window between the two sees a CRC
//! mismatch and reloads; it never trusts uncommitted bytes. The exclusive
//! file lock keeps that window single-writer across processes.

pub mod lock;
pub mod meta;
pub mod mmap;

pub use lock::{FileLock, LockType};
pub use meta::{MetaInfo, SeqPolicy, META_INFO_SIZE};
pub use mmap::MemoryFile;
