//! # Store Configuration
//!
//! Open-time options, recovery policies, and logging configuration for the
//! store. The closed set of recognized options mirrors what the engine can
//! actually honor; anything platform-specific (anonymous shared memory
//! backings, for instance) is an alternative `MemoryFile` implementation,
//! not an option here.
//!
//! ## Modes
//!
//! - `SingleProcess`: the inter-process file lock is disabled; only the
//!   in-process mutex serializes access. Cheapest option, and the default.
//! - `MultiProcess`: every file-touching operation additionally takes the
//!   shared or exclusive advisory lock on the meta file, and read paths
//!   re-check the meta sequence for changes made by peer processes.
//!
//! Independently of the process mode, a store can be opened `read_only`:
//! the data file is mapped read-only, the meta file is never written, and
//! all mutating calls fail with a logged warning.
//!
//! ## Recovery Policies
//!
//! When a load detects corruption (CRC mismatch, or a size prefix that
//! exceeds the file), the registered error handler decides between
//! `Discard` (empty the store and continue) and `KeepSameAsOld` (index
//! whatever parses and continue). With no handler installed the engine
//! discards, which is the safe default for settings-like payloads that the
//! application can regenerate.

pub mod constants;

use crate::paths;
use std::path::PathBuf;

/// Whether the store coordinates with other processes mapping the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessMode {
    #[default]
    SingleProcess,
    MultiProcess,
}

/// Flush mode for [`crate::storage::MemoryFile::msync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFlag {
    /// Block until the pages reach the disk.
    Sync,
    /// Schedule the flush and return.
    Async,
}

/// Severity threshold for the crate's log output, mapped onto the `log`
/// facade's level filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    None,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::None => log::LevelFilter::Off,
        }
    }
}

/// What the engine should do about a corrupted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverStrategy {
    /// Empty the log, reset the meta file, continue with an empty store.
    Discard,
    /// Keep whatever parses and continue with a partial index.
    KeepSameAsOld,
}

/// The corruption classes the error handler can be asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CrcCheckFail,
    FileLengthError,
}

/// Decides recovery for a corrupted store. Receives the store's `mmap_id`.
pub type ErrorHandler = Box<dyn Fn(&str, ErrorKind) -> RecoverStrategy + Send + Sync>;

/// Invoked with the store's `mmap_id` after a cross-process change is
/// detected by `check_load_data`.
pub type ContentChangeHandler = Box<dyn Fn(&str) + Send + Sync>;

/// Builder-style options for [`crate::Registry::open`].
#[derive(Clone)]
pub struct OpenOptions {
    pub(crate) mmap_id: String,
    pub(crate) mode: ProcessMode,
    pub(crate) read_only: bool,
    pub(crate) crypt_key: Option<Vec<u8>>,
    pub(crate) relative_path: Option<PathBuf>,
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material stays out of logs
        f.debug_struct("OpenOptions")
            .field("mmap_id", &self.mmap_id)
            .field("mode", &self.mode)
            .field("read_only", &self.read_only)
            .field("crypt", &self.crypt_key.is_some())
            .field("relative_path", &self.relative_path)
            .finish()
    }
}

impl OpenOptions {
    pub fn new(mmap_id: impl Into<String>) -> Self {
        Self {
            mmap_id: mmap_id.into(),
            mode: ProcessMode::SingleProcess,
            read_only: false,
            crypt_key: None,
            relative_path: None,
        }
    }

    /// Enables the inter-process lock protocol for this store.
    pub fn multi_process(mut self) -> Self {
        self.mode = ProcessMode::MultiProcess;
        self
    }

    /// Maps the data file read-only and refuses all writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Enables AES-CFB payload encryption with the given key. Keys are
    /// zero-padded or truncated to 16 bytes; an empty key means plain mode.
    pub fn crypt_key(mut self, key: impl AsRef<[u8]>) -> Self {
        let key = key.as_ref();
        if !key.is_empty() {
            self.crypt_key = Some(key.to_vec());
        }
        self
    }

    /// Stores the files under `dir` instead of the registry root. Instances
    /// opened under distinct directories are distinct even for equal ids.
    pub fn relative_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.relative_path = Some(dir.into());
        self
    }

    /// The registry key this set of options resolves to.
    pub(crate) fn mmap_key(&self, root_dir: &std::path::Path) -> String {
        paths::mmaped_kv_key(&self.mmap_id, root_dir, self.relative_path.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_options_defaults() {
        let opts = OpenOptions::new("settings");
        assert_eq!(opts.mode, ProcessMode::SingleProcess);
        assert!(!opts.read_only);
        assert!(opts.crypt_key.is_none());
        assert!(opts.relative_path.is_none());
    }

    #[test]
    fn empty_crypt_key_means_plain_mode() {
        let opts = OpenOptions::new("settings").crypt_key("");
        assert!(opts.crypt_key.is_none());
    }

    #[test]
    fn log_level_maps_to_filter() {
        assert_eq!(LogLevel::None.to_level_filter(), log::LevelFilter::Off);
        assert_eq!(LogLevel::Warning.to_level_filter(), log::LevelFilter::Warn);
    }
}
