//! # stashdb - Embedded Memory-Mapped Key-Value Store
//!
//! stashdb is an embedded key-value store for settings-like payloads. It
//! maps one persistent file per store into the process address space and
//! serves reads and writes directly through that mapping, amortizing
//! syscalls and letting the OS handle page-level persistence. A sibling
//! `.crc` meta file bounds durability with a payload checksum and carries
//! the cross-process change sequence and cipher state.
//!
//! ## Quick Start
//!
//! ```ignore
//! use stashdb::{OpenOptions, Registry};
//!
//! let registry = Registry::new("./stash")?;
//! let store = registry.open(OpenOptions::new("settings"))?;
//!
//! store.set_i32("launch-count", 42);
//! store.set_string("user", "alice");
//!
//! assert_eq!(store.get_i32("launch-count", 0), 42);
//! assert_eq!(store.get_string("user").as_deref(), Some("alice"));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │        Public API (Registry / Store)       │
//! ├───────────────────────────────────────────┤
//! │    Scalar Codec (varint / coded values)    │
//! ├─────────────────────┬─────────────────────┤
//! │  In-Memory Index    │  AES-CFB Stream     │
//! │  (key → holder)     │  (snapshot/restore) │
//! ├─────────────────────┴─────────────────────┤
//! │   Engine (load / append / write-back)      │
//! ├───────────────────────────────────────────┤
//! │  MemoryFile + MetaInfo + FileLock (mmap)   │
//! └───────────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! root_dir/
//! ├── settings          # data: u32 actual_size ‖ appended records
//! ├── settings.crc      # meta: crc, size, version, sequence, IVs
//! └── specialCharacter/ # stores whose ids contain \ / : * ? " < > |
//!     └── <md5-hex>     #   (files named by the id's md5)
//! ```
//!
//! The payload is an append-only log of `varint(key_len) ‖ key ‖
//! varint(value_len) ‖ value` records. Later records shadow earlier ones;
//! a zero-length value is a tombstone. Compaction ("full write-back")
//! rewrites the payload from the live index when the log would overflow
//! the mapping.
//!
//! ## Concurrency
//!
//! All calls are blocking and synchronous. Within a process, a recursive
//! lock discipline serializes each instance; across processes, an advisory
//! lock on the meta file gives writes exclusive access, and a monotonic
//! meta sequence lets readers detect peer write-backs cheaply.
//!
//! ## Module Overview
//!
//! - [`store`]: the engine and public API (`Registry`, `Store`)
//! - [`storage`]: `MemoryFile`, `MetaInfo`, `FileLock`
//! - [`encoding`]: protobuf-compatible scalar codec
//! - [`crypto`]: AES-128-CFB with snapshot/restore
//! - [`config`]: open options, recovery policies, constants
//! - [`paths`]: id → file path derivation

#[macro_use]
mod macros;

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod paths;
pub mod storage;
pub mod store;

pub use config::{
    ContentChangeHandler, ErrorHandler, ErrorKind, LogLevel, OpenOptions, ProcessMode,
    RecoverStrategy, SyncFlag,
};
pub use store::{Registry, Store};
