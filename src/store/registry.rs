//! # Instance Registry
//!
//! The process-scoped map from instance identity to open store, so that
//! reopening the same id yields the same `Arc<Store>` — and therefore the
//! same instance mutex and file-lock counters. There is no hidden global:
//! a `Registry` is an explicit context holder constructed with a root
//! directory, which keeps tests (and embedders with several roots)
//! independent of each other.
//!
//! The registry also owns the process-wide callback configuration: the
//! corruption-recovery handler and the cross-process content-change
//! handler. Stores capture an `Arc` of that configuration at open and read
//! it at dispatch time, so handlers registered after open still apply.

use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use log::info;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::config::{
    ContentChangeHandler, ErrorHandler, ErrorKind, LogLevel, OpenOptions, RecoverStrategy,
};
use crate::store::Store;

/// Callback configuration shared between a registry and its stores.
#[derive(Default)]
pub(crate) struct Handlers {
    error: RwLock<Option<ErrorHandler>>,
    content_change: RwLock<Option<ContentChangeHandler>>,
}

impl Handlers {
    /// Dispatches a corruption report; discards by default.
    pub(crate) fn on_error(&self, mmap_id: &str, kind: ErrorKind) -> RecoverStrategy {
        match &*self.error.read() {
            Some(handler) => handler(mmap_id, kind),
            None => RecoverStrategy::Discard,
        }
    }

    pub(crate) fn on_content_changed(&self, mmap_id: &str) {
        if let Some(handler) = &*self.content_change.read() {
            handler(mmap_id);
        }
    }
}

pub struct Registry {
    root_dir: PathBuf,
    instances: Mutex<HashMap<String, Arc<Store>>>,
    handlers: Arc<Handlers>,
}

impl Registry {
    /// Creates the root directory and an empty registry over it.
    pub fn new(root_dir: impl Into<PathBuf>) -> Result<Self> {
        let root_dir = root_dir.into();
        std::fs::create_dir_all(&root_dir)
            .wrap_err_with(|| format!("failed to create root '{}'", root_dir.display()))?;
        info!("store root: {}", root_dir.display());
        Ok(Self {
            root_dir,
            instances: Mutex::new(HashMap::new()),
            handlers: Arc::new(Handlers::default()),
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Opens (or returns the already-open) store for the given options.
    /// Identity is the options' mmap key; an instance opened once keeps
    /// its original mode and crypt key for later callers.
    pub fn open(&self, options: OpenOptions) -> Result<Arc<Store>> {
        ensure!(!options.mmap_id.is_empty(), "mmap id must not be empty");

        let mmap_key = options.mmap_key(&self.root_dir);
        let mut instances = self.instances.lock();
        if let Some(store) = instances.get(&mmap_key) {
            return Ok(Arc::clone(store));
        }

        info!("opening [{}]", options.mmap_id);
        let store = Arc::new(Store::open(options, &self.root_dir, Arc::clone(&self.handlers))?);
        instances.insert(mmap_key, Arc::clone(&store));
        Ok(store)
    }

    /// Convenience for a single-process, plain-mode open.
    pub fn open_default(&self, mmap_id: impl Into<String>) -> Result<Arc<Store>> {
        self.open(OpenOptions::new(mmap_id))
    }

    /// Removes the store from the registry. The instance itself lives on
    /// until the last `Arc` drops, which flushes it.
    pub fn close(&self, store: &Store) -> bool {
        info!("closing [{}]", store.mmap_id());
        self.instances.lock().remove(store.mmap_key()).is_some()
    }

    /// Flushes and forgets every registered store.
    pub fn close_all(&self) {
        let mut instances = self.instances.lock();
        for store in instances.values() {
            store.sync(crate::config::SyncFlag::Async);
        }
        instances.clear();
    }

    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self.handlers.error.write() = Some(handler);
    }

    pub fn clear_error_handler(&self) {
        *self.handlers.error.write() = None;
    }

    pub fn set_content_change_handler(&self, handler: ContentChangeHandler) {
        *self.handlers.content_change.write() = Some(handler);
    }

    pub fn clear_content_change_handler(&self) {
        *self.handlers.content_change.write() = None;
    }

    /// Caps the crate's log output via the `log` facade.
    pub fn set_log_level(&self, level: LogLevel) {
        log::set_max_level(level.to_level_filter());
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("root_dir", &self.root_dir)
            .field("instances", &self.instances.lock().len())
            .finish()
    }
}
