//! # Memory-Mapped File
//!
//! `MemoryFile` owns one file descriptor and one whole-file shared mapping.
//! The store serves every read and write directly through that mapping; the
//! OS handles page-level persistence and caching, and explicit `msync`
//! calls bound durability.
//!
//! ## Sizing
//!
//! Files are always kept at a multiple of the OS page size, with one page
//! as the floor. `truncate` extends (or, from compaction only, shrinks) the
//! file on disk and remaps so the in-process pointer covers the new size.
//! Extension via `set_len` zero-fills the new tail.
//!
//! ## Remap Safety
//!
//! The mapping becomes invalid whenever the file is resized. All accessors
//! borrow `&self`/`&mut self`, so the borrow checker rules out references
//! into the old mapping surviving a `truncate` — the same compile-time
//! discipline the rest of the storage layer relies on, with no runtime
//! guards.
//!
//! ## Cache Clearing
//!
//! `clear_memory_cache` drops the mapping without touching the file; the
//! next `reload` re-stats the file (its size may have been changed by a
//! peer process) and maps it again. Read-only stores get a read-only
//! mapping and report failure from every mutating call.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::{Mmap, MmapMut};

use crate::config::constants::default_mmap_size;
use crate::config::SyncFlag;

#[derive(Debug)]
enum Mapping {
    Rw(MmapMut),
    Ro(Mmap),
}

#[derive(Debug)]
pub struct MemoryFile {
    path: PathBuf,
    file: File,
    mapping: Option<Mapping>,
    file_size: usize,
    read_only: bool,
}

fn round_up_to_page(size: usize) -> usize {
    let page = default_mmap_size();
    let size = size.max(page);
    size.div_ceil(page) * page
}

impl MemoryFile {
    /// Create-or-open `path`, size it up to at least one page, and map it.
    /// Read-only files must already exist and are mapped without write
    /// permission.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(&path)
            .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;

        let mut memory_file = Self {
            path,
            file,
            mapping: None,
            file_size: 0,
            read_only,
        };
        memory_file.reload()?;
        Ok(memory_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// True iff the file is mapped and holds at least one page.
    pub fn is_file_valid(&self) -> bool {
        self.mapping.is_some() && self.file_size >= default_mmap_size()
    }

    pub fn memory(&self) -> Result<&[u8]> {
        match &self.mapping {
            Some(Mapping::Rw(mmap)) => Ok(&mmap[..]),
            Some(Mapping::Ro(mmap)) => Ok(&mmap[..]),
            None => bail!("'{}' is not mapped", self.path.display()),
        }
    }

    pub fn memory_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.mapping {
            Some(Mapping::Rw(mmap)) => Ok(&mut mmap[..]),
            Some(Mapping::Ro(_)) => bail!("'{}' is mapped read-only", self.path.display()),
            None => bail!("'{}' is not mapped", self.path.display()),
        }
    }

    /// Re-stats the file and maps it whole, growing a writable file to the
    /// one-page floor first. Used on open and after `clear_memory_cache`.
    pub fn reload(&mut self) -> Result<()> {
        self.mapping = None;

        let metadata = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", self.path.display()))?;
        let mut size = metadata.len() as usize;

        if !self.read_only {
            let target = round_up_to_page(size);
            if target != size {
                self.file.set_len(target as u64).wrap_err_with(|| {
                    format!("failed to size '{}' to {} bytes", self.path.display(), target)
                })?;
                size = target;
            }
        }

        ensure!(
            size > 0,
            "cannot map empty read-only file '{}'",
            self.path.display()
        );

        self.mapping = Some(self.map(size)?);
        self.file_size = size;
        Ok(())
    }

    fn map(&self, size: usize) -> Result<Mapping> {
        if self.read_only {
            // SAFETY: mapping a file another process may write is the
            // store's normal operating mode. This is sound because:
            // 1. The mapping is read-only; this process never writes it
            // 2. Peer writers follow the append-then-CRC commit protocol,
            //    so torn reads are detected by the CRC check, not UB-prone
            //    aliasing (the mapping is plain bytes, no references with
            //    validity invariants are built over it)
            // 3. The mapping's lifetime is tied to self, preventing
            //    use-after-unmap
            let mmap = unsafe {
                Mmap::map(&self.file)
                    .wrap_err_with(|| format!("failed to map '{}'", self.path.display()))?
            };
            ensure!(mmap.len() >= size, "short read-only mapping");
            Ok(Mapping::Ro(mmap))
        } else {
            // SAFETY: MmapMut::map_mut is unsafe because the file can be
            // modified externally. This is sound because:
            // 1. Cross-process writers are serialized by the exclusive
            //    meta-file lock; within a process the instance mutex
            //    serializes all access to this mapping
            // 2. The content is plain bytes validated by CRC; a rogue
            //    external writer corrupts data, not memory safety
            // 3. The mapping's lifetime is tied to self, preventing
            //    use-after-unmap
            let mmap = unsafe {
                MmapMut::map_mut(&self.file)
                    .wrap_err_with(|| format!("failed to map '{}'", self.path.display()))?
            };
            ensure!(mmap.len() >= size, "short mapping");
            Ok(Mapping::Rw(mmap))
        }
    }

    /// Resize the file to `new_size` (rounded up to a page multiple) and
    /// remap. Growth zero-fills; shrinking is reserved for compaction.
    pub fn truncate(&mut self, new_size: usize) -> Result<()> {
        ensure!(!self.read_only, "cannot truncate read-only '{}'", self.path.display());

        let target = round_up_to_page(new_size);
        if target == self.file_size {
            return Ok(());
        }

        if let Some(Mapping::Rw(mmap)) = &self.mapping {
            mmap.flush_async()
                .wrap_err("failed to flush mapping before resize")?;
        }
        self.mapping = None;

        self.file.set_len(target as u64).wrap_err_with(|| {
            format!("failed to resize '{}' to {} bytes", self.path.display(), target)
        })?;

        self.mapping = Some(self.map(target)?);
        self.file_size = target;
        Ok(())
    }

    /// Flush mapped pages to disk.
    pub fn msync(&self, flag: SyncFlag) -> Result<()> {
        match &self.mapping {
            Some(Mapping::Rw(mmap)) => match flag {
                SyncFlag::Sync => mmap.flush().wrap_err("msync failed"),
                SyncFlag::Async => mmap.flush_async().wrap_err("async msync failed"),
            },
            _ => Ok(()),
        }
    }

    /// Drop the mapping; the file stays open and `reload` maps it again.
    pub fn clear_memory_cache(&mut self) {
        self.mapping = None;
    }
}
