//! # Inter-Process File Lock
//!
//! Advisory byte-range lock over the whole meta file, giving the store its
//! cross-process reader/writer protocol. Within a process the instance
//! mutex already serializes access, so the counters here only have to make
//! the lock re-entrant for one call chain at a time.
//!
//! ## Re-entrancy Protocol
//!
//! Two recursion counters track nested acquisitions:
//!
//! - Taking a shared lock while any lock is held just bumps the shared
//!   count (an exclusive holder already covers readers).
//! - Taking an exclusive lock while exclusive is held bumps the exclusive
//!   count.
//! - Taking an exclusive lock while only shared is held is an upgrade: try
//!   non-blocking first; if a peer process holds the range, release our
//!   shared lock before blocking, otherwise two upgraders deadlock.
//! - Releasing the last exclusive lock while shared counts remain
//!   downgrades the range back to shared.
//!
//! ## No-op Mode
//!
//! Single-process stores construct the lock disabled; every call succeeds
//! without touching the descriptor. The call sites stay identical for both
//! modes.
//!
//! ## Platform
//!
//! POSIX `fcntl(F_SETLK/F_SETLKW)` record locks with `l_len == 0` (whole
//! file). These locks are per-process: threads of one process never exclude
//! each other here, which is the instance mutex's job per the lock
//! hierarchy.

use std::os::fd::RawFd;

use eyre::{bail, Result};
use log::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct FileLock {
    fd: RawFd,
    shared_count: u32,
    exclusive_count: u32,
    enable: bool,
}

fn flock_struct(kind: libc::c_short) -> libc::flock {
    // SAFETY: flock is a plain C struct; all-zeroes is a valid initializer
    // and l_start = 0 with l_len = 0 denotes the whole file.
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = kind;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl
}

impl FileLock {
    pub fn new(fd: RawFd, enable: bool) -> Self {
        Self {
            fd,
            shared_count: 0,
            exclusive_count: 0,
            enable,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enable
    }

    fn apply(&self, kind: libc::c_short, wait: bool) -> Result<()> {
        let cmd = if wait { libc::F_SETLKW } else { libc::F_SETLK };
        let fl = flock_struct(kind);
        // SAFETY: fd is owned by the meta MemoryFile which outlives this
        // lock, and fl is a fully initialized flock struct.
        let rc = unsafe { libc::fcntl(self.fd, cmd, &fl) };
        if rc != 0 {
            bail!("fcntl lock failed: {}", std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocking acquisition. Returns false only on descriptor errors.
    pub fn lock(&mut self, lock_type: LockType) -> bool {
        self.do_lock(lock_type, true)
    }

    /// Non-blocking acquisition.
    pub fn try_lock(&mut self, lock_type: LockType) -> bool {
        self.do_lock(lock_type, false)
    }

    fn do_lock(&mut self, lock_type: LockType, wait: bool) -> bool {
        if !self.enable {
            return true;
        }

        let mut release_shared_first = false;
        match lock_type {
            LockType::Shared => {
                // any held lock already covers readers
                if self.shared_count > 0 || self.exclusive_count > 0 {
                    self.shared_count += 1;
                    return true;
                }
            }
            LockType::Exclusive => {
                if self.exclusive_count > 0 {
                    self.exclusive_count += 1;
                    return true;
                }
                if self.shared_count > 0 {
                    release_shared_first = true;
                }
            }
        }

        let kind = match lock_type {
            LockType::Shared => libc::F_RDLCK as libc::c_short,
            LockType::Exclusive => libc::F_WRLCK as libc::c_short,
        };

        if release_shared_first {
            // Upgrade: try without blocking; on contention drop our shared
            // range before waiting, or two upgrading processes deadlock.
            if self.apply(kind, false).is_ok() {
                self.exclusive_count += 1;
                return true;
            }
            if !wait {
                return false;
            }
            if let Err(err) = self.apply(libc::F_UNLCK as libc::c_short, false) {
                error!("failed to release shared lock for upgrade: {:#}", err);
            }
        }

        match self.apply(kind, wait) {
            Ok(()) => {
                match lock_type {
                    LockType::Shared => self.shared_count += 1,
                    LockType::Exclusive => self.exclusive_count += 1,
                }
                true
            }
            Err(err) => {
                if wait {
                    error!("file lock failed: {:#}", err);
                }
                false
            }
        }
    }

    pub fn unlock(&mut self, lock_type: LockType) -> bool {
        if !self.enable {
            return true;
        }

        let mut downgrade_to_shared = false;
        match lock_type {
            LockType::Shared => {
                if self.shared_count == 0 {
                    return false;
                }
                if self.shared_count > 1 || self.exclusive_count > 0 {
                    self.shared_count -= 1;
                    return true;
                }
            }
            LockType::Exclusive => {
                if self.exclusive_count == 0 {
                    return false;
                }
                if self.exclusive_count > 1 {
                    self.exclusive_count -= 1;
                    return true;
                }
                if self.shared_count > 0 {
                    downgrade_to_shared = true;
                }
            }
        }

        let kind = if downgrade_to_shared {
            libc::F_RDLCK as libc::c_short
        } else {
            libc::F_UNLCK as libc::c_short
        };

        match self.apply(kind, true) {
            Ok(()) => {
                match lock_type {
                    LockType::Shared => self.shared_count -= 1,
                    LockType::Exclusive => self.exclusive_count -= 1,
                }
                true
            }
            Err(err) => {
                error!("file unlock failed: {:#}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use tempfile::tempdir;

    fn lock_file(dir: &tempfile::TempDir) -> File {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("meta"))
            .unwrap()
    }

    #[test]
    fn disabled_lock_is_a_noop() {
        let mut lock = FileLock::new(-1, false);
        assert!(lock.lock(LockType::Exclusive));
        assert!(lock.try_lock(LockType::Shared));
        assert!(lock.unlock(LockType::Exclusive));
    }

    #[test]
    fn shared_lock_is_reentrant() {
        let dir = tempdir().unwrap();
        let file = lock_file(&dir);
        let mut lock = FileLock::new(file.as_raw_fd(), true);

        assert!(lock.lock(LockType::Shared));
        assert!(lock.lock(LockType::Shared));
        assert!(lock.unlock(LockType::Shared));
        assert!(lock.unlock(LockType::Shared));
        assert!(!lock.unlock(LockType::Shared));
    }

    #[test]
    fn exclusive_lock_is_reentrant() {
        let dir = tempdir().unwrap();
        let file = lock_file(&dir);
        let mut lock = FileLock::new(file.as_raw_fd(), true);

        assert!(lock.lock(LockType::Exclusive));
        assert!(lock.lock(LockType::Exclusive));
        assert!(lock.unlock(LockType::Exclusive));
        assert!(lock.unlock(LockType::Exclusive));
        assert!(!lock.unlock(LockType::Exclusive));
    }

    #[test]
    fn upgrade_then_downgrade() {
        let dir = tempdir().unwrap();
        let file = lock_file(&dir);
        let mut lock = FileLock::new(file.as_raw_fd(), true);

        assert!(lock.lock(LockType::Shared));
        assert!(lock.lock(LockType::Exclusive));
        // exclusive released; shared must survive
        assert!(lock.unlock(LockType::Exclusive));
        assert!(lock.unlock(LockType::Shared));
    }

    #[test]
    fn shared_under_exclusive_just_counts() {
        let dir = tempdir().unwrap();
        let file = lock_file(&dir);
        let mut lock = FileLock::new(file.as_raw_fd(), true);

        assert!(lock.lock(LockType::Exclusive));
        assert!(lock.lock(LockType::Shared));
        assert!(lock.unlock(LockType::Shared));
        assert!(lock.unlock(LockType::Exclusive));
    }

    #[test]
    fn unlock_without_lock_fails() {
        let dir = tempdir().unwrap();
        let file = lock_file(&dir);
        let mut lock = FileLock::new(file.as_raw_fd(), true);
        assert!(!lock.unlock(LockType::Exclusive));
        assert!(!lock.unlock(LockType::Shared));
    }
}
