//! # Instance Path Derivation
//!
//! Every store is identified by a caller-chosen `mmap_id` plus an optional
//! directory override. The pair deterministically derives the data file
//! path and the sibling meta file path (`.crc` suffix appended to the full
//! file name).
//!
//! Ids are used as file names directly unless they contain a character that
//! is unsafe in at least one supported filesystem (`\ / : * ? " < > |`).
//! Such ids keep their logical name in memory but store their files under
//! `specialCharacter/<hex md5 of the id>`, so the on-disk name is stable,
//! collision-resistant, and portable.
//!
//! The registry key for an instance is the id itself, unless a directory
//! override distinct from the registry root is in play; then the key is the
//! md5 of `override/id`, so equal ids under different directories stay
//! distinct instances.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use md5::{Digest, Md5};

use crate::config::constants::{CRC_SUFFIX, SPECIAL_CHARACTERS, SPECIAL_CHARACTER_DIRECTORY_NAME};

pub fn md5_hex(bytes: &[u8]) -> String {
    let digest = Md5::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn has_special_character(mmap_id: &str) -> bool {
    mmap_id.chars().any(|ch| SPECIAL_CHARACTERS.contains(ch))
}

/// The on-disk file name (possibly nested) for an id.
pub fn encode_file_path(mmap_id: &str) -> PathBuf {
    if has_special_character(mmap_id) {
        Path::new(SPECIAL_CHARACTER_DIRECTORY_NAME).join(md5_hex(mmap_id.as_bytes()))
    } else {
        PathBuf::from(mmap_id)
    }
}

/// Registry key for `(mmap_id, relative_path)`.
pub fn mmaped_kv_key(mmap_id: &str, root_dir: &Path, relative_path: Option<&Path>) -> String {
    match relative_path {
        Some(dir) if dir != root_dir => {
            let combined = format!("{}/{}", dir.display(), mmap_id);
            md5_hex(combined.as_bytes())
        }
        _ => mmap_id.to_string(),
    }
}

/// Absolute path of the data file for `(mmap_id, relative_path)`.
pub fn data_path(mmap_id: &str, root_dir: &Path, relative_path: Option<&Path>) -> PathBuf {
    let base = relative_path.unwrap_or(root_dir);
    base.join(encode_file_path(mmap_id))
}

/// Absolute path of the meta file: the data path with `.crc` appended.
pub fn meta_path(mmap_id: &str, root_dir: &Path, relative_path: Option<&Path>) -> PathBuf {
    let mut os: OsString = data_path(mmap_id, root_dir, relative_path).into_os_string();
    os.push(CRC_SUFFIX);
    PathBuf::from(os)
}

/// Creates the directory the given file will live in.
pub fn prepare_parent_dir(file_path: &Path) -> Result<()> {
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create directory '{}'", parent.display()))?;
    }
    Ok(())
}
