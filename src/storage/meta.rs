//! # Meta File Layout
//!
//! The `.crc` sibling of every data file carries the integrity and crypto
//! state that bounds durability: the payload CRC, the committed payload
//! size, the format generation, the cross-process change sequence, and the
//! cipher IVs. The struct is written at offset 0 of the meta file's mapping
//! in one `copy_from_slice`.
//!
//! ## Layout (48 bytes, little-endian)
//!
//! ```text
//! Offset  Size  Field
//! 0       4     crc_digest   CRC-32 over payload[0..actual_size]
//! 4       4     actual_size  committed payload bytes
//! 8       4     version      format generation (FormatVersion)
//! 12      4     sequence     bumped on every full write-back / reset
//! 16      16    iv           legacy slot, zeroed by current writers
//! 32      16    vector       cipher IV when version >= RandomIv
//! ```
//!
//! ## Torn Writes
//!
//! A meta rewrite is not atomic at the byte level. Readers treat whatever
//! they find as a hint: the payload CRC check is the arbiter, and a torn
//! `(actual_size, crc_digest)` pair simply fails that check and routes
//! through the recovery policy. No second checksum guards the meta struct
//! itself.

use eyre::{ensure, Result};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::constants::{FormatVersion, AES_BLOCK_LEN, CURRENT_FORMAT_VERSION};
use crate::le_accessors;

pub const META_INFO_SIZE: usize = 48;

/// Whether a meta write bumps the cross-process change sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqPolicy {
    KeepSequence,
    IncreaseSequence,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct MetaInfo {
    crc_digest: U32,
    actual_size: U32,
    version: U32,
    sequence: U32,
    iv: [u8; AES_BLOCK_LEN],
    vector: [u8; AES_BLOCK_LEN],
}

const _: () = assert!(std::mem::size_of::<MetaInfo>() == META_INFO_SIZE);

impl Default for MetaInfo {
    fn default() -> Self {
        Self {
            crc_digest: U32::new(0),
            actual_size: U32::new(0),
            version: U32::new(CURRENT_FORMAT_VERSION as u32),
            sequence: U32::new(0),
            iv: [0u8; AES_BLOCK_LEN],
            vector: [0u8; AES_BLOCK_LEN],
        }
    }
}

impl MetaInfo {
    le_accessors! {
        crc_digest: u32,
        actual_size: u32,
        version: u32,
        sequence: u32,
    }

    /// Legacy IV slot; kept zeroed by current writers and preserved on
    /// rewrite for older readers.
    pub fn iv(&self) -> &[u8; AES_BLOCK_LEN] {
        &self.iv
    }

    pub fn vector(&self) -> &[u8; AES_BLOCK_LEN] {
        &self.vector
    }

    pub fn set_vector(&mut self, vector: &[u8; AES_BLOCK_LEN]) {
        self.vector = *vector;
    }

    /// True when the recorded generation stores its IV in `vector`.
    pub fn uses_random_iv(&self) -> bool {
        self.version() >= FormatVersion::RandomIv as u32
    }

    /// Deserializes from the head of the meta mapping. Short buffers (a
    /// file that was never written) read as the zeroed default.
    pub fn read(bytes: &[u8]) -> Self {
        if bytes.len() < META_INFO_SIZE {
            return Self {
                version: U32::new(0),
                ..Self::default()
            };
        }
        // INVARIANT: length checked above; MetaInfo is Unaligned + FromBytes
        *Self::ref_from_bytes(&bytes[..META_INFO_SIZE]).unwrap()
    }

    /// Serializes into the head of the meta mapping, optionally installing
    /// a new cipher vector, with `IncreaseSequence` bumping the sequence
    /// first. The data bytes must already be on disk when this lands: the
    /// meta write is the commit point peers trust.
    pub fn write(
        &mut self,
        bytes: &mut [u8],
        new_vector: Option<&[u8; AES_BLOCK_LEN]>,
        policy: SeqPolicy,
    ) -> Result<()> {
        ensure!(
            bytes.len() >= META_INFO_SIZE,
            "meta mapping too small: {} < {}",
            bytes.len(),
            META_INFO_SIZE
        );

        if policy == SeqPolicy::IncreaseSequence {
            self.set_sequence(self.sequence().wrapping_add(1));
        }
        if let Some(vector) = new_vector {
            self.vector = *vector;
        }

        bytes[..META_INFO_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_meta_is_current_version() {
        let meta = MetaInfo::default();
        assert_eq!(meta.version(), CURRENT_FORMAT_VERSION as u32);
        assert_eq!(meta.actual_size(), 0);
        assert_eq!(meta.sequence(), 0);
        assert!(meta.uses_random_iv());
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut buf = [0u8; 64];
        let mut meta = MetaInfo::default();
        meta.set_crc_digest(0xDEAD_BEEF);
        meta.set_actual_size(1234);
        meta.write(&mut buf, None, SeqPolicy::KeepSequence).unwrap();

        let read = MetaInfo::read(&buf);
        assert_eq!(read.crc_digest(), 0xDEAD_BEEF);
        assert_eq!(read.actual_size(), 1234);
        assert_eq!(read.sequence(), 0);
    }

    #[test]
    fn layout_is_fixed() {
        let mut buf = [0u8; META_INFO_SIZE];
        let mut meta = MetaInfo::default();
        meta.set_crc_digest(0x0403_0201);
        meta.set_actual_size(0x0807_0605);
        meta.write(&mut buf, Some(&[0xEE; AES_BLOCK_LEN]), SeqPolicy::KeepSequence)
            .unwrap();

        assert_eq!(&buf[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[4..8], &[0x05, 0x06, 0x07, 0x08]);
        assert_eq!(&buf[8..12], &(CURRENT_FORMAT_VERSION as u32).to_le_bytes());
        assert_eq!(&buf[16..32], &[0u8; 16]);
        assert_eq!(&buf[32..48], &[0xEE; 16]);
    }

    #[test]
    fn increase_sequence_bumps_before_writing() {
        let mut buf = [0u8; META_INFO_SIZE];
        let mut meta = MetaInfo::default();

        meta.write(&mut buf, None, SeqPolicy::IncreaseSequence).unwrap();
        assert_eq!(meta.sequence(), 1);
        assert_eq!(MetaInfo::read(&buf).sequence(), 1);

        meta.write(&mut buf, None, SeqPolicy::KeepSequence).unwrap();
        assert_eq!(MetaInfo::read(&buf).sequence(), 1);
    }

    #[test]
    fn short_buffer_reads_as_empty_baseline() {
        let meta = MetaInfo::read(&[0u8; 10]);
        assert_eq!(meta.actual_size(), 0);
        assert_eq!(meta.version(), 0);
        assert!(!meta.uses_random_iv());
    }

    #[test]
    fn write_into_short_buffer_fails() {
        let mut buf = [0u8; 16];
        let mut meta = MetaInfo::default();
        assert!(meta.write(&mut buf, None, SeqPolicy::KeepSequence).is_err());
    }
}
