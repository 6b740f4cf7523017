//! # AES-128-CFB Stream Cipher
//!
//! CFB-128 feedback implemented directly over the AES block primitive. The
//! stock stream-cipher wrappers keep their feedback register private, which
//! rules them out here: the engine needs to snapshot the cipher state at
//! arbitrary byte boundaries (one snapshot per indexed key, taken at the
//! byte preceding the value) and later restore it for O(1) point
//! decryption without rescanning the payload from offset zero.
//!
//! ## State Machine
//!
//! The cipher state is `(vector, number)`: a 16-byte feedback register and
//! a position within it. Each processed byte XORs against the encrypted
//! register and feeds the ciphertext byte back in; whenever `number` wraps
//! to 0 the register is block-encrypted in place before use.
//!
//! ```text
//! encrypt one byte:                 decrypt one byte:
//!   if number == 0:                   if number == 0:
//!       vector = AES(vector)              vector = AES(vector)
//!   c = p ^ vector[number]            p = c ^ vector[number]
//!   vector[number] = c                vector[number] = c
//!   number = (number + 1) % 16        number = (number + 1) % 16
//! ```
//!
//! A snapshot is therefore just a copy of `(vector, number)`; restoring it
//! into a cipher built from the same key resumes the stream byte-exactly.
//!
//! ## Keys and IVs
//!
//! Keys are zero-padded or truncated to 16 bytes. The default IV (used by
//! the baseline format generation) is the key itself; the random-IV
//! generation stores a fresh random vector in the meta file instead and
//! rotates it on every full write-back.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::RngCore;

use crate::config::constants::{AES_BLOCK_LEN, AES_KEY_LEN};

/// Resumable cipher position: the feedback register and the byte offset
/// within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesStatus {
    pub number: u8,
    pub vector: [u8; AES_BLOCK_LEN],
}

#[derive(Clone)]
pub struct AesCfb {
    cipher: Aes128,
    key: [u8; AES_KEY_LEN],
    vector: [u8; AES_BLOCK_LEN],
    number: usize,
}

impl std::fmt::Debug for AesCfb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // key material stays out of logs
        f.debug_struct("AesCfb").field("number", &self.number).finish()
    }
}

impl AesCfb {
    /// Zero-pads or truncates a raw key to the AES-128 key length.
    pub fn pad_key(key: &[u8]) -> [u8; AES_KEY_LEN] {
        let mut padded = [0u8; AES_KEY_LEN];
        let take = key.len().min(AES_KEY_LEN);
        padded[..take].copy_from_slice(&key[..take]);
        padded
    }

    /// Builds a cipher from a raw key, zero-padding or truncating it to 16
    /// bytes. The IV starts as the padded key (the baseline default).
    pub fn new(key: &[u8]) -> Self {
        let padded = Self::pad_key(key);
        let cipher = Aes128::new(GenericArray::from_slice(&padded));
        Self {
            cipher,
            key: padded,
            vector: padded,
            number: 0,
        }
    }

    pub fn new_with_iv(key: &[u8], iv: &[u8; AES_BLOCK_LEN]) -> Self {
        let mut crypt = Self::new(key);
        crypt.reset_iv(Some(iv));
        crypt
    }

    /// The padded key, for key-change comparison.
    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    /// Restarts the stream from `iv`, or from the key-derived default.
    pub fn reset_iv(&mut self, iv: Option<&[u8; AES_BLOCK_LEN]>) {
        self.vector = match iv {
            Some(iv) => *iv,
            None => self.key,
        };
        self.number = 0;
    }

    /// Snapshot of the current stream position.
    pub fn status(&self) -> AesStatus {
        AesStatus {
            number: self.number as u8,
            vector: self.vector,
        }
    }

    /// A cipher over the same key resumed at `status`.
    pub fn clone_with_status(&self, status: &AesStatus) -> Self {
        let mut crypt = self.clone();
        crypt.vector = status.vector;
        crypt.number = usize::from(status.number) % AES_BLOCK_LEN;
        crypt
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            if self.number == 0 {
                self.step_register();
            }
            let c = *byte ^ self.vector[self.number];
            self.vector[self.number] = c;
            *byte = c;
            self.number = (self.number + 1) % AES_BLOCK_LEN;
        }
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for byte in buf {
            if self.number == 0 {
                self.step_register();
            }
            let c = *byte;
            *byte = c ^ self.vector[self.number];
            self.vector[self.number] = c;
            self.number = (self.number + 1) % AES_BLOCK_LEN;
        }
    }

    /// Advances the stream position across ciphertext without producing
    /// plaintext. Used when walking the payload to take per-key snapshots.
    pub fn advance_over_ciphertext(&mut self, buf: &[u8]) {
        for &c in buf {
            if self.number == 0 {
                self.step_register();
            }
            self.vector[self.number] = c;
            self.number = (self.number + 1) % AES_BLOCK_LEN;
        }
    }

    fn step_register(&mut self) {
        let block = GenericArray::from_mut_slice(&mut self.vector);
        self.cipher.encrypt_block(block);
    }

    /// A fresh random 16-byte IV for the random-IV format generation.
    pub fn random_iv() -> [u8; AES_BLOCK_LEN] {
        let mut iv = [0u8; AES_BLOCK_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }
}
