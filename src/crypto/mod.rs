//! # Payload Encryption
//!
//! AES-128-CFB streaming for crypt-mode stores. The whole payload region is
//! one continuous cipher stream; the index keeps a [`AesStatus`] snapshot
//! per key so point reads decrypt only their own value bytes.

mod cfb;

pub use cfb::{AesCfb, AesStatus};
