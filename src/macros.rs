//! # Internal Macros
//!
//! Accessor generation for zerocopy structs that live inside memory-mapped
//! regions and therefore store multi-byte fields as little-endian wrapper
//! types (`U32`).
//!
//! ## le_accessors!
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct MetaInfo {
//!     crc_digest: U32,
//!     sequence: U32,
//! }
//!
//! impl MetaInfo {
//!     le_accessors! {
//!         crc_digest: u32,
//!         sequence: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn crc_digest(&self) -> u32 { self.crc_digest.get() }
//! // pub fn set_crc_digest(&mut self, val: u32) { ... }
//! // pub fn sequence(&self) -> u32 { self.sequence.get() }
//! // pub fn set_sequence(&mut self, val: u32) { ... }
//! ```

/// Generates getter and setter methods for zerocopy little-endian fields.
#[macro_export]
macro_rules! le_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::le_accessors!(@impl $field, $ty);
        )*
    };
}
