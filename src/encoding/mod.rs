//! # Value Encoding
//!
//! The scalar codec for everything a store can hold. Records in the data
//! file are framed as `varint(key_len) ‖ key ‖ varint(value_len) ‖ value`;
//! this module produces and consumes the `value` bytes (and the varint
//! framing itself), while the engine treats them as opaque runs.
//!
//! - [`varint`]: protobuf-compatible base-128 integers
//! - [`coded`]: cursor readers/writers plus one-shot scalar encoders

pub mod coded;
pub mod varint;

pub use coded::{CodedInput, CodedOutput, ScalarBuffer};
pub use varint::{decode_varint, encode_varint, varint_len};
