//! # Coded Scalar Readers and Writers
//!
//! Cursor types that encode and decode the primitive scalars a store can
//! hold. The engine never interprets value bytes itself; it hands them to
//! `CodedInput` / `CodedOutput` at the API boundary and treats them as
//! opaque runs everywhere else.
//!
//! ## Wire Mapping
//!
//! | Type             | Encoding                                  |
//! |------------------|-------------------------------------------|
//! | bool             | varint 0/1                                |
//! | i32 / i64        | varint, sign-extended to 64 bits          |
//! | u32 / u64        | varint                                    |
//! | f32              | 4-byte little-endian                      |
//! | f64              | 8-byte little-endian                      |
//! | bytes / string   | varint(len) ‖ raw bytes                   |
//! | list of strings  | concatenation of varint(len) ‖ utf-8 items|
//!
//! `CodedOutput` writes into a caller-provided slice and fails (rather than
//! reallocating) when the slice is too small; sizes are computed up front
//! with the `*_size` helpers so buffers are always exact.

use eyre::{ensure, Result, WrapErr};
use smallvec::SmallVec;

use super::varint::{decode_varint, encode_varint, varint_len, varint_len_i32};

/// Encoded scalars are at most 10 bytes; value buffers for scalar sets
/// never leave the stack.
pub type ScalarBuffer = SmallVec<[u8; 16]>;

pub fn bool_size() -> usize {
    1
}

pub fn i32_size(value: i32) -> usize {
    varint_len_i32(value)
}

pub fn u32_size(value: u32) -> usize {
    varint_len(u64::from(value))
}

pub fn i64_size(value: i64) -> usize {
    varint_len(value as u64)
}

pub fn u64_size(value: u64) -> usize {
    varint_len(value)
}

pub fn f32_size() -> usize {
    4
}

pub fn f64_size() -> usize {
    8
}

/// Size of a length-prefixed byte run.
pub fn data_size(len: usize) -> usize {
    varint_len(len as u64) + len
}

/// Writer positioned over a fixed-size output slice.
pub struct CodedOutput<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> CodedOutput<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn space_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn write_raw_varint(&mut self, value: u64) -> Result<()> {
        let needed = varint_len(value);
        ensure!(
            self.space_left() >= needed,
            "output overflow: need {} bytes, {} left",
            needed,
            self.space_left()
        );
        let written = encode_varint(value, &mut self.buf[self.pos..]);
        self.pos += written;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_raw_varint(u64::from(value))
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_raw_varint(value as i64 as u64)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw_varint(u64::from(value))
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_raw_varint(value as u64)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw_varint(value)
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_raw_bytes(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_raw_bytes(&value.to_le_bytes())
    }

    pub fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        ensure!(
            self.space_left() >= bytes.len(),
            "output overflow: need {} bytes, {} left",
            bytes.len(),
            self.space_left()
        );
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes `varint(len) ‖ bytes`.
    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_raw_varint(bytes.len() as u64)?;
        self.write_raw_bytes(bytes)
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_data(value.as_bytes())
    }
}

/// Reader positioned over an input slice.
pub struct CodedInput<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> CodedInput<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_raw_varint(&mut self) -> Result<u64> {
        let (value, read) = decode_varint(&self.buf[self.pos..])?;
        self.pos += read;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_raw_varint()? != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_raw_varint()? as i32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_raw_varint()? as u32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_raw_varint()? as i64)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_raw_varint()
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        let bytes = self.read_raw_bytes(4)?;
        // INVARIANT: read_raw_bytes returned exactly 4 bytes
        Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_raw_bytes(8)?;
        // INVARIANT: read_raw_bytes returned exactly 8 bytes
        Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_raw_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        ensure!(
            self.buf.len() - self.pos >= len,
            "input underflow: need {} bytes, {} left",
            len,
            self.buf.len() - self.pos
        );
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads `varint(len) ‖ bytes`, returning the raw byte run.
    pub fn read_data(&mut self) -> Result<&'a [u8]> {
        let len = self.read_raw_varint()?;
        ensure!(
            len <= (self.buf.len() - self.pos) as u64,
            "length prefix {} exceeds remaining input {}",
            len,
            self.buf.len() - self.pos
        );
        self.read_raw_bytes(len as usize)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_data()?;
        String::from_utf8(bytes.to_vec()).wrap_err("string value is not valid utf-8")
    }
}

/// Encodes a scalar into an exact-size stack buffer.
macro_rules! encode_scalar {
    ($size:expr, $write:ident, $value:expr) => {{
        let mut buf = ScalarBuffer::new();
        buf.resize($size, 0);
        let mut output = CodedOutput::new(&mut buf);
        // INVARIANT: buffer sized by the matching *_size helper
        output.$write($value).unwrap();
        buf
    }};
}

pub fn encode_bool(value: bool) -> ScalarBuffer {
    encode_scalar!(bool_size(), write_bool, value)
}

pub fn encode_i32(value: i32) -> ScalarBuffer {
    encode_scalar!(i32_size(value), write_i32, value)
}

pub fn encode_u32(value: u32) -> ScalarBuffer {
    encode_scalar!(u32_size(value), write_u32, value)
}

pub fn encode_i64(value: i64) -> ScalarBuffer {
    encode_scalar!(i64_size(value), write_i64, value)
}

pub fn encode_u64(value: u64) -> ScalarBuffer {
    encode_scalar!(u64_size(value), write_u64, value)
}

pub fn encode_f32(value: f32) -> ScalarBuffer {
    encode_scalar!(f32_size(), write_f32, value)
}

pub fn encode_f64(value: f64) -> ScalarBuffer {
    encode_scalar!(f64_size(), write_f64, value)
}

/// Encodes a byte run with its varint length prefix. This is the stored
/// value shape for strings, bytes, and other data-holder types.
pub fn encode_data(bytes: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; data_size(bytes.len())];
    let mut output = CodedOutput::new(&mut buf);
    // INVARIANT: buffer sized by data_size for these exact bytes
    output.write_data(bytes).unwrap();
    buf
}

/// Encodes a list of strings as concatenated length-prefixed items.
pub fn encode_string_list(items: &[String]) -> Vec<u8> {
    let total: usize = items.iter().map(|s| data_size(s.len())).sum();
    let mut buf = vec![0u8; total];
    let mut output = CodedOutput::new(&mut buf);
    for item in items {
        // INVARIANT: buffer sized from the same items two lines above
        output.write_string(item).unwrap();
    }
    buf
}

/// Decodes a list of strings encoded by [`encode_string_list`].
pub fn decode_string_list(bytes: &[u8]) -> Result<Vec<String>> {
    let mut input = CodedInput::new(bytes);
    let mut items = Vec::new();
    while !input.is_at_end() {
        items.push(input.read_string()?);
    }
    Ok(items)
}
