//! Variable-length wire primitives for encoded cache entries.
//!
//! Integers go through `bincode`'s standard configuration, which writes small
//! values in a single byte and zig-zags signed ones. Presence flags are a raw
//! byte that must be `0` or `1`. Byte strings are an `i32` length followed by
//! the bytes themselves.

use bincode::config::{self, Configuration};
use bincode::{Decode, Encode};

use crate::error::CacheError;

/// Worst-case encoded size of a 32-bit integer.
pub(crate) const MAX_VARINT_SIZE: usize = 5;

/// Worst-case encoded size of a 64-bit integer.
pub(crate) const MAX_VARLONG_SIZE: usize = 9;

fn wire_config() -> Configuration {
    config::standard()
}

/// Append-only encoder over a growable buffer.
pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    fn put<T: Encode>(&mut self, value: T) -> Result<(), CacheError> {
        bincode::encode_into_std_write(value, &mut self.buf, wire_config())?;
        Ok(())
    }

    pub(crate) fn put_i32(&mut self, value: i32) -> Result<(), CacheError> {
        self.put(value)
    }

    pub(crate) fn put_u32(&mut self, value: u32) -> Result<(), CacheError> {
        self.put(value)
    }

    pub(crate) fn put_i64(&mut self, value: i64) -> Result<(), CacheError> {
        self.put(value)
    }

    pub(crate) fn put_u64(&mut self, value: u64) -> Result<(), CacheError> {
        self.put(value)
    }

    /// Writes a count or length, which must fit in a non-negative `i32`.
    pub(crate) fn put_len(&mut self, len: usize, what: &str) -> Result<(), CacheError> {
        let len = i32::try_from(len)
            .map_err(|_| CacheError::encode(format!("{what} {len} does not fit in the format")))?;
        self.put_i32(len)
    }

    pub(crate) fn put_flag(&mut self, present: bool) {
        self.buf.push(u8::from(present));
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8], what: &str) -> Result<(), CacheError> {
        self.put_len(bytes.len(), what)?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a borrowed buffer.
///
/// Every read either consumes exactly the bytes it needs or fails; reading
/// past the end is an error rather than a panic.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn get<T: Decode<()>>(&mut self) -> Result<T, CacheError> {
        let (value, read) = bincode::decode_from_slice(&self.buf[self.pos..], wire_config())?;
        self.pos += read;
        Ok(value)
    }

    pub(crate) fn get_i32(&mut self) -> Result<i32, CacheError> {
        self.get()
    }

    pub(crate) fn get_u32(&mut self) -> Result<u32, CacheError> {
        self.get()
    }

    pub(crate) fn get_i64(&mut self) -> Result<i64, CacheError> {
        self.get()
    }

    pub(crate) fn get_u64(&mut self) -> Result<u64, CacheError> {
        self.get()
    }

    /// Reads a count or length and rejects negative values.
    pub(crate) fn get_len(&mut self, what: &str) -> Result<usize, CacheError> {
        let len = self.get_i32()?;
        usize::try_from(len).map_err(|_| CacheError::decode(format!("negative {what}: {len}")))
    }

    pub(crate) fn get_flag(&mut self, what: &str) -> Result<bool, CacheError> {
        let Some(&byte) = self.buf.get(self.pos) else {
            return Err(CacheError::decode("encoded entry data is incomplete"));
        };
        self.pos += 1;
        match byte {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CacheError::decode(format!(
                "invalid presence marker for {what}: {other}"
            ))),
        }
    }

    pub(crate) fn get_bytes(&mut self, what: &str) -> Result<&'a [u8], CacheError> {
        let len = self.get_len(what)?;
        if len > self.remaining() {
            return Err(CacheError::decode(format!(
                "{what} of {len} bytes overruns the {} remaining",
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Fails unless every byte of the buffer has been consumed.
    pub(crate) fn finish(self) -> Result<(), CacheError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CacheError::decode(format!(
                "serialized entry data has not been fully decoded ({n} bytes left)"
            ))),
        }
    }
}
