//! Buffered frame writer.

use std::io::Write;

use super::{Result, WireError, DEFAULT_BUFFER_SIZE, MAX_STRING_LEN};

/// Writes primitive values into a byte stream, batching small writes into an
/// internal buffer and flushing on overflow. A write whose length equals the
/// buffer size bypasses the buffer entirely, matching the reader's symmetric
/// bypass for large reads.
pub struct FrameWriter<W> {
    inner: W,
    buf: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(inner: W, buffer_size: usize) -> Self {
        Self { inner, buf: Vec::with_capacity(buffer_size) }
    }

    fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() >= self.capacity() {
            self.flush()?;
            self.inner.write_all(data)?;
            return Ok(());
        }
        if self.buf.len() + data.len() > self.capacity() {
            self.flush()?;
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_u64(v as u64)
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    /// Writes a `u16`-length-prefixed UTF-8 string. Fails hard if the payload
    /// exceeds [`MAX_STRING_LEN`] bytes.
    pub fn write_utf8_string(&mut self, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        if bytes.len() > MAX_STRING_LEN {
            return Err(WireError::StringTooLong(bytes.len()));
        }
        self.write_u16(bytes.len() as u16)?;
        self.write_bytes(bytes)
    }

    /// Pushes any buffered bytes to the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()?;
        Ok(())
    }
}
