//! Buffered frame reader.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use super::{Result, WireError, DEFAULT_BUFFER_SIZE};

/// Reads primitive values out of a byte stream, maintaining an internal
/// buffer so small reads don't each cost a syscall.
///
/// Buffering algorithm: small requests are satisfied from the buffer,
/// refilling it with a single underlying read when empty. A request at
/// least as large as the buffer, issued while the buffer is empty, reads
/// straight into the destination and only tops the buffer back up with
/// whatever tail comes back smaller than a full buffer.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_buffer_size(inner, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(inner: R, buffer_size: usize) -> Self {
        Self { inner, buf: vec![0u8; buffer_size], pos: 0, len: 0 }
    }

    fn available(&self) -> usize {
        self.len - self.pos
    }

    fn refill(&mut self) -> Result<usize> {
        self.pos = 0;
        self.len = self.inner.read(&mut self.buf)?;
        Ok(self.len)
    }

    /// Reads exactly `dst.len()` bytes, failing with [`WireError::EndOfStream`]
    /// if the underlying stream runs dry first.
    pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.available() == 0 {
                if dst.len() - filled >= self.buf.len() {
                    // Bypass the buffer for the large remaining tail.
                    let n = self.inner.read(&mut dst[filled..])?;
                    if n == 0 {
                        return Err(WireError::EndOfStream);
                    }
                    filled += n;
                    continue;
                }
                if self.refill()? == 0 {
                    return Err(WireError::EndOfStream);
                }
            }
            let take = (dst.len() - filled).min(self.available());
            dst[filled..filled + take].copy_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            filled += take;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok((&b[..]).read_u16::<BigEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok((&b[..]).read_u32::<BigEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok((&b[..]).read_u64::<BigEndian>()?)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a `u16`-length-prefixed UTF-8 string.
    pub fn read_utf8_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| WireError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e,
        )))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }
}
