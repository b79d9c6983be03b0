//! Mutex-serialized request/response exchange with one agent, plus the two
//! caches the filesystem callback adapter consults before going to the
//! network at all.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::caches::{CachedListing, ConnectionCaches};
use crate::error::ProtocolError;
use crate::protocol::{
    DiskStats, FileStat, OpenMode, OpenModeByte, Opcode, ResponseStatus, HANDSHAKE_MAGIC,
};
use crate::wire::{FrameReader, FrameWriter, WireError};

/// Names the driver asks about purely to humour the host shell; answering
/// `FileNotFound` without a network round trip avoids a steady trickle of
/// pointless stats for a file that will never exist on the device.
const SHORT_CIRCUIT_SUFFIX: &str = "desktop.ini";

/// Byte counter shared between a socket half and the optional debug
/// throughput-logging thread.
#[derive(Default)]
struct Throughput {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

struct CountingReader {
    inner: TcpStream,
    counter: Arc<Throughput>,
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

struct CountingWriter {
    inner: TcpStream,
    counter: Arc<Throughput>,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.counter.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

struct RequestChannel {
    reader: FrameReader<CountingReader>,
    writer: FrameWriter<CountingWriter>,
}

/// Owns one socket to one agent, the caches for that agent's filesystem, and
/// (optionally) a background thread reporting throughput.
pub struct Connection {
    channel: Mutex<RequestChannel>,
    caches: ConnectionCaches,
    throughput: Arc<Throughput>,
    log_thread: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl Connection {
    /// Resolves `addr`, connects to the first candidate that succeeds, and
    /// performs the handshake. `debug_throughput_log` spawns a background
    /// thread that reports cumulative byte counts once a second. `stat_ttl`
    /// and `scan_period` configure both caches this connection keeps.
    pub fn connect(
        addr: impl ToSocketAddrs,
        buffer_size: usize,
        debug_throughput_log: bool,
        stat_ttl: Duration,
        scan_period: Duration,
    ) -> Result<Self, ProtocolError> {
        let mut last_err = None;
        let mut stream = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect(candidate) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            ProtocolError::from(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no candidate address resolved")
            }))
        })?;
        stream.set_nodelay(true)?;

        let throughput = Arc::new(Throughput::default());
        let read_half = CountingReader { inner: stream.try_clone()?, counter: throughput.clone() };
        let write_half = CountingWriter { inner: stream, counter: throughput.clone() };

        let mut reader = FrameReader::with_buffer_size(read_half, buffer_size);
        let mut writer = FrameWriter::with_buffer_size(write_half, buffer_size);

        writer.write_u32(HANDSHAKE_MAGIC)?;
        writer.flush()?;
        let echoed = reader.read_u32()?;
        if echoed != HANDSHAKE_MAGIC {
            return Err(ProtocolError::HandshakeMismatch { sent: HANDSHAKE_MAGIC, echoed });
        }

        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let log_thread = if debug_throughput_log {
            Some(spawn_throughput_logger(throughput.clone(), shutdown.clone()))
        } else {
            None
        };

        Ok(Connection {
            channel: Mutex::new(RequestChannel { reader, writer }),
            caches: ConnectionCaches::with_ttl(stat_ttl, scan_period),
            throughput,
            log_thread,
            shutdown,
        })
    }

    /// Cached, double-checked read path: hits the stat cache outside the
    /// request mutex, then re-checks inside it before going to the network.
    pub fn stat_file(&self, path: &str) -> Result<FileStat, ProtocolError> {
        if let Some(stat) = self.caches.stats.get(path) {
            return Ok(stat);
        }

        let mut guard = self.channel.lock();
        if let Some(stat) = self.caches.stats.get(path) {
            return Ok(stat);
        }
        if path.ends_with(SHORT_CIRCUIT_SUFFIX) {
            return Err(ProtocolError::Status(ResponseStatus::FileNotFound));
        }

        guard.writer.write_u8(Opcode::StatFile as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        let status = read_status(&mut guard.reader)?;
        if status != ResponseStatus::Success {
            return Err(ProtocolError::Status(status));
        }
        let stat = read_file_stat(&mut guard.reader)?;
        self.caches.stats.put(path.to_string(), stat);
        Ok(stat)
    }

    /// Cached, double-checked read path for a directory listing. On a cache
    /// hit, re-derives per-entry stats from the stat cache; entries whose
    /// stat has since expired are skipped rather than failing the whole
    /// listing.
    pub fn list_file_stats(
        &self,
        dir: &str,
        mut consumer: impl FnMut(&str, FileStat),
    ) -> Result<(), ProtocolError> {
        if let Some(listing) = self.caches.listings.get(dir) {
            for name in &listing.entries {
                let full_path = join_path(dir, name);
                if let Some(stat) = self.caches.stats.get(&full_path) {
                    consumer(name, stat);
                }
            }
            return Ok(());
        }

        let mut guard = self.channel.lock();
        if let Some(listing) = self.caches.listings.get(dir) {
            for name in &listing.entries {
                let full_path = join_path(dir, name);
                if let Some(stat) = self.caches.stats.get(&full_path) {
                    consumer(name, stat);
                }
            }
            return Ok(());
        }

        guard.writer.write_u8(Opcode::ListDirectory as u8)?;
        guard.writer.write_utf8_string(dir)?;
        guard.writer.flush()?;

        let outer = read_status(&mut guard.reader)?;
        if outer != ResponseStatus::Success {
            return Err(ProtocolError::Status(outer));
        }

        let mut names = Vec::new();
        loop {
            let status = read_status(&mut guard.reader)?;
            if status == ResponseStatus::NoMoreEntries {
                break;
            }
            if status != ResponseStatus::Success {
                // The per-entry stat failed; no payload follows. Iteration continues.
                continue;
            }
            let name = guard.reader.read_utf8_string()?;
            let stat = read_file_stat(&mut guard.reader)?;
            let full_path = join_path(dir, &name);
            self.caches.stats.put(full_path, stat);
            names.push(name.clone());
            consumer(&name, stat);
        }
        self.caches.listings.put(dir.to_string(), CachedListing { entries: names });
        Ok(())
    }

    pub fn create_directory(&self, path: &str) -> Result<(), ProtocolError> {
        self.caches.invalidate_path_and_parent_listing(path);
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::CreateDirectory as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn move_entry(&self, from: &str, to: &str, overwrite: bool) -> Result<(), ProtocolError> {
        self.caches.invalidate_path_and_parent_listing(from);
        self.caches.invalidate_path_and_parent_listing(to);
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::MoveEntry as u8)?;
        guard.writer.write_utf8_string(from)?;
        guard.writer.write_utf8_string(to)?;
        guard.writer.write_bool(overwrite)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn check_remove_file(&self, path: &str) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::CheckRemoveFile as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn check_remove_directory(&self, path: &str) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::CheckRemoveDirectory as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn remove_file(&self, path: &str) -> Result<(), ProtocolError> {
        self.caches.invalidate_path_and_parent_listing(path);
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::RemoveFile as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn remove_directory(&self, path: &str) -> Result<(), ProtocolError> {
        self.caches.invalidate_path_and_parent_listing(path);
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::RemoveDirectory as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn open_handle(&self, path: &str, mode: OpenModeByte) -> Result<Option<u32>, ProtocolError> {
        if matches!(
            mode.mode,
            OpenMode::CreateAlways | OpenMode::CreateIfNotExist | OpenMode::CreateOrTruncate
        ) {
            self.caches.invalidate_path_and_parent_listing(path);
        }
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::OpenHandle as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.write_u8(mode.to_byte())?;
        guard.writer.flush()?;
        let status = read_status(&mut guard.reader)?;
        if status != ResponseStatus::Success {
            return Err(ProtocolError::Status(status));
        }
        Ok(Some(guard.reader.read_u32()?))
    }

    /// Always succeeds on the wire; errors on the agent's underlying `close`
    /// are swallowed there, not here.
    pub fn close_handle(&self, handle: u32) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::CloseHandle as u8)?;
        guard.writer.write_u32(handle)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn read_handle(&self, handle: u32, length: u32, offset: u64) -> Result<Vec<u8>, ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::ReadHandle as u8)?;
        guard.writer.write_u32(handle)?;
        guard.writer.write_u32(length)?;
        guard.writer.write_u64(offset)?;
        guard.writer.flush()?;
        let status = read_status(&mut guard.reader)?;
        if status != ResponseStatus::Success {
            return Err(ProtocolError::Status(status));
        }
        let actually_read = guard.reader.read_u32()? as usize;
        Ok(guard.reader.read_bytes(actually_read)?)
    }

    pub fn write_handle(&self, handle: u32, offset: u64, data: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::WriteHandle as u8)?;
        guard.writer.write_u32(handle)?;
        guard.writer.write_u64(offset)?;
        guard.writer.write_u32(data.len() as u32)?;
        guard.writer.write_bytes(data)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn truncate_handle(&self, handle: u32, new_length: u64) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::TruncateHandle as u8)?;
        guard.writer.write_u32(handle)?;
        guard.writer.write_u64(new_length)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    /// Invalidates only the stat entry — the parent listing is still valid
    /// since a timestamp change doesn't affect directory membership.
    pub fn set_file_time(&self, path: &str, atime: i64, mtime: i64) -> Result<(), ProtocolError> {
        self.caches.stats.invalidate(path);
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::SetFileTime as u8)?;
        guard.writer.write_utf8_string(path)?;
        guard.writer.write_i64(atime)?;
        guard.writer.write_i64(mtime)?;
        guard.writer.flush()?;
        expect_success(&mut guard.reader)
    }

    pub fn get_disk_stats(&self) -> Result<DiskStats, ProtocolError> {
        let mut guard = self.channel.lock();
        guard.writer.write_u8(Opcode::GetDiskStats as u8)?;
        guard.writer.flush()?;
        let status = read_status(&mut guard.reader)?;
        if status != ResponseStatus::Success {
            return Err(ProtocolError::Status(status));
        }
        Ok(DiskStats {
            free_bytes: guard.reader.read_u64()?,
            available_bytes: guard.reader.read_u64()?,
            total_bytes: guard.reader.read_u64()?,
        })
    }

    pub fn cache_statistics(&self) -> (crate::cache::CacheStatistics, crate::cache::CacheStatistics) {
        (self.caches.stats.statistics(), self.caches.listings.statistics())
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.log_thread.take() {
            let _ = handle.join();
        }
        let (stat_stats, listing_stats) = self.cache_statistics();
        debug!(%stat_stats, %listing_stats, "connection closing, cache statistics");
    }
}

fn spawn_throughput_logger(
    counter: Arc<Throughput>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("nandroid-throughput".into())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(1));
                let sent = counter.bytes_sent.load(Ordering::Relaxed);
                let received = counter.bytes_received.load(Ordering::Relaxed);
                debug!(sent, received, "connection throughput");
            }
        })
        .expect("spawning the throughput logger thread")
}

fn read_status(reader: &mut FrameReader<CountingReader>) -> Result<ResponseStatus, WireError> {
    let byte = reader.read_u8()?;
    Ok(ResponseStatus::from_byte(byte).unwrap_or_else(|| {
        warn!(byte, "unrecognised status byte from agent, treating as generic failure");
        ResponseStatus::GenericFailure
    }))
}

fn expect_success(reader: &mut FrameReader<CountingReader>) -> Result<(), ProtocolError> {
    let status = read_status(reader)?;
    if status == ResponseStatus::Success {
        Ok(())
    } else {
        Err(ProtocolError::Status(status))
    }
}

fn read_file_stat(reader: &mut FrameReader<CountingReader>) -> Result<FileStat, WireError> {
    Ok(FileStat {
        mode: reader.read_u16()?,
        size: reader.read_u64()?,
        access_time: reader.read_u64()?,
        write_time: reader.read_u64()?,
    })
}

fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn spawn_echo_agent() -> (std::net::SocketAddr, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut magic = [0u8; 4];
            stream.read_exact(&mut magic).unwrap();
            stream.write_all(&magic).unwrap();
        });
        (addr, handle)
    }

    #[test]
    fn handshake_mismatch_fails_construction() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut magic = [0u8; 4];
            stream.read_exact(&mut magic).unwrap();
            stream.write_all(&0u32.to_be_bytes()).unwrap();
        });
        let result = Connection::connect(addr, 4096, false, crate::caches::STAT_TTL, crate::caches::STAT_SCAN_PERIOD);
        assert!(matches!(result, Err(ProtocolError::HandshakeMismatch { .. })));
        handle.join().unwrap();
    }

    #[test]
    fn handshake_succeeds_on_matching_echo() {
        let (addr, handle) = spawn_echo_agent();
        let conn = Connection::connect(addr, 4096, false, crate::caches::STAT_TTL, crate::caches::STAT_SCAN_PERIOD).unwrap();
        drop(conn);
        handle.join().unwrap();
    }

    #[test]
    fn join_path_joins_with_single_slash() {
        assert_eq!(join_path("/sdcard", "a"), "/sdcard/a");
        assert_eq!(join_path("/sdcard/", "a"), "/sdcard/a");
    }
}
