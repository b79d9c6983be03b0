//! Startup handshake and the single-threaded request loop.

use std::io::{Read, Write};

use tracing::{info, warn};

use crate::protocol::{OpenModeByte, Opcode, ResponseStatus, AGENT_READY_MARKER};
use crate::wire::{FrameReader, FrameWriter, WireError};

use super::fs_ops::{self, DirEntryResult};

/// Reads the handshake `u32`, echoes it back, and flushes.
pub fn run_handshake<R: Read, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
) -> Result<(), WireError> {
    let magic = reader.read_u32()?;
    writer.write_u32(magic)?;
    writer.flush()?;
    Ok(())
}

/// Runs the dispatch loop until EOF on the opcode read (clean shutdown) or
/// an unrecoverable error (propagated to the caller, who terminates). Takes
/// independently owned read/write halves — the shape a `TcpStream` gives
/// via `try_clone`.
pub fn serve<R: Read, W: Write>(
    mut reader: FrameReader<R>,
    mut writer: FrameWriter<W>,
    mount_root: &str,
) -> Result<(), WireError> {
    loop {
        let opcode_byte = match reader.read_u8() {
            Ok(b) => b,
            Err(WireError::EndOfStream) => {
                info!("client disconnected, shutting down cleanly");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let opcode = match Opcode::from_byte(opcode_byte) {
            Some(op) => op,
            None => {
                warn!(opcode_byte, "unrecognised opcode, terminating");
                return Err(WireError::EndOfStream);
            }
        };
        dispatch_one(opcode, &mut reader, &mut writer, mount_root)?;
        writer.flush()?;
    }
}

fn write_status<W: Write>(writer: &mut FrameWriter<W>, status: ResponseStatus) -> Result<(), WireError> {
    writer.write_u8(status as u8)
}

fn dispatch_one<R: Read, W: Write>(
    opcode: Opcode,
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    mount_root: &str,
) -> Result<(), WireError> {
    match opcode {
        Opcode::StatFile => {
            let path = reader.read_utf8_string()?;
            match fs_ops::stat_file(&path) {
                Ok(stat) => {
                    write_status(writer, ResponseStatus::Success)?;
                    writer.write_u16(stat.mode)?;
                    writer.write_u64(stat.size)?;
                    writer.write_u64(stat.access_time)?;
                    writer.write_u64(stat.write_time)?;
                }
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::ListDirectory => {
            let path = reader.read_utf8_string()?;
            match fs_ops::DirStream::open(&path) {
                Err(status) => write_status(writer, status)?,
                Ok(stream) => {
                    write_status(writer, ResponseStatus::Success)?;
                    for entry in stream {
                        match entry {
                            DirEntryResult::Entry { name, stat } => {
                                writer.write_u8(ResponseStatus::Success as u8)?;
                                writer.write_utf8_string(&name)?;
                                writer.write_u16(stat.mode)?;
                                writer.write_u64(stat.size)?;
                                writer.write_u64(stat.access_time)?;
                                writer.write_u64(stat.write_time)?;
                            }
                            DirEntryResult::Failed { status, .. } => {
                                writer.write_u8(status as u8)?;
                            }
                        }
                    }
                    writer.write_u8(ResponseStatus::NoMoreEntries as u8)?;
                }
            }
        }
        Opcode::CreateDirectory => {
            let path = reader.read_utf8_string()?;
            match fs_ops::create_directory(&path) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::CheckRemoveFile => {
            let path = reader.read_utf8_string()?;
            match fs_ops::check_remove_file(&path) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::CheckRemoveDirectory => {
            let path = reader.read_utf8_string()?;
            match fs_ops::check_remove_directory(&path) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::RemoveFile => {
            let path = reader.read_utf8_string()?;
            match fs_ops::remove_file(&path) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::RemoveDirectory => {
            let path = reader.read_utf8_string()?;
            match fs_ops::remove_directory(&path) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::MoveEntry => {
            let from = reader.read_utf8_string()?;
            let to = reader.read_utf8_string()?;
            let overwrite = reader.read_bool()?;
            match fs_ops::move_entry(&from, &to, overwrite) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::OpenHandle => {
            let path = reader.read_utf8_string()?;
            let mode_byte = reader.read_u8()?;
            let parsed = OpenModeByte::from_byte(mode_byte);
            match parsed {
                None => write_status(writer, ResponseStatus::GenericFailure)?,
                Some(m) => match fs_ops::open_handle(&path, m.read, m.write, m.mode) {
                    Ok(handle) => {
                        write_status(writer, ResponseStatus::Success)?;
                        writer.write_u32(handle)?;
                    }
                    Err(status) => write_status(writer, status)?,
                },
            }
        }
        Opcode::CloseHandle => {
            let handle = reader.read_u32()?;
            fs_ops::close_handle(handle);
            write_status(writer, ResponseStatus::Success)?;
        }
        Opcode::ReadHandle => {
            let handle = reader.read_u32()?;
            let length = reader.read_u32()?;
            let offset = reader.read_u64()?;
            match fs_ops::read_handle(handle, length, offset) {
                Ok(data) => {
                    write_status(writer, ResponseStatus::Success)?;
                    writer.write_u32(data.len() as u32)?;
                    writer.write_bytes(&data)?;
                }
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::WriteHandle => {
            let handle = reader.read_u32()?;
            let offset = reader.read_u64()?;
            let length = reader.read_u32()?;
            let data = reader.read_bytes(length as usize)?;
            match fs_ops::write_handle(handle, offset, &data) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::TruncateHandle => {
            let handle = reader.read_u32()?;
            let new_length = reader.read_u64()?;
            match fs_ops::truncate_handle(handle, new_length) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::SetFileTime => {
            let path = reader.read_utf8_string()?;
            let atime = reader.read_i64()?;
            let mtime = reader.read_i64()?;
            match fs_ops::set_file_time(&path, atime, mtime) {
                Ok(()) => write_status(writer, ResponseStatus::Success)?,
                Err(status) => write_status(writer, status)?,
            }
        }
        Opcode::GetDiskStats => match fs_ops::get_disk_stats(mount_root) {
            Ok(stats) => {
                write_status(writer, ResponseStatus::Success)?;
                writer.write_u64(stats.free_bytes)?;
                writer.write_u64(stats.available_bytes)?;
                writer.write_u64(stats.total_bytes)?;
            }
            Err(status) => write_status(writer, status)?,
        },
    }
    Ok(())
}
