//! Wire-level request/response vocabulary shared by the agent and the host.

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// The handshake magic exchanged (and echoed) when a connection is opened.
pub const HANDSHAKE_MAGIC: u32 = 0xFAFE_5ABE;

/// Default POSIX mode for newly created regular files (`S_IFREG | 0o660`).
pub const DEFAULT_FILE_MODE: u32 = 33200;

/// Default POSIX mode for newly created directories (`S_IFDIR | 0o770`).
pub const DEFAULT_DIRECTORY_MODE: u32 = 16888;

/// A fixed marker the agent prints once the handshake succeeds; the host
/// watches its stdout capture for this prefix before opening the connection.
pub const AGENT_READY_MARKER: &str = "NANDROID_AGENT_READY";

/// One byte identifying the requested operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Opcode {
    StatFile = 0,
    ListDirectory = 1,
    CreateDirectory = 2,
    CheckRemoveFile = 3,
    CheckRemoveDirectory = 4,
    RemoveFile = 5,
    RemoveDirectory = 6,
    MoveEntry = 7,
    OpenHandle = 8,
    CloseHandle = 9,
    ReadHandle = 10,
    WriteHandle = 11,
    TruncateHandle = 12,
    SetFileTime = 13,
    GetDiskStats = 14,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Self> {
        FromPrimitive::from_u8(b)
    }
}

/// One byte reporting how a request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ResponseStatus {
    Success = 0,
    GenericFailure = 1,
    AccessDenied = 2,
    NotADirectory = 3,
    NotAFile = 4,
    FileNotFound = 5,
    FileExists = 6,
    DirectoryNotEmpty = 7,
    NoMoreEntries = 8,
}

impl ResponseStatus {
    pub fn from_byte(b: u8) -> Option<Self> {
        FromPrimitive::from_u8(b)
    }

    pub fn is_success(self) -> bool {
        matches!(self, ResponseStatus::Success)
    }
}

/// Creation disposition carried in the low 6 bits of the `OpenHandle` mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    OpenOnly,
    CreateIfNotExist,
    Truncate,
    CreateOrTruncate,
    CreateAlways,
}

impl OpenMode {
    fn to_bits(self) -> u8 {
        match self {
            OpenMode::OpenOnly => 0,
            OpenMode::CreateIfNotExist => 1,
            OpenMode::Truncate => 2,
            OpenMode::CreateOrTruncate => 3,
            OpenMode::CreateAlways => 4,
        }
    }

    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(OpenMode::OpenOnly),
            1 => Some(OpenMode::CreateIfNotExist),
            2 => Some(OpenMode::Truncate),
            3 => Some(OpenMode::CreateOrTruncate),
            4 => Some(OpenMode::CreateAlways),
            _ => None,
        }
    }
}

/// The full `OpenHandle` mode-and-access byte: `bit7=read, bit6=write, bits5..0=OpenMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenModeByte {
    pub read: bool,
    pub write: bool,
    pub mode: OpenMode,
}

impl OpenModeByte {
    pub fn to_byte(self) -> u8 {
        let mut b = self.mode.to_bits();
        if self.read {
            b |= 0b1000_0000;
        }
        if self.write {
            b |= 0b0100_0000;
        }
        b
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        Some(OpenModeByte {
            read: b & 0b1000_0000 != 0,
            write: b & 0b0100_0000 != 0,
            mode: OpenMode::from_bits(b & 0b0011_1111)?,
        })
    }
}

/// POSIX `stat` snapshot, second-resolution timestamps only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u16,
    pub size: u64,
    pub access_time: u64,
    pub write_time: u64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.mode as u32 & libc_s_ifmt_dir() != 0
    }
}

// Kept free of a hard `libc` import here so this module stays portable; the
// bit tested is POSIX's `S_IFDIR` (0o040000), duplicated as a constant.
fn libc_s_ifmt_dir() -> u32 {
    0o040000
}

/// Filesystem-wide space accounting, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskStats {
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub total_bytes: u64,
}

/// Opaque handle issued by the agent; `None` denotes "no underlying handle"
/// (the host's sentinel `-1`, used for metadata-only opens).
pub type FileHandle = Option<u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_through_its_byte() {
        for raw in 0u8..15 {
            let op = Opcode::from_byte(raw).expect("opcode in range");
            assert_eq!(op as u8, raw);
        }
        assert!(Opcode::from_byte(15).is_none());
    }

    #[test]
    fn status_round_trips_through_its_byte() {
        for raw in 0u8..9 {
            let status = ResponseStatus::from_byte(raw).expect("status in range");
            assert_eq!(status as u8, raw);
        }
    }

    #[test]
    fn open_mode_byte_packs_and_unpacks() {
        let b = OpenModeByte { read: true, write: false, mode: OpenMode::CreateOrTruncate };
        let byte = b.to_byte();
        assert_eq!(OpenModeByte::from_byte(byte), Some(b));
    }
}
