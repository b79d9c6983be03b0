//! Framed, buffered (de)serialisation over a minimal `Read`/`Write` capability.
//!
//! The wire format has no alignment padding: integers are big-endian, strings
//! are a `u16` byte length followed by that many UTF-8 bytes.

mod reader;
mod writer;

pub use reader::FrameReader;
pub use writer::FrameWriter;

/// Strings longer than this cannot be framed; enforced as a hard write-time failure.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Default internal buffer size for both reader and writer.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Errors raised while decoding or encoding a frame.
#[derive(Debug)]
pub enum WireError {
    /// The underlying stream returned EOF before a full value could be read.
    EndOfStream,
    /// A string payload exceeded [`MAX_STRING_LEN`].
    StringTooLong(usize),
    /// The underlying byte stream failed.
    Io(std::io::Error),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::EndOfStream => write!(f, "end of stream"),
            WireError::StringTooLong(len) => {
                write!(f, "string of {len} bytes exceeds the {MAX_STRING_LEN}-byte wire limit")
            }
            WireError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<std::io::Error> for WireError {
    fn from(e: std::io::Error) -> Self {
        WireError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, WireError>;
