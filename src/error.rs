//! Error taxonomy. Plain enums, no external error-derive machinery — each
//! boundary converts once into the type the next layer expects.

use std::fmt;

use crate::protocol::ResponseStatus;
use crate::wire::WireError;

/// Failures raised by the connection/transport layer, above the raw wire codec.
#[derive(Debug)]
pub enum ProtocolError {
    /// The underlying stream failed or hit EOF mid-frame.
    Wire(WireError),
    /// The request succeeded in transport terms but the agent reported a
    /// non-success status that the caller did not special-case.
    Status(ResponseStatus),
    /// The handshake's echoed value did not match what was sent.
    HandshakeMismatch { sent: u32, echoed: u32 },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Wire(e) => write!(f, "{e}"),
            ProtocolError::Status(s) => write!(f, "request failed with status {s:?}"),
            ProtocolError::HandshakeMismatch { sent, echoed } => {
                write!(f, "handshake mismatch: sent {sent:#x}, echoed {echoed:#x}")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<WireError> for ProtocolError {
    fn from(e: WireError) -> Self {
        ProtocolError::Wire(e)
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        ProtocolError::Wire(WireError::Io(e))
    }
}

/// Status translated to the shape a native filesystem driver callback table
/// expects. The real driver binding is out of scope; this stands in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Success,
    ObjectNameNotFound,
    AccessDenied,
    ObjectNameCollision,
    NotADirectory,
    DirectoryNotEmpty,
    Unsuccessful,
}

impl From<ResponseStatus> for DriverStatus {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Success => DriverStatus::Success,
            ResponseStatus::FileNotFound => DriverStatus::ObjectNameNotFound,
            ResponseStatus::AccessDenied => DriverStatus::AccessDenied,
            ResponseStatus::FileExists => DriverStatus::ObjectNameCollision,
            ResponseStatus::NotADirectory => DriverStatus::NotADirectory,
            ResponseStatus::DirectoryNotEmpty => DriverStatus::DirectoryNotEmpty,
            ResponseStatus::GenericFailure
            | ResponseStatus::NotAFile
            | ResponseStatus::NoMoreEntries => DriverStatus::Unsuccessful,
        }
    }
}

/// Errors that can abort bringing a device instance up.
#[derive(Debug)]
pub enum LifecycleError {
    /// The bridge tool (`push`/`forward`/`shell`) itself failed.
    Bridge(std::io::Error),
    /// The agent process exited before reaching `Ready`.
    AgentExited { exit_code: Option<i32> },
    /// The agent never signalled readiness within the bounded wait.
    StartupTimeout,
    /// The handshake or first request to the freshly-spawned agent failed.
    Protocol(ProtocolError),
    /// No drive letter in the configured range could be mounted.
    NoMountPointAvailable,
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::Bridge(e) => write!(f, "bridge tool failed: {e}"),
            LifecycleError::AgentExited { exit_code } => {
                write!(f, "agent process exited before becoming ready (code {exit_code:?})")
            }
            LifecycleError::StartupTimeout => write!(f, "agent did not become ready in time"),
            LifecycleError::Protocol(e) => write!(f, "{e}"),
            LifecycleError::NoMountPointAvailable => write!(f, "no mount point available"),
        }
    }
}

impl std::error::Error for LifecycleError {}

impl From<ProtocolError> for LifecycleError {
    fn from(e: ProtocolError) -> Self {
        LifecycleError::Protocol(e)
    }
}
