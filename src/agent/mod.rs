//! The on-device half: a single-threaded request dispatcher serving one
//! connection over one socket.

#[cfg(unix)]
mod dispatcher;
#[cfg(unix)]
mod fs_ops;

#[cfg(unix)]
pub use dispatcher::{run_handshake, serve};
