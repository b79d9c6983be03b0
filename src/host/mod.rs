//! The host-side connection façade: one TCP socket per device, wrapped with
//! the two coherent timed caches the filesystem callback adapter reads
//! through.

mod connection;

pub use connection::Connection;
