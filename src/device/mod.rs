//! Device discovery, per-device bring-up/teardown, and the periodic tracker
//! that keeps live instances in sync with attached hardware.

pub mod bridge;
pub mod instance;
mod tracker;

pub use bridge::Bridge;
pub use instance::{AgentState, DeviceInstance, ExitReason, NativeDriver};
pub use tracker::DeviceTracker;
