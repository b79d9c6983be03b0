//! Host-side tracker: discovers attached devices and keeps one mounted
//! connection per device, per the configured TTLs and poll cadence.
//!
//! The native filesystem-driver binding (the thing that would actually
//! register a mount point with the host kernel) is external glue out of
//! this crate's scope; [`LoggingDriver`] stands in for it so the lifecycle
//! and tracker machinery can be exercised end-to-end.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use nandroid_bridge::callback::DriverCallbacks;
use nandroid_bridge::config::Config;
use nandroid_bridge::device::{Bridge, DeviceTracker, NativeDriver};
use nandroid_bridge::error::LifecycleError;

/// Stands in for a real native filesystem-driver binding: logs mount and
/// unmount instead of registering a host mount point.
struct LoggingDriver;

impl NativeDriver for LoggingDriver {
    type MountHandle = String;

    fn mount(
        &self,
        volume_name: &str,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Result<Self::MountHandle, LifecycleError> {
        let info = callbacks.get_volume_information();
        tracing::info!(volume = %info.volume_name, "mounted (logging stand-in driver)");
        callbacks.mounted();
        Ok(volume_name.to_string())
    }

    fn unmount(&self, handle: Self::MountHandle) {
        tracing::info!(volume = %handle, "unmounted (logging stand-in driver)");
    }
}

#[derive(Parser)]
#[command(name = "nandroid-hostd")]
struct Args {
    /// Path to an optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the nandroid-agentd binary to push to each device.
    #[arg(long)]
    agent_binary: PathBuf,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_ref())?;

    let bridge = Bridge::new(config.bridge_binary.clone());
    let tracker = DeviceTracker::new(
        bridge,
        || LoggingDriver,
        args.agent_binary,
        config.base_port,
        config.buffer_size,
        config.debug_throughput_log,
        config.agent_ready_timeout(),
        config.stat_ttl(),
        config.scan_period(),
    );

    tracker.run(config.poll_interval());
    Ok(())
}
