//! Per-device bring-up and teardown: push the agent, forward the port,
//! spawn it, wait for readiness, open the connection, mount.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::callback::{DriverCallbacks, FilesystemAdapter, UnmountOnFailure};
use crate::device::bridge::{Bridge, AGENT_DEST_PATH, AGENT_DEVICE_PORT};
use crate::error::LifecycleError;
use crate::host::Connection;

/// Why the agent-monitoring thread stopped.
#[derive(Debug, Clone)]
pub enum ExitReason {
    ProcessExited { exit_code: Option<i32> },
    IoError(String),
}

/// Startup/liveness state, replacing the reference design's ad-hoc booleans
/// (spec §9): one mutex guards the transitions, one condvar wakes both the
/// startup wait and the teardown wait.
#[derive(Debug, Clone)]
pub enum AgentState {
    Starting,
    Ready,
    Exited(ExitReason),
}

/// Anything a device instance needs to mount against; the real native
/// filesystem-driver binding is external glue and is not implemented here.
pub trait NativeDriver: Send + Sync {
    type MountHandle: Send;

    /// Returning `Err(LifecycleError::NoMountPointAvailable)` signals a mount
    /// point collision only — `begin` retries with the next candidate letter
    /// rather than treating it as fatal. Any other error aborts immediately.
    fn mount(
        &self,
        volume_name: &str,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Result<Self::MountHandle, LifecycleError>;

    fn unmount(&self, handle: Self::MountHandle);
}

/// Drive letters walked in order when the driver reports a mount-point
/// collision; mirrors the upstream `D..Z` search.
const MOUNT_POINT_CANDIDATES: std::ops::RangeInclusive<u8> = b'D'..=b'Z';

struct AgentMonitor {
    state: Mutex<AgentState>,
    condvar: Condvar,
}

impl AgentMonitor {
    fn new() -> Self {
        AgentMonitor { state: Mutex::new(AgentState::Starting), condvar: Condvar::new() }
    }

    fn signal_ready(&self) {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, AgentState::Starting) {
            *state = AgentState::Ready;
            self.condvar.notify_all();
        }
    }

    fn signal_exited(&self, reason: ExitReason) {
        let mut state = self.state.lock().unwrap();
        *state = AgentState::Exited(reason);
        self.condvar.notify_all();
    }

    /// Waits for `Ready` with a bounded timeout, resolving the open question
    /// around an unbounded startup wait.
    fn wait_ready(&self, timeout: Duration) -> Result<(), LifecycleError> {
        let state = self.state.lock().unwrap();
        let (state, result) = self
            .condvar
            .wait_timeout_while(state, timeout, |s| matches!(s, AgentState::Starting))
            .unwrap();
        if result.timed_out() {
            return Err(LifecycleError::StartupTimeout);
        }
        match &*state {
            AgentState::Ready => Ok(()),
            AgentState::Exited(ExitReason::ProcessExited { exit_code }) => {
                Err(LifecycleError::AgentExited { exit_code: *exit_code })
            }
            AgentState::Exited(ExitReason::IoError(_)) => {
                Err(LifecycleError::AgentExited { exit_code: None })
            }
            AgentState::Starting => unreachable!("condvar only wakes on a state transition"),
        }
    }

    /// Bounded wait used at teardown: are we already dead?
    fn wait_exited(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .condvar
            .wait_timeout_while(state, timeout, |s| !matches!(s, AgentState::Exited(_)))
            .unwrap();
        matches!(*state, AgentState::Exited(_))
    }
}

/// A live device: exactly one agent process and one connection, from
/// `begin()` to teardown.
pub struct DeviceInstance<D: NativeDriver> {
    pub serial: String,
    bridge: Bridge,
    driver: D,
    monitor: Arc<AgentMonitor>,
    agent_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    connection: Mutex<Option<Arc<Connection>>>,
    mount_handle: Mutex<Option<D::MountHandle>>,
    unmount_requested: AtomicBool,
    agent_ready_timeout: Duration,
}

impl<D: NativeDriver> DeviceInstance<D> {
    pub fn new(serial: String, bridge: Bridge, driver: D, agent_ready_timeout: Duration) -> Arc<Self> {
        Arc::new(DeviceInstance {
            serial,
            bridge,
            driver,
            monitor: Arc::new(AgentMonitor::new()),
            agent_thread: Mutex::new(None),
            child: Mutex::new(None),
            connection: Mutex::new(None),
            mount_handle: Mutex::new(None),
            unmount_requested: AtomicBool::new(false),
            agent_ready_timeout,
        })
    }

    /// Pushes the agent, forwards the port, spawns it, waits for readiness,
    /// opens the connection, and mounts.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        self: &Arc<Self>,
        agent_binary_path: &Path,
        host_port: u16,
        buffer_size: usize,
        debug_throughput_log: bool,
        stat_ttl: Duration,
        scan_period: Duration,
    ) -> Result<(), LifecycleError> {
        self.bridge
            .push(&self.serial, agent_binary_path, AGENT_DEST_PATH)
            .map_err(LifecycleError::Bridge)?;
        self.bridge
            .chmod_executable(&self.serial, AGENT_DEST_PATH)
            .map_err(LifecycleError::Bridge)?;
        self.bridge
            .forward(&self.serial, host_port, AGENT_DEVICE_PORT)
            .map_err(LifecycleError::Bridge)?;

        let mut child = self
            .bridge
            .spawn_agent(&self.serial, AGENT_DEST_PATH)
            .map_err(LifecycleError::Bridge)?;
        let stdout = child.stdout.take();
        *self.child.lock().unwrap() = Some(child);

        let monitor = self.monitor.clone();
        let serial = self.serial.clone();
        let thread = std::thread::Builder::new()
            .name(format!("nandroid-agent-relay-{serial}"))
            .spawn(move || monitor_agent_output(stdout, monitor, &serial))
            .expect("spawning the agent stdout relay thread");
        *self.agent_thread.lock().unwrap() = Some(thread);

        self.monitor.wait_ready(self.agent_ready_timeout)?;

        let connection = Connection::connect(
            ("127.0.0.1", host_port),
            buffer_size,
            debug_throughput_log,
            stat_ttl,
            scan_period,
        )?;
        let connection = Arc::new(connection);
        *self.connection.lock().unwrap() = Some(connection.clone());

        let adapter: Arc<dyn DriverCallbacks> = Arc::new(FilesystemAdapter::new(
            Arc::downgrade(&connection),
            Arc::downgrade(self),
            self.serial.clone(),
        ));

        let mut mount_handle = None;
        for letter in MOUNT_POINT_CANDIDATES {
            let candidate = (letter as char).to_string();
            match self.driver.mount(&candidate, adapter.clone()) {
                Ok(handle) => {
                    info!(serial = %self.serial, mount_point = %candidate, "device mounted");
                    mount_handle = Some(handle);
                    break;
                }
                Err(LifecycleError::NoMountPointAvailable) => {
                    warn!(serial = %self.serial, mount_point = %candidate, "mount point collision, trying next letter");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        let mount_handle = mount_handle.ok_or(LifecycleError::NoMountPointAvailable)?;
        *self.mount_handle.lock().unwrap() = Some(mount_handle);

        Ok(())
    }

    /// Unmount via the driver first (blocks until in-flight callbacks
    /// return), then drop the connection so the agent observes EOF, then
    /// wait up to 2s before force-killing.
    pub fn teardown(&self) {
        if let Some(handle) = self.mount_handle.lock().unwrap().take() {
            self.driver.unmount(handle);
        }
        self.connection.lock().unwrap().take();

        if !self.monitor.wait_exited(Duration::from_secs(2)) {
            warn!(serial = %self.serial, "agent still alive after bounded wait, force killing");
            let _ = self.bridge.kill_by_name(&self.serial, "nandroid-agentd");
        }

        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.wait();
        }
        if let Some(thread) = self.agent_thread.lock().unwrap().take() {
            let _ = thread.join();
        }
        info!(serial = %self.serial, "device torn down");
    }

    pub fn unmount_was_requested(&self) -> bool {
        self.unmount_requested.load(Ordering::Relaxed)
    }
}

impl<D: NativeDriver> UnmountOnFailure for DeviceInstance<D> {
    /// Called from the callback adapter on a transport failure. Teardown
    /// itself happens on the tracker's thread the next time it observes
    /// this flag — running it here would re-enter the driver callback the
    /// adapter is still inside of.
    fn request_unmount(&self) {
        self.unmount_requested.store(true, Ordering::Relaxed);
    }
}

fn monitor_agent_output(
    stdout: Option<std::process::ChildStdout>,
    monitor: Arc<AgentMonitor>,
    serial: &str,
) {
    if let Some(stdout) = stdout {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    info!(serial, %line, "agent output");
                    if line.contains(crate::protocol::AGENT_READY_MARKER) {
                        monitor.signal_ready();
                    }
                }
                Err(e) => {
                    monitor.signal_exited(ExitReason::IoError(e.to_string()));
                    return;
                }
            }
        }
    }
    monitor.signal_exited(ExitReason::ProcessExited { exit_code: None });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDriver;
    impl NativeDriver for NullDriver {
        type MountHandle = ();
        fn mount(&self, _: &str, _: Arc<dyn DriverCallbacks>) -> Result<(), LifecycleError> {
            Ok(())
        }
        fn unmount(&self, _: ()) {}
    }

    #[test]
    fn agent_monitor_times_out_when_never_ready() {
        let monitor = AgentMonitor::new();
        let result = monitor.wait_ready(Duration::from_millis(20));
        assert!(matches!(result, Err(LifecycleError::StartupTimeout)));
    }

    #[test]
    fn agent_monitor_reports_ready() {
        let monitor = Arc::new(AgentMonitor::new());
        let m = monitor.clone();
        std::thread::spawn(move || m.signal_ready());
        assert!(monitor.wait_ready(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn agent_monitor_reports_exit_before_ready() {
        let monitor = Arc::new(AgentMonitor::new());
        let m = monitor.clone();
        std::thread::spawn(move || m.signal_exited(ExitReason::ProcessExited { exit_code: Some(1) }));
        let result = monitor.wait_ready(Duration::from_secs(1));
        assert!(matches!(result, Err(LifecycleError::AgentExited { exit_code: Some(1) })));
    }

    #[test]
    fn unmount_request_is_observable() {
        let instance = DeviceInstance::new(
            "serial".into(),
            Bridge::new("adb"),
            NullDriver,
            Duration::from_secs(1),
        );
        assert!(!instance.unmount_was_requested());
        instance.request_unmount();
        assert!(instance.unmount_was_requested());
    }
}
