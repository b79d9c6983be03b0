//! Periodic discovery: diffs the bridge's authorized-device list against
//! live instances, quarantining devices whose bring-up fails.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::device::bridge::Bridge;
use crate::device::instance::{DeviceInstance, NativeDriver};

struct TrackerState<D: NativeDriver> {
    live: HashMap<String, Arc<DeviceInstance<D>>>,
    quarantined: HashSet<String>,
    next_port: u16,
}

/// Owns the map of live device instances and runs the discovery poll loop.
pub struct DeviceTracker<D: NativeDriver> {
    bridge: Bridge,
    driver_factory: Box<dyn Fn() -> D + Send + Sync>,
    agent_binary_path: PathBuf,
    buffer_size: usize,
    debug_throughput_log: bool,
    agent_ready_timeout: Duration,
    stat_ttl: Duration,
    scan_period: Duration,
    state: Mutex<TrackerState<D>>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
}

impl<D: NativeDriver + 'static> DeviceTracker<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bridge: Bridge,
        driver_factory: impl Fn() -> D + Send + Sync + 'static,
        agent_binary_path: PathBuf,
        base_port: u16,
        buffer_size: usize,
        debug_throughput_log: bool,
        agent_ready_timeout: Duration,
        stat_ttl: Duration,
        scan_period: Duration,
    ) -> Self {
        DeviceTracker {
            bridge,
            driver_factory: Box::new(driver_factory),
            agent_binary_path,
            buffer_size,
            debug_throughput_log,
            agent_ready_timeout,
            stat_ttl,
            scan_period,
            state: Mutex::new(TrackerState {
                live: HashMap::new(),
                quarantined: HashSet::new(),
                next_port: base_port,
            }),
            shutdown: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Runs the poll loop until [`Self::request_shutdown`] is called from
    /// another thread. Waits on a condition variable between polls so a
    /// shutdown request wakes it immediately.
    pub fn run(&self, poll_interval: Duration) {
        loop {
            self.poll_once();

            let (lock, condvar) = &*self.shutdown;
            let guard = lock.lock().unwrap();
            let (guard, _) =
                condvar.wait_timeout_while(guard, poll_interval, |shut| !*shut).unwrap();
            if *guard {
                break;
            }
        }
        self.teardown_all();
    }

    pub fn request_shutdown(&self) {
        let (lock, condvar) = &*self.shutdown;
        *lock.lock().unwrap() = true;
        condvar.notify_all();
    }

    fn poll_once(&self) {
        let discovered = match self.bridge.list_devices() {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "bridge device discovery failed this cycle");
                return;
            }
        };
        let discovered_serials: HashSet<String> =
            discovered.into_iter().map(|d| d.serial).collect();

        let mut state = self.state.lock().unwrap();

        let requested_unmount: Vec<String> = state
            .live
            .iter()
            .filter(|(_, instance)| instance.unmount_was_requested())
            .map(|(serial, _)| serial.clone())
            .collect();

        let vanished: Vec<String> = state
            .live
            .keys()
            .filter(|serial| !discovered_serials.contains(*serial))
            .cloned()
            .collect();

        for serial in requested_unmount.into_iter().chain(vanished) {
            if let Some(instance) = state.live.remove(&serial) {
                info!(serial, "tearing down device instance");
                instance.teardown();
            }
        }

        let new_serials: Vec<String> = discovered_serials
            .iter()
            .filter(|serial| !state.live.contains_key(*serial) && !state.quarantined.contains(*serial))
            .cloned()
            .collect();

        for serial in new_serials {
            let port = state.next_port;
            state.next_port = state.next_port.wrapping_add(1);
            let driver = (self.driver_factory)();
            let instance = DeviceInstance::new(
                serial.clone(),
                self.bridge.clone(),
                driver,
                self.agent_ready_timeout,
            );
            match instance.begin(
                &self.agent_binary_path,
                port,
                self.buffer_size,
                self.debug_throughput_log,
                self.stat_ttl,
                self.scan_period,
            ) {
                Ok(()) => {
                    state.live.insert(serial, instance);
                }
                Err(e) => {
                    error!(serial, error = %e, "bring-up failed, quarantining device");
                    state.quarantined.insert(serial);
                }
            }
        }
    }

    fn teardown_all(&self) {
        let mut state = self.state.lock().unwrap();
        for (serial, instance) in state.live.drain() {
            info!(serial, "tearing down device instance at shutdown");
            instance.teardown();
        }
    }

    pub fn live_serials(&self) -> Vec<String> {
        self.state.lock().unwrap().live.keys().cloned().collect()
    }

    pub fn quarantined_serials(&self) -> Vec<String> {
        self.state.lock().unwrap().quarantined.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::DriverCallbacks;
    use crate::error::LifecycleError;
    use std::sync::Arc;

    struct NullDriver;
    impl NativeDriver for NullDriver {
        type MountHandle = ();
        fn mount(&self, _: &str, _: Arc<dyn DriverCallbacks>) -> Result<(), LifecycleError> {
            Ok(())
        }
        fn unmount(&self, _: ()) {}
    }

    #[test]
    fn new_tracker_starts_with_no_live_devices() {
        let tracker = DeviceTracker::new(
            Bridge::new("adb"),
            || NullDriver,
            PathBuf::from("/tmp/agent"),
            25989,
            4096,
            false,
            Duration::from_secs(1),
            crate::caches::STAT_TTL,
            crate::caches::STAT_SCAN_PERIOD,
        );
        assert!(tracker.live_serials().is_empty());
        assert!(tracker.quarantined_serials().is_empty());
    }
}
