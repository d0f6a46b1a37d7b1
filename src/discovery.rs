// SPDX-License-Identifier: GPL-3.0-only

//! Bounded-time device discovery
//!
//! Enumeration runs on its own thread so a stuck driver can never hang the
//! caller: the caller's wait is bounded by its timeout while the
//! enumeration itself keeps running in the background and later callers
//! can pick up its result. A monitor thread re-enumerates periodically and
//! fires found/removed callbacks exactly once per actual transition.

use crate::device::Driver;
use crate::errors::{CaptureError, CaptureResult};
use crate::executor::TaskExecutor;
use crate::webcam::Webcam;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default period between plug/unplug scans
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(3);

/// Observer of device plug/unplug transitions
#[allow(unused_variables)]
pub trait DiscoveryListener: Send + Sync {
    fn on_device_found(&self, webcam: &Arc<Webcam>) {}
    fn on_device_removed(&self, webcam: &Arc<Webcam>) {}
}

struct ScanState {
    /// Last known device list; `None` until the first enumeration lands
    webcams: Option<Vec<Arc<Webcam>>>,
    /// An enumeration is in flight; a new one must not start concurrently
    scanning: bool,
    /// Failure of the last enumeration, handed to the waiters
    error: Option<CaptureError>,
}

struct Inner {
    driver: Arc<dyn Driver>,
    executor: Arc<TaskExecutor>,
    state: Mutex<ScanState>,
    cond: Condvar,
    listeners: Mutex<Vec<Arc<dyn DiscoveryListener>>>,
    monitor_running: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
    scan_interval: Mutex<Duration>,
}

/// Discovery service scoped to one driver.
///
/// Cloning shares the same underlying state; the registry keeps one
/// instance per active driver and tears it down on driver reset.
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<Inner>,
}

impl DiscoveryService {
    pub fn new(driver: Arc<dyn Driver>, executor: Arc<TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                driver,
                executor,
                state: Mutex::new(ScanState {
                    webcams: None,
                    scanning: false,
                    error: None,
                }),
                cond: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                monitor_running: AtomicBool::new(false),
                monitor: Mutex::new(None),
                scan_interval: Mutex::new(DEFAULT_SCAN_INTERVAL),
            }),
        }
    }

    /// Period between plug/unplug scans of the monitor thread
    pub fn set_scan_interval(&self, interval: Duration) {
        *self.inner.scan_interval.lock().unwrap() = interval;
    }

    /// Enumerate devices, waiting at most `timeout` for the driver.
    ///
    /// A zero timeout is invalid. On timeout the enumeration is not
    /// cancelled, only the wait ends; an effectively-infinite timeout is a
    /// supported, explicit choice. Concurrent callers share one in-flight
    /// enumeration.
    pub fn webcams(&self, timeout: Duration) -> CaptureResult<Vec<Arc<Webcam>>> {
        if timeout.is_zero() {
            return Err(CaptureError::InvalidArgument(
                "discovery timeout must be positive".to_string(),
            ));
        }

        self.trigger_scan();

        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(webcams) = &state.webcams {
                let webcams = webcams.clone();
                drop(state);
                self.start_monitor();
                return Ok(webcams);
            }
            if let Some(error) = state.error.take() {
                return Err(error);
            }

            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) if !remaining.is_zero() => remaining,
                    _ => return Err(CaptureError::DiscoveryTimeout(timeout)),
                },
                // Duration overflow means the caller asked for an
                // effectively-infinite wait.
                None => Duration::from_secs(3600),
            };
            let (next, _) = self
                .inner
                .cond
                .wait_timeout(state, remaining.min(Duration::from_secs(3600)))
                .unwrap();
            state = next;
        }
    }

    /// First discovered device, or `None` when nothing shows up in time
    pub fn default_webcam(&self, timeout: Duration) -> CaptureResult<Option<Arc<Webcam>>> {
        let webcams = self.webcams(timeout)?;
        match webcams.into_iter().next() {
            Some(webcam) => Ok(Some(webcam)),
            None => {
                warn!("No webcam has been detected");
                Ok(None)
            }
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn DiscoveryListener>) {
        self.inner.listeners.lock().unwrap().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        let mut listeners = self.inner.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Kick off one background enumeration unless a result is already
    /// cached or a scan is in flight.
    fn trigger_scan(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.webcams.is_some() || state.scanning {
            return;
        }
        state.scanning = true;
        state.error = None;
        drop(state);

        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            debug!(driver = %inner.driver.name(), "Enumerating devices");
            let result = inner.driver.list_devices();

            let mut state = inner.state.lock().unwrap();
            match result {
                Ok(devices) => {
                    let webcams: Vec<Arc<Webcam>> = devices
                        .into_iter()
                        .map(|d| Webcam::with_executor(d, Arc::clone(&inner.executor)))
                        .collect();
                    info!(driver = %inner.driver.name(), count = webcams.len(), "Devices discovered");
                    state.webcams = Some(webcams);
                }
                Err(e) => {
                    warn!(driver = %inner.driver.name(), error = %e, "Device enumeration failed");
                    state.error = Some(e);
                }
            }
            state.scanning = false;
            inner.cond.notify_all();
        });
    }

    /// Start the plug/unplug monitor once the first list has resolved
    fn start_monitor(&self) {
        if self
            .inner
            .monitor_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::spawn(move || {
            debug!(driver = %inner.driver.name(), "Discovery monitor started");
            while inner.monitor_running.load(Ordering::SeqCst) {
                let interval = *inner.scan_interval.lock().unwrap();
                let step = Duration::from_millis(100);
                let mut slept = Duration::ZERO;
                while slept < interval && inner.monitor_running.load(Ordering::SeqCst) {
                    thread::sleep(step);
                    slept += step;
                }
                if !inner.monitor_running.load(Ordering::SeqCst) {
                    break;
                }

                let listed = match inner.driver.list_devices() {
                    Ok(devices) => devices,
                    Err(e) => {
                        warn!(error = %e, "Monitor enumeration failed");
                        continue;
                    }
                };

                Self::apply_diff(&inner, listed);
            }
            debug!(driver = %inner.driver.name(), "Discovery monitor exiting");
        });
        *self.inner.monitor.lock().unwrap() = Some(handle);
    }

    /// Diff a fresh enumeration against the cached list and fire each
    /// transition exactly once. An unchanged list produces no events.
    fn apply_diff(inner: &Arc<Inner>, listed: Vec<Box<dyn crate::device::Device>>) {
        let mut found = Vec::new();
        let mut removed = Vec::new();
        {
            let mut state = inner.state.lock().unwrap();
            let current = state.webcams.get_or_insert_with(Vec::new);
            let listed_names: Vec<String> = listed.iter().map(|d| d.name()).collect();

            for device in listed {
                if !current.iter().any(|w| w.name() == device.name()) {
                    let webcam = Webcam::with_executor(device, Arc::clone(&inner.executor));
                    current.push(Arc::clone(&webcam));
                    found.push(webcam);
                }
            }
            current.retain(|w| {
                if listed_names.iter().any(|n| n == w.name()) {
                    true
                } else {
                    removed.push(Arc::clone(w));
                    false
                }
            });
        }

        let listeners = inner.listeners.lock().unwrap().clone();
        for webcam in &found {
            info!(name = %webcam.name(), "Webcam connected");
            for listener in &listeners {
                Self::isolate(|| listener.on_device_found(webcam));
            }
        }
        for webcam in &removed {
            info!(name = %webcam.name(), "Webcam disconnected");
            webcam.dispose();
            for listener in &listeners {
                Self::isolate(|| listener.on_device_removed(webcam));
            }
        }
    }

    fn isolate(call: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(call)).is_err() {
            error!("Discovery listener panicked");
        }
    }

    /// Stop the monitor and drop the cached device list
    pub fn shutdown(&self) {
        self.inner.monitor_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.monitor.lock().unwrap().take()
            && let Err(e) = handle.join()
        {
            warn!("Discovery monitor thread panicked: {:?}", e);
        }

        let mut state = self.inner.state.lock().unwrap();
        state.webcams = None;
        state.error = None;
        debug!("Discovery service shut down");
    }
}
