// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide capture state
//!
//! One driver is active at a time; it owns the task executor serializing
//! all device access and, lazily, the discovery service. `reset_driver`
//! tears both down; the next use recreates them. The handle registry
//! replaces JVM-style shutdown hooks: handles sign up when opened and a
//! single explicit [`shutdown`] call walks whatever is still live.

use crate::device::Driver;
use crate::discovery::{DiscoveryListener, DiscoveryService};
use crate::errors::{CaptureError, CaptureResult};
use crate::executor::TaskExecutor;
use crate::webcam::Webcam;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info};

struct Backend {
    driver: Arc<dyn Driver>,
    executor: Arc<TaskExecutor>,
    discovery: Option<DiscoveryService>,
}

static BACKEND: Mutex<Option<Backend>> = Mutex::new(None);
static AUTO_OPEN: AtomicBool = AtomicBool::new(false);
static HANDLES: Mutex<Vec<Weak<Webcam>>> = Mutex::new(Vec::new());

/// Install the active driver, replacing (and tearing down) any previous one
pub fn set_driver(driver: impl Driver + 'static) {
    set_boxed_driver(Box::new(driver));
}

pub fn set_boxed_driver(driver: Box<dyn Driver>) {
    reset_driver();

    let name = driver.name();
    info!(driver = %name, "Installing capture driver");

    let backend = Backend {
        driver: Arc::from(driver),
        executor: Arc::new(TaskExecutor::new(&name)),
        discovery: None,
    };
    *BACKEND.lock().unwrap() = Some(backend);
}

/// Tear down the active driver: stops in-flight discovery and the task
/// executor. Live handles keep their executor reference and will observe
/// `IllegalState` on further privileged calls.
pub fn reset_driver() {
    let previous = BACKEND.lock().unwrap().take();
    if let Some(backend) = previous {
        debug!(driver = %backend.driver.name(), "Resetting capture driver");
        if let Some(discovery) = backend.discovery {
            discovery.shutdown();
        }
        backend.executor.shutdown();
    }
}

/// The active driver
pub fn driver() -> CaptureResult<Arc<dyn Driver>> {
    let guard = BACKEND.lock().unwrap();
    guard
        .as_ref()
        .map(|b| Arc::clone(&b.driver))
        .ok_or_else(no_driver)
}

/// Executor of the active driver
pub(crate) fn executor() -> CaptureResult<Arc<TaskExecutor>> {
    let guard = BACKEND.lock().unwrap();
    guard
        .as_ref()
        .map(|b| Arc::clone(&b.executor))
        .ok_or_else(no_driver)
}

fn no_driver() -> CaptureError {
    CaptureError::IllegalState(
        "no capture driver configured, call registry::set_driver first".to_string(),
    )
}

/// Discovery service of the active driver, created lazily
pub fn discovery_service() -> CaptureResult<DiscoveryService> {
    let mut guard = BACKEND.lock().unwrap();
    let backend = guard.as_mut().ok_or_else(no_driver)?;
    let discovery = backend.discovery.get_or_insert_with(|| {
        DiscoveryService::new(Arc::clone(&backend.driver), Arc::clone(&backend.executor))
    });
    Ok(discovery.clone())
}

/// Discover devices, waiting at most `timeout`
pub fn webcams(timeout: Duration) -> CaptureResult<Vec<Arc<Webcam>>> {
    discovery_service()?.webcams(timeout)
}

/// First discovered device, or `None` when nothing shows up in time
pub fn default_webcam(timeout: Duration) -> CaptureResult<Option<Arc<Webcam>>> {
    discovery_service()?.default_webcam(timeout)
}

pub fn add_discovery_listener(listener: Arc<dyn DiscoveryListener>) -> CaptureResult<()> {
    discovery_service()?.add_listener(listener);
    Ok(())
}

/// Enable auto-open: reading from a closed webcam transparently opens it.
///
/// Concurrent callers can race to auto-open; at most one underlying open
/// call proceeds, the rest observe the webcam already open.
pub fn set_auto_open_mode(enabled: bool) {
    AUTO_OPEN.store(enabled, Ordering::SeqCst);
}

pub fn auto_open_mode() -> bool {
    AUTO_OPEN.load(Ordering::SeqCst)
}

/// Record a live handle for the shutdown walk
pub(crate) fn register_handle(webcam: &Arc<Webcam>) {
    let mut handles = HANDLES.lock().unwrap();
    handles.retain(|w| w.upgrade().is_some());
    if !handles.iter().any(|w| w.ptr_eq(&Arc::downgrade(webcam))) {
        handles.push(Arc::downgrade(webcam));
    }
}

pub(crate) fn deregister_handle(webcam: &Arc<Webcam>) {
    let mut handles = HANDLES.lock().unwrap();
    handles.retain(|w| w.upgrade().is_some_and(|h| !Arc::ptr_eq(&h, webcam)));
}

/// Best-effort cleanup of every live handle.
///
/// The owning process calls this once before exit; each still-open webcam
/// is disposed, which closes the device and notifies listeners.
pub fn shutdown() {
    let handles: Vec<Weak<Webcam>> = std::mem::take(&mut *HANDLES.lock().unwrap());
    for weak in handles {
        if let Some(webcam) = weak.upgrade() {
            info!(name = %webcam.name(), "Shutting down webcam");
            webcam.dispose();
        }
    }
}
