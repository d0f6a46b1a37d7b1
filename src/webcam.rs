// SPDX-License-Identifier: GPL-3.0-only

//! Capture handle wrapping one device
//!
//! `Webcam` owns a single [`Device`](crate::device::Device) and serializes
//! every interaction with it through the driver's task executor. The handle
//! is a small state machine: closed (initial), open, disposed (terminal).
//! `open` may toggle any number of times; once disposed the handle is
//! permanently unusable.

use crate::device::{Device, SharedDevice};
use crate::errors::{CaptureError, CaptureResult};
use crate::executor::TaskExecutor;
use crate::registry;
use crate::types::{self, Resolution, SharedImage};
use crate::updater::Updater;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Payload handed to webcam listeners
#[derive(Clone)]
pub struct WebcamEvent {
    /// Name of the webcam the event originates from
    pub name: String,
    /// Frame attached to image notifications, absent for lifecycle events
    pub image: Option<SharedImage>,
}

/// Observer of webcam lifecycle transitions and new frames.
///
/// Callbacks run synchronously with the transition (or on the updater's
/// notifier thread for frames) and are isolated: a panicking listener is
/// logged and does not affect other listeners or the transition itself.
#[allow(unused_variables)]
pub trait WebcamListener: Send + Sync {
    fn on_open(&self, event: &WebcamEvent) {}
    fn on_close(&self, event: &WebcamEvent) {}
    fn on_dispose(&self, event: &WebcamEvent) {}
    fn on_image(&self, event: &WebcamEvent) {}
}

/// Capture handle for one device
pub struct Webcam {
    device: SharedDevice,
    executor: Arc<TaskExecutor>,
    name: String,
    listeners: Mutex<Vec<Arc<dyn WebcamListener>>>,
    custom_sizes: Mutex<Vec<Resolution>>,
    open: AtomicBool,
    disposed: AtomicBool,
    asynchronous: AtomicBool,
    updater: Mutex<Option<Arc<Updater>>>,
}

impl Webcam {
    /// Wrap a device using the executor of the active driver
    pub fn new(device: Box<dyn Device>) -> CaptureResult<Arc<Self>> {
        let executor = registry::executor()?;
        Ok(Self::with_executor(device, executor))
    }

    /// Wrap a device with an explicit executor.
    ///
    /// Useful for embedding without the process-wide registry; all devices
    /// of one driver must share a single executor.
    pub fn with_executor(device: Box<dyn Device>, executor: Arc<TaskExecutor>) -> Arc<Self> {
        let name = device.name();
        Arc::new(Self {
            device: Arc::new(Mutex::new(device)),
            executor,
            name,
            listeners: Mutex::new(Vec::new()),
            custom_sizes: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            asynchronous: AtomicBool::new(false),
            updater: Mutex::new(None),
        })
    }

    /// Open in blocking (synchronous) mode: every `image()` call reads a
    /// fresh frame from the device.
    pub fn open(self: &Arc<Self>) -> CaptureResult<()> {
        self.open_mode(false)
    }

    /// Open in non-blocking (asynchronous) mode: a background updater keeps
    /// a cached frame refreshed and `image()` returns it without touching
    /// the device.
    pub fn open_async(self: &Arc<Self>) -> CaptureResult<()> {
        self.open_mode(true)
    }

    fn open_mode(self: &Arc<Self>, asynchronous: bool) -> CaptureResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CaptureError::IllegalState(format!(
                "webcam {} has been disposed",
                self.name
            )));
        }

        // Opening an already open webcam is a no-op, not an error.
        if self
            .open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(name = %self.name, "Webcam is already open");
            return Ok(());
        }

        let device = Arc::clone(&self.device);
        if let Err(e) = self.executor.submit(move || device.lock().unwrap().open()) {
            self.open.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if asynchronous
            && self
                .asynchronous
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let updater = Updater::new(
                Arc::clone(&self.device),
                Arc::clone(&self.executor),
                Arc::downgrade(self),
            );
            if let Err(e) = updater.start() {
                self.asynchronous.store(false, Ordering::SeqCst);
                let device = Arc::clone(&self.device);
                let _ = self.executor.submit(move || device.lock().unwrap().close());
                self.open.store(false, Ordering::SeqCst);
                return Err(e);
            }
            *self.updater.lock().unwrap() = Some(updater);
        }

        registry::register_handle(self);

        info!(name = %self.name, asynchronous, "Webcam is now open");
        self.notify_lifecycle("open", |l, e| l.on_open(e));
        Ok(())
    }

    /// Close the webcam. No-op when already closed.
    pub fn close(self: &Arc<Self>) -> CaptureResult<()> {
        if self
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(name = %self.name, "Webcam is already closed");
            return Ok(());
        }

        self.stop_updater();

        let device = Arc::clone(&self.device);
        self.executor
            .submit(move || device.lock().unwrap().close())?;

        registry::deregister_handle(self);

        info!(name = %self.name, "Webcam is now closed");
        self.notify_lifecycle("close", |l, e| l.on_close(e));
        Ok(())
    }

    /// Permanently release the underlying device.
    ///
    /// At most one call takes effect; later calls are silent no-ops.
    /// Listeners observe a close notification before the dispose one, even
    /// if the webcam was never explicitly closed.
    pub fn dispose(self: &Arc<Self>) {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.open.store(false, Ordering::SeqCst);
        self.stop_updater();

        info!(name = %self.name, "Disposing webcam");

        let device = Arc::clone(&self.device);
        let _ = self.executor.submit(move || {
            device.lock().unwrap().dispose();
            Ok(())
        });

        let event = self.event(None);
        for listener in self.listeners_snapshot() {
            self.isolate("close", || listener.on_close(&event));
            self.isolate("dispose", || listener.on_dispose(&event));
        }

        registry::deregister_handle(self);

        debug!(name = %self.name, "Webcam disposed");
    }

    fn stop_updater(&self) {
        if self
            .asynchronous
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            && let Some(updater) = self.updater.lock().unwrap().take()
        {
            updater.stop();
        }
    }

    /// Fetch a frame.
    ///
    /// In asynchronous mode this returns the cached frame without blocking
    /// (possibly stale, `None` if nothing arrived within the priming
    /// window). In synchronous mode it performs a fresh read through the
    /// executor, blocking on the device.
    pub fn image(self: &Arc<Self>) -> CaptureResult<Option<SharedImage>> {
        self.ensure_ready()?;

        if self.asynchronous.load(Ordering::SeqCst) {
            let updater = self.updater.lock().unwrap().clone();
            return Ok(updater.and_then(|u| u.image()));
        }

        let device = Arc::clone(&self.device);
        let image = self
            .executor
            .submit(move || device.lock().unwrap().read_image())?;
        Ok(image.map(Arc::new))
    }

    /// Fetch a frame as raw RGB bytes, 3 bytes per pixel.
    ///
    /// Buffer-capable devices serve the bytes directly; for the rest the
    /// decoded frame is flattened.
    pub fn image_bytes(self: &Arc<Self>) -> CaptureResult<Option<Arc<[u8]>>> {
        self.ensure_ready()?;

        let device = Arc::clone(&self.device);
        let direct = self.executor.submit(move || {
            let mut device = device.lock().unwrap();
            match device.buffer_access() {
                Some(buffer) => buffer.read_buffer().map(Some),
                None => Ok(None),
            }
        })?;
        if let Some(bytes) = direct {
            return Ok(Some(bytes));
        }

        Ok(self.image()?.map(|image| types::to_raw_bytes(&image)))
    }

    fn ensure_ready(self: &Arc<Self>) -> CaptureResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CaptureError::IllegalState(format!(
                "webcam {} has been disposed",
                self.name
            )));
        }
        if !self.open.load(Ordering::SeqCst) {
            if registry::auto_open_mode() {
                // Concurrent callers may race here; the CAS inside open()
                // lets exactly one open task through.
                return self.open_mode(false);
            }
            return Err(CaptureError::NotOpen(format!(
                "webcam {} must be open to read images",
                self.name
            )));
        }
        Ok(())
    }

    /// Change the picture size. The device has to be closed first.
    pub fn set_view_size(&self, size: Resolution) -> CaptureResult<()> {
        if self.open.load(Ordering::SeqCst) {
            return Err(CaptureError::IllegalState(
                "cannot change resolution while the webcam is open, close it first".to_string(),
            ));
        }

        if self.view_size() == size {
            return Ok(());
        }

        let native = self.view_sizes()?;
        let custom = self.custom_view_sizes();
        if !native.contains(&size) && !custom.contains(&size) {
            let mut possible = String::new();
            for r in native.iter().chain(custom.iter()) {
                possible.push_str(&format!("[{}] ", r));
            }
            return Err(CaptureError::InvalidArgument(format!(
                "incorrect resolution [{}], possible ones are {}",
                size,
                possible.trim_end()
            )));
        }

        debug!(name = %self.name, resolution = %size, "Setting new resolution");
        self.device.lock().unwrap().set_resolution(size)
    }

    /// Current picture size
    pub fn view_size(&self) -> Resolution {
        self.device.lock().unwrap().resolution()
    }

    /// Picture sizes supported natively by the device
    pub fn view_sizes(&self) -> CaptureResult<Vec<Resolution>> {
        self.device.lock().unwrap().resolutions()
    }

    /// Register additional resolutions the caller knows the device accepts
    pub fn set_custom_view_sizes(&self, sizes: Vec<Resolution>) {
        *self.custom_sizes.lock().unwrap() = sizes;
    }

    pub fn custom_view_sizes(&self) -> Vec<Resolution> {
        self.custom_sizes.lock().unwrap().clone()
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Achieved frame rate in asynchronous mode, 0.0 otherwise
    pub fn fps(&self) -> f64 {
        self.updater
            .lock()
            .unwrap()
            .as_ref()
            .map(|u| u.fps())
            .unwrap_or(0.0)
    }

    pub fn add_listener(&self, listener: Arc<dyn WebcamListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// Remove a previously added listener, comparing by pointer identity
    pub fn remove_listener(&self, listener: &Arc<dyn WebcamListener>) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn WebcamListener>> {
        self.listeners.lock().unwrap().clone()
    }

    fn event(&self, image: Option<SharedImage>) -> WebcamEvent {
        WebcamEvent {
            name: self.name.clone(),
            image,
        }
    }

    fn notify_lifecycle(&self, phase: &str, notify: impl Fn(&dyn WebcamListener, &WebcamEvent)) {
        let event = self.event(None);
        for listener in self.listeners_snapshot() {
            self.isolate(phase, || notify(listener.as_ref(), &event));
        }
    }

    /// Fan a new frame out to listeners. Runs on the updater's notifier
    /// thread so a slow listener cannot delay capture.
    pub(crate) fn notify_image(&self, image: SharedImage) {
        let event = self.event(Some(image));
        for listener in self.listeners_snapshot() {
            self.isolate("image", || listener.on_image(&event));
        }
    }

    fn isolate(&self, phase: &str, call: impl FnOnce()) {
        if catch_unwind(AssertUnwindSafe(call)).is_err() {
            error!(name = %self.name, phase, "Webcam listener panicked");
        }
    }
}

impl std::fmt::Display for Webcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Webcam {}", self.name)
    }
}

impl std::fmt::Debug for Webcam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Webcam")
            .field("name", &self.name)
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .field("asynchronous", &self.asynchronous.load(Ordering::SeqCst))
            .finish()
    }
}
