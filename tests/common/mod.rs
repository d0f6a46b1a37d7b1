// SPDX-License-Identifier: GPL-3.0-only

//! Shared test fixtures: an in-memory dummy driver and helpers around the
//! process-wide registry.

#![allow(dead_code)]

use camkit::device::{BufferAccess, Device, Driver};
use camkit::errors::{CaptureError, CaptureResult};
use camkit::types::{Image, Resolution};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Counters shared between a dummy device and the test observing it
#[derive(Default)]
pub struct DeviceStats {
    pub opens: AtomicU32,
    pub closes: AtomicU32,
    pub disposes: AtomicU32,
    pub reads: AtomicU32,
}

/// In-memory device producing solid-color frames
pub struct DummyDevice {
    name: String,
    resolutions: Vec<Resolution>,
    resolution: Resolution,
    open: bool,
    disposed: bool,
    read_delay: Duration,
    fail_open: bool,
    pub stats: Arc<DeviceStats>,
}

impl DummyDevice {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resolutions: vec![Resolution::QVGA, Resolution::VGA],
            resolution: Resolution::QVGA,
            open: false,
            disposed: false,
            read_delay: Duration::ZERO,
            fail_open: false,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        Arc::clone(&self.stats)
    }
}

impl Device for DummyDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn resolutions(&mut self) -> CaptureResult<Vec<Resolution>> {
        Ok(self.resolutions.clone())
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn set_resolution(&mut self, resolution: Resolution) -> CaptureResult<()> {
        self.resolution = resolution;
        Ok(())
    }

    fn open(&mut self) -> CaptureResult<()> {
        if self.fail_open {
            return Err(CaptureError::DeviceIo("dummy device refuses to open".to_string()));
        }
        self.open = true;
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> CaptureResult<()> {
        self.open = false;
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn dispose(&mut self) {
        self.open = false;
        self.disposed = true;
        self.stats.disposes.fetch_add(1, Ordering::SeqCst);
    }

    fn read_image(&mut self) -> CaptureResult<Option<Image>> {
        if !self.open {
            return Err(CaptureError::NotOpen("dummy device is closed".to_string()));
        }
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Image::from_pixel(
            self.resolution.width,
            self.resolution.height,
            image::Rgb([0, 128, 255]),
        )))
    }
}

/// Dummy device with the raw-buffer fast path
pub struct BufferDummyDevice {
    inner: DummyDevice,
    buffer: Arc<[u8]>,
}

impl BufferDummyDevice {
    pub fn new(name: &str, buffer: Vec<u8>) -> Self {
        Self {
            inner: DummyDevice::new(name),
            buffer: Arc::from(buffer.as_slice()),
        }
    }
}

impl Device for BufferDummyDevice {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn resolutions(&mut self) -> CaptureResult<Vec<Resolution>> {
        self.inner.resolutions()
    }

    fn resolution(&self) -> Resolution {
        self.inner.resolution()
    }

    fn set_resolution(&mut self, resolution: Resolution) -> CaptureResult<()> {
        self.inner.set_resolution(resolution)
    }

    fn open(&mut self) -> CaptureResult<()> {
        self.inner.open()
    }

    fn close(&mut self) -> CaptureResult<()> {
        self.inner.close()
    }

    fn dispose(&mut self) {
        self.inner.dispose()
    }

    fn read_image(&mut self) -> CaptureResult<Option<Image>> {
        self.inner.read_image()
    }

    fn buffer_access(&mut self) -> Option<&mut dyn BufferAccess> {
        Some(self)
    }
}

impl BufferAccess for BufferDummyDevice {
    fn read_buffer(&mut self) -> CaptureResult<Arc<[u8]>> {
        Ok(Arc::clone(&self.buffer))
    }
}

/// Driver serving a fixed number of dummy devices
pub struct DummyDriver {
    pub device_count: usize,
}

impl DummyDriver {
    pub fn new(device_count: usize) -> Self {
        Self { device_count }
    }
}

impl Driver for DummyDriver {
    fn name(&self) -> String {
        "dummy".to_string()
    }

    fn list_devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        Ok((0..self.device_count)
            .map(|i| Box::new(DummyDevice::new(&format!("dummy-{}", i))) as Box<dyn Device>)
            .collect())
    }
}

/// Driver whose enumeration never returns in any reasonable time
pub struct StuckDriver;

impl Driver for StuckDriver {
    fn name(&self) -> String {
        "stuck".to_string()
    }

    fn list_devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        thread::sleep(Duration::from_secs(3600));
        Ok(Vec::new())
    }
}

/// Driver whose device list the test can mutate, for plug/unplug scenarios
#[derive(Clone, Default)]
pub struct MutableDriver {
    pub names: Arc<Mutex<Vec<String>>>,
    pub stop_enumeration: Arc<AtomicBool>,
}

impl MutableDriver {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: Arc::new(Mutex::new(names.iter().map(|n| n.to_string()).collect())),
            stop_enumeration: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_names(&self, names: &[&str]) {
        *self.names.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
    }
}

impl Driver for MutableDriver {
    fn name(&self) -> String {
        "mutable".to_string()
    }

    fn list_devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        if self.stop_enumeration.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceIo("driver stopped".to_string()));
        }
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|n| Box::new(DummyDevice::new(n)) as Box<dyn Device>)
            .collect())
    }
}

/// Opt-in log output for a test run, honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Serialize tests that touch the process-wide registry.
///
/// A panicking test must not wedge the rest, so poisoning is ignored.
pub fn registry_lock() -> MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
