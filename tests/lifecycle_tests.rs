// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture handle state machine

mod common;

use camkit::errors::CaptureError;
use camkit::executor::TaskExecutor;
use camkit::types::Resolution;
use camkit::webcam::{Webcam, WebcamEvent, WebcamListener};
use common::{BufferDummyDevice, DummyDevice, DummyDriver};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn webcam_with(device: DummyDevice) -> Arc<Webcam> {
    Webcam::with_executor(Box::new(device), Arc::new(TaskExecutor::new("dummy")))
}

#[derive(Default)]
struct CountingListener {
    opens: AtomicU32,
    closes: AtomicU32,
    disposes: AtomicU32,
}

impl WebcamListener for CountingListener {
    fn on_open(&self, _event: &WebcamEvent) {
        self.opens.fetch_add(1, Ordering::SeqCst);
    }
    fn on_close(&self, _event: &WebcamEvent) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
    fn on_dispose(&self, _event: &WebcamEvent) {
        self.disposes.fetch_add(1, Ordering::SeqCst);
    }
}

struct PanickingListener;

impl WebcamListener for PanickingListener {
    fn on_open(&self, _event: &WebcamEvent) {
        panic!("listener on purpose");
    }
}

#[test]
fn test_open_close_cycle() {
    let _guard = common::registry_lock();
    let device = DummyDevice::new("cam");
    let stats = device.stats();
    let webcam = webcam_with(device);

    assert!(!webcam.is_open());
    webcam.open().unwrap();
    assert!(webcam.is_open());

    let image = webcam.image().unwrap().expect("frame expected");
    assert_eq!(Resolution::of_image(&image), Resolution::QVGA);

    webcam.close().unwrap();
    assert!(!webcam.is_open());
    assert_eq!(stats.opens.load(Ordering::SeqCst), 1);
    assert_eq!(stats.closes.load(Ordering::SeqCst), 1);

    // Reading while closed without auto-open is a call-order error.
    assert!(matches!(webcam.image(), Err(CaptureError::NotOpen(_))));
}

#[test]
fn test_open_is_idempotent() {
    let _guard = common::registry_lock();
    let device = DummyDevice::new("cam");
    let stats = device.stats();
    let webcam = webcam_with(device);
    let listener = Arc::new(CountingListener::default());
    webcam.add_listener(listener.clone());

    webcam.open().unwrap();
    webcam.open().unwrap();
    webcam.open().unwrap();

    assert_eq!(stats.opens.load(Ordering::SeqCst), 1, "one device open expected");
    assert_eq!(listener.opens.load(Ordering::SeqCst), 1, "one notification expected");
}

#[test]
fn test_failed_open_leaves_handle_closed() {
    let _guard = common::registry_lock();
    let webcam = webcam_with(DummyDevice::new("cam").failing_open());

    assert!(matches!(webcam.open(), Err(CaptureError::DeviceIo(_))));
    assert!(!webcam.is_open());
}

#[test]
fn test_dispose_is_idempotent() {
    let _guard = common::registry_lock();
    let device = DummyDevice::new("cam");
    let stats = device.stats();
    let webcam = webcam_with(device);
    let listener = Arc::new(CountingListener::default());
    webcam.add_listener(listener.clone());

    webcam.open().unwrap();
    webcam.dispose();
    webcam.dispose();
    webcam.dispose();

    assert!(!webcam.is_open());
    assert!(webcam.is_disposed());
    assert_eq!(stats.disposes.load(Ordering::SeqCst), 1);
    assert_eq!(listener.disposes.load(Ordering::SeqCst), 1);
    // Dispose implies a close notification even without an explicit close.
    assert_eq!(listener.closes.load(Ordering::SeqCst), 1);

    // The handle is permanently unusable.
    assert!(matches!(webcam.open(), Err(CaptureError::IllegalState(_))));
    assert!(matches!(webcam.image(), Err(CaptureError::IllegalState(_))));
}

#[test]
fn test_set_view_size_while_open_fails() {
    let _guard = common::registry_lock();
    let webcam = webcam_with(DummyDevice::new("cam"));
    webcam.open().unwrap();

    // Invalid for the current state regardless of argument validity.
    let valid = webcam.set_view_size(Resolution::VGA);
    assert!(matches!(valid, Err(CaptureError::IllegalState(_))));
    let bogus = webcam.set_view_size(Resolution::new(1, 1));
    assert!(matches!(bogus, Err(CaptureError::IllegalState(_))));
}

#[test]
fn test_set_view_size_validation() {
    let _guard = common::registry_lock();
    let webcam = webcam_with(DummyDevice::new("cam"));

    // Same as current: no-op.
    webcam.set_view_size(Resolution::QVGA).unwrap();

    // Native resolution: accepted.
    webcam.set_view_size(Resolution::VGA).unwrap();
    assert_eq!(webcam.view_size(), Resolution::VGA);

    // Unknown resolution: rejected with the acceptable ones listed.
    let err = webcam.set_view_size(Resolution::new(123, 45)).unwrap_err();
    match err {
        CaptureError::InvalidArgument(msg) => {
            assert!(msg.contains("123x45"));
            assert!(msg.contains("640x480"));
        }
        other => panic!("expected InvalidArgument, got {:?}", other),
    }

    // Caller-registered custom resolution: accepted.
    webcam.set_custom_view_sizes(vec![Resolution::new(123, 45)]);
    webcam.set_view_size(Resolution::new(123, 45)).unwrap();
}

#[test]
fn test_listener_isolation() {
    let _guard = common::registry_lock();
    let webcam = webcam_with(DummyDevice::new("cam"));
    let counting = Arc::new(CountingListener::default());

    // The panicking listener registered first must not starve the second.
    webcam.add_listener(Arc::new(PanickingListener));
    webcam.add_listener(counting.clone());

    webcam.open().unwrap();
    assert!(webcam.is_open(), "open must complete despite the panic");
    assert_eq!(counting.opens.load(Ordering::SeqCst), 1);
}

#[test]
fn test_image_bytes_flattens_frames() {
    let _guard = common::registry_lock();
    let webcam = webcam_with(DummyDevice::new("cam"));
    webcam.open().unwrap();

    let bytes = webcam.image_bytes().unwrap().expect("bytes expected");
    let expected = (Resolution::QVGA.width * Resolution::QVGA.height * 3) as usize;
    assert_eq!(bytes.len(), expected);
}

#[test]
fn test_image_bytes_prefers_buffer_access() {
    let _guard = common::registry_lock();
    let device = BufferDummyDevice::new("buf-cam", vec![1, 2, 3, 4, 5, 6]);
    let webcam = Webcam::with_executor(Box::new(device), Arc::new(TaskExecutor::new("dummy")));
    webcam.open().unwrap();

    let bytes = webcam.image_bytes().unwrap().expect("bytes expected");
    assert_eq!(&bytes[..], &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_async_mode_serves_cached_frames() {
    let _guard = common::registry_lock();
    let device = DummyDevice::new("cam").with_read_delay(Duration::from_millis(5));
    let stats = device.stats();
    let webcam = webcam_with(device);

    webcam.open_async().unwrap();

    // Priming read makes a frame available immediately.
    let first = webcam.image().unwrap();
    assert!(first.is_some());

    std::thread::sleep(Duration::from_millis(300));
    assert!(
        stats.reads.load(Ordering::SeqCst) > 2,
        "updater must keep polling in the background"
    );
    assert!(webcam.fps() > 0.0);

    webcam.close().unwrap();
    let after_close = stats.reads.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(
        stats.reads.load(Ordering::SeqCst),
        after_close,
        "polling must stop with the handle"
    );
}

#[test]
fn test_frame_listener_receives_images() {
    let _guard = common::registry_lock();
    struct FrameListener {
        frames: AtomicU32,
    }
    impl WebcamListener for FrameListener {
        fn on_image(&self, event: &WebcamEvent) {
            assert!(event.image.is_some());
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    let webcam = webcam_with(DummyDevice::new("cam").with_read_delay(Duration::from_millis(5)));
    let listener = Arc::new(FrameListener {
        frames: AtomicU32::new(0),
    });
    webcam.add_listener(listener.clone());

    webcam.open_async().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    webcam.close().unwrap();

    assert!(listener.frames.load(Ordering::SeqCst) > 0);
}

#[test]
fn test_auto_open_mode() {
    let _guard = common::registry_lock();
    camkit::registry::set_driver(DummyDriver::new(1));
    camkit::registry::set_auto_open_mode(true);

    let webcam = camkit::registry::default_webcam(Duration::from_secs(10))
        .unwrap()
        .expect("dummy webcam expected");
    assert!(!webcam.is_open());

    let image = webcam.image().unwrap();
    assert!(image.is_some(), "auto-open must produce a frame");
    assert!(webcam.is_open());

    camkit::registry::set_auto_open_mode(false);
    camkit::registry::reset_driver();
}

#[test]
fn test_shutdown_disposes_live_handles() {
    let _guard = common::registry_lock();
    camkit::registry::set_driver(DummyDriver::new(2));

    let webcams = camkit::registry::webcams(Duration::from_secs(10)).unwrap();
    assert_eq!(webcams.len(), 2);
    for webcam in &webcams {
        webcam.open().unwrap();
    }

    camkit::registry::shutdown();
    for webcam in &webcams {
        assert!(webcam.is_disposed(), "shutdown must dispose {}", webcam.name());
        assert!(!webcam.is_open());
    }

    camkit::registry::reset_driver();
}
