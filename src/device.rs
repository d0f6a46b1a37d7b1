// SPDX-License-Identifier: GPL-3.0-only

//! Device and driver capability contracts
//!
//! A [`Device`] is one physical or virtual image source obtained from a
//! [`Driver`]. The capture core never talks to a device directly; every
//! privileged call goes through the per-driver task executor, because many
//! vendor backends are not safe for concurrent invocation even across
//! distinct device handles.

use crate::errors::CaptureResult;
use crate::types::{Image, Resolution};
use std::sync::{Arc, Mutex};

/// One image source owned by exactly one capture handle.
///
/// Lifecycle: constructed by a driver, opened and closed any number of
/// times, disposed exactly once. The resolution may only be changed while
/// the device is closed.
pub trait Device: Send {
    /// Device name as reported by the driver
    fn name(&self) -> String;

    /// Supported picture sizes. May probe the device on first use.
    fn resolutions(&mut self) -> CaptureResult<Vec<Resolution>>;

    /// Currently selected picture size
    fn resolution(&self) -> Resolution;

    /// Select a picture size. Callers guarantee the device is closed.
    fn set_resolution(&mut self, resolution: Resolution) -> CaptureResult<()>;

    fn open(&mut self) -> CaptureResult<()>;

    fn close(&mut self) -> CaptureResult<()>;

    /// Permanently release the device. No operation is valid afterwards.
    fn dispose(&mut self);

    /// Fetch one frame. `Ok(None)` means the device produced nothing, for
    /// example because it was concurrently closed mid-read.
    fn read_image(&mut self) -> CaptureResult<Option<Image>>;

    /// Raw-buffer fast path for buffer-capable devices
    fn buffer_access(&mut self) -> Option<&mut dyn BufferAccess> {
        None
    }
}

/// Optional capability: devices that can serve raw pixel buffers directly,
/// skipping the decode step.
pub trait BufferAccess {
    /// Fetch one frame as raw RGB bytes, 3 bytes per pixel
    fn read_buffer(&mut self) -> CaptureResult<Arc<[u8]>>;
}

/// Device handle shared between the capture handle and worker threads.
/// The mutex is held only inside executor tasks.
pub type SharedDevice = Arc<Mutex<Box<dyn Device>>>;

/// Driver backend contract: enumerates the devices it can serve.
///
/// `list_devices` may block for as long as the underlying stack needs; the
/// discovery service applies the caller's timeout externally.
pub trait Driver: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> String;

    /// Enumerate available devices. Each call constructs fresh handles.
    fn list_devices(&self) -> CaptureResult<Vec<Box<dyn Device>>>;
}
