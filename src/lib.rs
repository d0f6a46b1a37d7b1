// SPDX-License-Identifier: GPL-3.0-only

//! camkit - uniform capture API for local webcams and network cameras
//!
//! This library presents any imaging source - a device behind a vendor
//! driver, or a remote camera speaking HTTP/MJPEG - as one continuously
//! refreshing, thread-safe image source with bounded discovery and graceful
//! degradation on transient I/O failure.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`webcam`]: the capture handle and its open/close/dispose state machine
//! - [`device`]: the `Device`/`Driver` capability contracts backends implement
//! - [`executor`]: the per-driver worker serializing all driver access
//! - `updater`: the adaptive background polling loop for async capture
//! - [`discovery`]: bounded-time enumeration and plug/unplug monitoring
//! - [`registry`]: process-wide driver state, auto-open policy, shutdown
//! - [`backends`]: concrete backends (HTTP/MJPEG network cameras)
//!
//! # Example
//!
//! ```no_run
//! use camkit::backends::netcam::{NetcamConfig, NetcamDriver, NetcamMode};
//! use std::time::Duration;
//!
//! let driver = NetcamDriver::new();
//! driver.register(NetcamConfig::new("door", "http://10.0.0.5/video.mjpg", NetcamMode::Push))?;
//! camkit::registry::set_driver(driver);
//!
//! if let Some(webcam) = camkit::registry::default_webcam(Duration::from_secs(30))? {
//!     webcam.open()?;
//!     let frame = webcam.image()?;
//!     webcam.close()?;
//! }
//! # Ok::<(), camkit::errors::CaptureError>(())
//! ```

pub mod backends;
pub mod device;
pub mod discovery;
pub mod errors;
pub mod executor;
pub mod registry;
pub mod types;
mod updater;
pub mod webcam;

// Re-export commonly used types
pub use discovery::{DiscoveryListener, DiscoveryService};
pub use errors::{CaptureError, CaptureResult};
pub use types::{Image, Resolution, SharedImage};
pub use webcam::{Webcam, WebcamEvent, WebcamListener};
