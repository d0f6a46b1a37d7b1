// SPDX-License-Identifier: GPL-3.0-only

//! HTTP/MJPEG network camera backend
//!
//! Cameras are registered by hand (there is no wire protocol for
//! enumerating IP cameras); the driver hands out one device per
//! registration. Two modes exist:
//!
//! - **push**: the camera serves a persistent `multipart/x-mixed-replace`
//!   stream and a reader thread keeps the latest frame available
//! - **pull**: every frame is one `GET` returning a single image

pub mod device;
mod push;
mod stream;

pub use device::NetcamDevice;

use crate::device::{Device, Driver};
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// How frames are obtained from the camera
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum NetcamMode {
    /// Persistent MJPEG stream over one connection
    Push,
    /// One HTTP request per still image
    #[default]
    Pull,
}

/// HTTP Basic credentials
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetcamAuth {
    pub username: String,
    pub password: String,
}

/// One camera registration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NetcamConfig {
    /// Unique camera name
    pub name: String,
    /// Camera URI, e.g. `http://10.0.0.5/video.mjpg`
    pub url: String,
    pub mode: NetcamMode,
    pub auth: Option<NetcamAuth>,
    /// Make stream errors sticky instead of logging and retrying
    pub fail_on_error: bool,
}

impl NetcamConfig {
    pub fn new(name: &str, url: &str, mode: NetcamMode) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            mode,
            auth: None,
            fail_on_error: false,
        }
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some(NetcamAuth {
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    pub fn fail_on_error(mut self, fail: bool) -> Self {
        self.fail_on_error = fail;
        self
    }
}

/// Driver serving registered network cameras
#[derive(Default)]
pub struct NetcamDriver {
    cameras: Mutex<Vec<NetcamConfig>>,
}

impl NetcamDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera. Names must be unique.
    pub fn register(&self, config: NetcamConfig) -> CaptureResult<()> {
        let mut cameras = self.cameras.lock().unwrap();
        if cameras.iter().any(|c| c.name == config.name) {
            return Err(CaptureError::InvalidArgument(format!(
                "camera name '{}' is already in use",
                config.name
            )));
        }
        info!(name = %config.name, url = %config.url, "Registering network camera");
        cameras.push(config);
        Ok(())
    }

    /// Drop a registration by name
    pub fn unregister(&self, name: &str) -> bool {
        let mut cameras = self.cameras.lock().unwrap();
        let before = cameras.len();
        cameras.retain(|c| c.name != name);
        cameras.len() != before
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.cameras.lock().unwrap().iter().any(|c| c.name == name)
    }
}

impl Driver for NetcamDriver {
    fn name(&self) -> String {
        "netcam".to_string()
    }

    fn list_devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        let cameras = self.cameras.lock().unwrap().clone();
        let mut devices: Vec<Box<dyn Device>> = Vec::with_capacity(cameras.len());
        for config in cameras {
            devices.push(Box::new(NetcamDevice::new(config)?));
        }
        Ok(devices)
    }
}
