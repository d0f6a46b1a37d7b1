// SPDX-License-Identifier: GPL-3.0-only

//! Network camera device

use super::push::PushSession;
use super::{NetcamConfig, NetcamMode};
use crate::device::Device;
use crate::errors::{CaptureError, CaptureResult};
use crate::types::{Image, Resolution};
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts to grab a probe frame when detecting the camera resolution
const SIZE_PROBE_ATTEMPTS: u32 = 5;

/// One HTTP camera, in either push (persistent MJPEG stream) or pull
/// (one GET per frame) mode.
pub struct NetcamDevice {
    config: NetcamConfig,
    client: Client,
    /// Shared with in-flight pull requests so a concurrent close turns
    /// their failure into "no image" instead of an error
    open: Arc<AtomicBool>,
    disposed: bool,
    sizes: Option<Vec<Resolution>>,
    size: Option<Resolution>,
    push: Option<Arc<PushSession>>,
}

impl NetcamDevice {
    pub fn new(config: NetcamConfig) -> CaptureResult<Self> {
        // A pull request is a bounded single-image fetch; a push stream
        // must never be cut off by a whole-request timeout.
        let builder = match config.mode {
            NetcamMode::Pull => Client::builder().timeout(Duration::from_secs(30)),
            NetcamMode::Push => Client::builder().timeout(None),
        };
        let client = builder
            .build()
            .map_err(|e| CaptureError::DeviceIo(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            open: Arc::new(AtomicBool::new(false)),
            disposed: false,
            sizes: None,
            size: None,
            push: None,
        })
    }

    fn auth_pair(&self) -> Option<(String, String)> {
        self.config
            .auth
            .as_ref()
            .map(|a| (a.username.clone(), a.password.clone()))
    }

    fn push_image(&mut self) -> CaptureResult<Option<Image>> {
        if self.push.is_none() {
            let session = PushSession::open(
                self.client.clone(),
                self.config.url.clone(),
                self.auth_pair(),
                self.config.fail_on_error,
            )?;
            self.push = Some(session);
        }

        match self.push.as_ref() {
            Some(session) => {
                let shared = session.image()?;
                Ok(Some(shared.as_ref().clone()))
            }
            None => Ok(None),
        }
    }

    fn pull_image(&mut self) -> CaptureResult<Option<Image>> {
        let mut request = self.client.get(&self.config.url);
        if let Some((user, password)) = self.auth_pair() {
            request = request.basic_auth(user, Some(&password));
        }

        let response = match request.send() {
            Ok(response) => response,
            Err(e) => return self.pull_failure(e.into()),
        };

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| CaptureError::DeviceIo("Content-Type header is missing".to_string()))?
            .to_str()
            .map_err(|_| CaptureError::DeviceIo("Content-Type header is not text".to_string()))?
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/") {
            return Err(CaptureError::ModeMismatch(
                "server sent an MJPEG stream, use push mode instead".to_string(),
            ));
        }

        let bytes = match response.bytes() {
            Ok(bytes) => bytes,
            Err(e) => return self.pull_failure(e.into()),
        };

        let image = image::load_from_memory(&bytes)?.to_rgb8();
        Ok(Some(image))
    }

    /// A request that failed because the device was closed underneath it
    /// yields no image rather than an error.
    fn pull_failure(&self, err: CaptureError) -> CaptureResult<Option<Image>> {
        if !self.open.load(Ordering::SeqCst) {
            debug!(name = %self.config.name, "Pull request interrupted by close");
            return Ok(None);
        }
        Err(err)
    }

    /// Grab one frame and use its dimensions as the supported resolution.
    /// Network cameras do not advertise their formats up front.
    fn probe_sizes(&mut self) -> CaptureResult<Vec<Resolution>> {
        let was_open = self.open.load(Ordering::SeqCst);
        if !was_open {
            self.open()?;
        }

        let mut detected = None;
        for _ in 0..SIZE_PROBE_ATTEMPTS {
            match self.read_image() {
                Ok(Some(image)) => {
                    detected = Some(Resolution::of_image(&image));
                    break;
                }
                Ok(None) => continue,
                Err(e) => {
                    if !was_open {
                        let _ = self.close();
                    }
                    return Err(e);
                }
            }
        }

        if !was_open {
            let _ = self.close();
        }

        match detected {
            Some(size) => Ok(vec![size]),
            None => Err(CaptureError::DeviceIo(format!(
                "cannot get initial image from network camera {}",
                self.config.name
            ))),
        }
    }
}

impl Device for NetcamDevice {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn resolutions(&mut self) -> CaptureResult<Vec<Resolution>> {
        if let Some(sizes) = &self.sizes {
            return Ok(sizes.clone());
        }
        let sizes = self.probe_sizes()?;
        self.sizes = Some(sizes.clone());
        if self.size.is_none() {
            self.size = sizes.first().copied();
        }
        Ok(sizes)
    }

    fn resolution(&self) -> Resolution {
        self.size.unwrap_or_default()
    }

    fn set_resolution(&mut self, resolution: Resolution) -> CaptureResult<()> {
        if self.disposed {
            return Err(CaptureError::IllegalState(
                "device has been disposed".to_string(),
            ));
        }
        self.size = Some(resolution);
        Ok(())
    }

    fn open(&mut self) -> CaptureResult<()> {
        if self.disposed {
            return Err(CaptureError::IllegalState(
                "device has been disposed".to_string(),
            ));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> CaptureResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(session) = self.push.take() {
            session.stop();
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if let Err(e) = self.close() {
            warn!(name = %self.config.name, error = %e, "Close during dispose failed");
        }
        self.disposed = true;
    }

    fn read_image(&mut self) -> CaptureResult<Option<Image>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CaptureError::NotOpen(format!(
                "network camera {} is not open",
                self.config.name
            )));
        }
        match self.config.mode {
            NetcamMode::Push => self.push_image(),
            NetcamMode::Pull => self.pull_image(),
        }
    }
}
