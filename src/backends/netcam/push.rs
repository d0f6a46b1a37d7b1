// SPDX-License-Identifier: GPL-3.0-only

//! Push-mode streaming session
//!
//! One session per device: a dedicated reader thread pulls frames off the
//! multipart stream, publishes the latest one under a condvar, and
//! reconnects transparently when the server resets the stream. A terminal
//! error is sticky: every later read surfaces it until the session is
//! recreated.

use super::stream::{MjpegStream, StreamError};
use crate::errors::{CaptureError, CaptureResult};
use crate::types::SharedImage;
use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tracing::{debug, error, trace};

struct Slot {
    image: Option<SharedImage>,
    error: Option<CaptureError>,
}

/// Streaming session state shared between the reader thread and callers
pub(crate) struct PushSession {
    url: String,
    auth: Option<(String, String)>,
    client: Client,
    fail_on_error: bool,
    running: Arc<AtomicBool>,
    slot: Mutex<Slot>,
    available: Condvar,
}

impl PushSession {
    /// Connect and start the reader thread.
    ///
    /// Connection and content-type validation happen on the calling thread,
    /// so a misconfigured camera fails fast instead of behind the reader.
    pub(crate) fn open(
        client: Client,
        url: String,
        auth: Option<(String, String)>,
        fail_on_error: bool,
    ) -> CaptureResult<Arc<Self>> {
        let session = Arc::new(Self {
            url,
            auth,
            client,
            fail_on_error,
            running: Arc::new(AtomicBool::new(true)),
            slot: Mutex::new(Slot {
                image: None,
                error: None,
            }),
            available: Condvar::new(),
        });

        let stream = session.connect()?;

        let reader = Arc::clone(&session);
        thread::Builder::new()
            .name("netcam-push-reader".to_string())
            .spawn(move || reader.run(stream))
            .map_err(|e| CaptureError::DeviceIo(format!("cannot spawn reader thread: {}", e)))?;

        Ok(session)
    }

    fn connect(&self) -> CaptureResult<MjpegStream<Response>> {
        let mut request = self.client.get(&self.url);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }
        let response = request.send()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| {
                CaptureError::DeviceIo("Content-Type header is missing".to_string())
            })?
            .to_str()
            .map_err(|_| CaptureError::DeviceIo("Content-Type header is not text".to_string()))?
            .to_ascii_lowercase();

        if content_type.starts_with("image/") {
            return Err(CaptureError::ModeMismatch(
                "server sent a single image, use pull mode instead".to_string(),
            ));
        }
        if !content_type.starts_with("multipart/") {
            return Err(CaptureError::DeviceIo(format!(
                "expected a multipart stream, got content type '{}'",
                content_type
            )));
        }

        Ok(MjpegStream::new(response))
    }

    fn run(self: Arc<Self>, mut stream: MjpegStream<Response>) {
        while self.running.load(Ordering::SeqCst) {
            match stream.read_frame() {
                Ok(image) => {
                    trace!("MJPEG frame received");
                    let mut slot = self.slot.lock().unwrap();
                    slot.image = Some(Arc::new(image));
                    self.available.notify_all();
                }
                Err(StreamError::Reset) => {
                    // Stopping closes the connection under us; that reset
                    // is expected, not an error.
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(url = %self.url, "Stream ended, reconnecting");
                    match self.connect() {
                        Ok(next) => stream = next,
                        Err(e) => {
                            if self.record_failure(e, "reconnect failed") {
                                return;
                            }
                        }
                    }
                }
                Err(StreamError::Io(e)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        debug!("Session closed, reader exiting");
                        break;
                    }
                    if self.record_failure(e.into(), "cannot read MJPEG frame") {
                        return;
                    }
                }
                Err(StreamError::Decode(msg)) => {
                    if self.record_failure(CaptureError::DeviceIo(msg), "cannot decode MJPEG frame")
                    {
                        return;
                    }
                }
            }
        }
        debug!(url = %self.url, "Push reader exiting");
    }

    /// Log a failure; with fail-on-error also arm the sticky error and
    /// report that the loop must terminate.
    fn record_failure(&self, err: CaptureError, context: &str) -> bool {
        error!(url = %self.url, error = %err, "{}", context);
        if self.fail_on_error {
            let mut slot = self.slot.lock().unwrap();
            slot.error = Some(err);
            self.available.notify_all();
            return true;
        }
        false
    }

    /// Latest frame. Blocks until the first frame is produced or a sticky
    /// error is armed; a recorded error is re-raised immediately.
    pub(crate) fn image(&self) -> CaptureResult<SharedImage> {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(err) = &slot.error {
                return Err(err.clone());
            }
            if let Some(image) = &slot.image {
                return Ok(Arc::clone(image));
            }
            slot = self.available.wait(slot).unwrap();
        }
    }

    /// Cooperative stop: the reader observes the flag at its next loop
    /// boundary. No join, a blocked read finishes on its own.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // Release any caller still waiting for a first frame.
        let mut slot = self.slot.lock().unwrap();
        if slot.image.is_none() && slot.error.is_none() {
            slot.error = Some(CaptureError::NotOpen(
                "streaming session was closed before the first frame arrived".to_string(),
            ));
        }
        self.available.notify_all();
    }
}
