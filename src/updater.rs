// SPDX-License-Identifier: GPL-3.0-only

//! Adaptive background polling loop for non-blocking capture
//!
//! The updater keeps refreshing a cached frame for one capture handle so
//! callers never block on device I/O. The loop throttles itself towards a
//! target rate; when the device cannot keep up, the delay collapses to zero
//! and the loop runs at whatever rate the device can serve.

use crate::device::SharedDevice;
use crate::errors::CaptureResult;
use crate::executor::TaskExecutor;
use crate::types::SharedImage;
use crate::webcam::Webcam;
use crossbeam_channel::{Sender, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Upper bound the loop throttles towards
const TARGET_FPS: u64 = 50;

/// Poll step while waiting for the first frame
const PRIMING_POLL: Duration = Duration::from_millis(100);

/// Ceiling on the wait for the first frame
const PRIMING_CEILING: Duration = Duration::from_secs(10);

/// Compute the next fps estimate and inter-read delay from one cycle.
///
/// The estimate is an exponential moving average weighted 4:1 towards
/// history. The delay is whatever remains of the target period after the
/// read, never negative.
pub(crate) fn pace(prev_fps: f64, elapsed: Duration) -> (f64, Duration) {
    let elapsed_ms = (elapsed.as_millis() as u64).max(1);
    let fps = (4.0 * prev_fps + 1000.0 / elapsed_ms as f64) / 5.0;
    let delay = (1000 / TARGET_FPS).saturating_sub(elapsed_ms);
    (fps, Duration::from_millis(delay))
}

/// Background refresher owned by one capture handle.
///
/// Created lazily on first asynchronous open, stopped and discarded on
/// close.
pub(crate) struct Updater {
    device: SharedDevice,
    executor: Arc<TaskExecutor>,
    webcam: Weak<Webcam>,
    image: Mutex<Option<SharedImage>>,
    fps: Mutex<f64>,
    running: Arc<AtomicBool>,
    capture_thread: Mutex<Option<JoinHandle<()>>>,
    notifier: Mutex<Option<(Sender<SharedImage>, JoinHandle<()>)>>,
}

impl Updater {
    pub(crate) fn new(
        device: SharedDevice,
        executor: Arc<TaskExecutor>,
        webcam: Weak<Webcam>,
    ) -> Arc<Self> {
        Arc::new(Self {
            device,
            executor,
            webcam,
            image: Mutex::new(None),
            fps: Mutex::new(0.0),
            running: Arc::new(AtomicBool::new(false)),
            capture_thread: Mutex::new(None),
            notifier: Mutex::new(None),
        })
    }

    /// Prime the cache with one synchronous read and start the loop.
    ///
    /// The priming read means `image()` has something to return immediately
    /// after an asynchronous open, without waiting a full cycle.
    pub(crate) fn start(self: &Arc<Self>) -> CaptureResult<()> {
        let device = Arc::clone(&self.device);
        let primed = self
            .executor
            .submit(move || device.lock().unwrap().read_image())?;
        *self.image.lock().unwrap() = primed.map(Arc::new);

        self.running.store(true, Ordering::SeqCst);
        self.spawn_notifier();
        self.spawn_capture_loop();

        debug!("Webcam updater started");
        Ok(())
    }

    fn spawn_notifier(self: &Arc<Self>) {
        let (tx, rx) = unbounded::<SharedImage>();
        let webcam = self.webcam.clone();
        let handle = thread::spawn(move || {
            for image in rx {
                if let Some(webcam) = webcam.upgrade() {
                    webcam.notify_image(image);
                }
            }
        });
        *self.notifier.lock().unwrap() = Some((tx, handle));
    }

    fn spawn_capture_loop(self: &Arc<Self>) {
        let updater = Arc::clone(self);
        let handle = thread::spawn(move || {
            while updater.running.load(Ordering::SeqCst) {
                let started = Instant::now();

                let device = Arc::clone(&updater.device);
                let result = updater
                    .executor
                    .submit(move || device.lock().unwrap().read_image());

                let elapsed = started.elapsed();
                let (fps, delay) = {
                    let prev = *updater.fps.lock().unwrap();
                    pace(prev, elapsed)
                };
                *updater.fps.lock().unwrap() = fps;

                match result {
                    Ok(Some(image)) => {
                        let image = Arc::new(image);
                        *updater.image.lock().unwrap() = Some(Arc::clone(&image));
                        updater.dispatch_notification(image);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // A failed read does not stop the loop; the device
                        // may recover on the next cycle.
                        warn!(error = %e, "Image read failed, will retry");
                    }
                }

                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
            debug!("Updater capture loop exiting");
        });
        *self.capture_thread.lock().unwrap() = Some(handle);
    }

    /// Hand the frame to the notifier thread so a slow listener cannot
    /// stall the capture loop. The listener always receives the frame
    /// captured at read time, even if the cache moves on meanwhile.
    fn dispatch_notification(&self, image: SharedImage) {
        let has_listeners = self
            .webcam
            .upgrade()
            .is_some_and(|w| w.listener_count() > 0);
        if !has_listeners {
            return;
        }
        if let Some((tx, _)) = self.notifier.lock().unwrap().as_ref() {
            let _ = tx.send(image);
        }
    }

    /// Stop the loop cooperatively and wait for both threads.
    ///
    /// The flag is observed at the top of the next iteration; a read
    /// already in flight completes first.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.capture_thread.lock().unwrap().take()
            && let Err(e) = handle.join()
        {
            warn!("Updater capture thread panicked: {:?}", e);
        }

        if let Some((tx, handle)) = self.notifier.lock().unwrap().take() {
            drop(tx);
            if let Err(e) = handle.join() {
                warn!("Updater notifier thread panicked: {:?}", e);
            }
        }

        debug!("Webcam updater stopped");
    }

    /// Latest cached frame, possibly stale.
    ///
    /// When no frame has ever been cached this bridges the window between
    /// open and the first successful read by polling briefly, up to a fixed
    /// ceiling, before giving up with `None`.
    pub(crate) fn image(&self) -> Option<SharedImage> {
        let mut waited = Duration::ZERO;
        loop {
            if let Some(image) = self.image.lock().unwrap().clone() {
                return Some(image);
            }
            if waited >= PRIMING_CEILING || !self.running.load(Ordering::SeqCst) {
                return None;
            }
            thread::sleep(PRIMING_POLL);
            waited += PRIMING_POLL;
        }
    }

    /// Achieved frame rate, exponentially weighted
    pub(crate) fn fps(&self) -> f64 {
        *self.fps.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pace_slow_device_runs_flat_out() {
        // Reads slower than the 20 ms target period leave no delay.
        let (_, delay) = pace(0.0, Duration::from_millis(50));
        assert_eq!(delay, Duration::ZERO);

        let (_, delay) = pace(30.0, Duration::from_millis(21));
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_pace_fast_device_fills_period() {
        let (_, delay) = pace(0.0, Duration::from_millis(5));
        assert_eq!(delay, Duration::from_millis(15));
    }

    #[test]
    fn test_pace_ema_formula() {
        let (fps, _) = pace(50.0, Duration::from_millis(40));
        // (4 * 50 + 1000/40) / 5
        assert!((fps - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_pace_converges_to_device_rate() {
        // A device serving a frame every 40 ms converges to 25 fps.
        let mut fps = 0.0;
        for _ in 0..200 {
            let (next, _) = pace(fps, Duration::from_millis(40));
            fps = next;
        }
        assert!((fps - 25.0).abs() < 0.1, "fps was {}", fps);
    }
}
