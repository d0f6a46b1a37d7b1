// SPDX-License-Identifier: GPL-3.0-only

//! Single-threaded task executor serializing all driver access
//!
//! Every privileged operation against a device (open, close, dispose, frame
//! reads) is wrapped as a task and run by one worker thread per active
//! driver. All devices sharing a driver share this serialization point;
//! parallel calls into native capture stacks are a known source of crashes
//! and corrupted frames.

use crate::errors::{CaptureError, CaptureResult};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send>;

/// Worker owning the only thread allowed to touch a driver.
///
/// Callers block until their task has been dispatched and completed; a
/// failing task is not retried, the error goes back to the submitter.
pub struct TaskExecutor {
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    name: String,
}

impl TaskExecutor {
    /// Spawn the worker thread for the given driver name
    pub fn new(name: &str) -> Self {
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = unbounded();
        let thread_name = format!("{}-executor", name);
        let loop_name = name.to_string();

        debug!(driver = %name, "Starting task executor");

        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for task in receiver {
                    task();
                }
                debug!(driver = %loop_name, "Task executor thread exiting");
            })
            .ok();

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(worker),
            name: name.to_string(),
        }
    }

    /// Run a task on the worker thread and block until it completes.
    ///
    /// Fails with `IllegalState` when the executor has been shut down.
    pub fn submit<T, F>(&self, task: F) -> CaptureResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> CaptureResult<T> + Send + 'static,
    {
        let (result_tx, result_rx) = bounded(1);

        let sender = {
            let guard = self.sender.lock().unwrap();
            match guard.as_ref() {
                Some(sender) => sender.clone(),
                None => {
                    return Err(CaptureError::IllegalState(format!(
                        "task executor for driver '{}' has been shut down",
                        self.name
                    )));
                }
            }
        };

        sender
            .send(Box::new(move || {
                let _ = result_tx.send(task());
            }))
            .map_err(|_| {
                CaptureError::IllegalState(format!(
                    "task executor for driver '{}' has been shut down",
                    self.name
                ))
            })?;

        result_rx.recv().map_err(|_| {
            CaptureError::IllegalState(format!(
                "task executor worker for driver '{}' is gone",
                self.name
            ))
        })?
    }

    /// Stop accepting tasks and wait for the worker to drain and exit
    pub fn shutdown(&self) {
        debug!(driver = %self.name, "Shutting down task executor");

        // Dropping the sender ends the worker's receive loop.
        self.sender.lock().unwrap().take();

        if let Some(handle) = self.worker.lock().unwrap().take()
            && let Err(e) = handle.join()
        {
            warn!(driver = %self.name, "Task executor thread panicked: {:?}", e);
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
