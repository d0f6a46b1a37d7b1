// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture API

use std::fmt;
use std::time::Duration;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Main capture error type
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// Bad caller input (zero timeout, unsupported resolution, ...)
    InvalidArgument(String),
    /// Operation requires the webcam to be open
    NotOpen(String),
    /// Operation invalid for the current lifecycle state
    IllegalState(String),
    /// Device enumeration exceeded the caller-supplied bound
    DiscoveryTimeout(Duration),
    /// Driver-level open/close/read failure
    DeviceIo(String),
    /// Push stream used in pull mode or vice versa
    ModeMismatch(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CaptureError::NotOpen(msg) => write!(f, "Webcam is not open: {}", msg),
            CaptureError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            CaptureError::DiscoveryTimeout(timeout) => {
                write!(f, "Device discovery timed out after {:?}", timeout)
            }
            CaptureError::DeviceIo(msg) => write!(f, "Device I/O error: {}", msg),
            CaptureError::ModeMismatch(msg) => write!(f, "Mode mismatch: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::DeviceIo(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::DeviceIo(format!("image decode failed: {}", err))
    }
}

impl From<reqwest::Error> for CaptureError {
    fn from(err: reqwest::Error) -> Self {
        CaptureError::DeviceIo(err.to_string())
    }
}
