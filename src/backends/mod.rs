// SPDX-License-Identifier: GPL-3.0-only

//! Concrete device backends
//!
//! Vendor/native capture stacks plug in through the
//! [`Driver`](crate::device::Driver) and [`Device`](crate::device::Device)
//! contracts; this tree ships the backend that needs no native code, the
//! HTTP/MJPEG network camera.

pub mod netcam;
