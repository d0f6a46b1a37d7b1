// SPDX-License-Identifier: GPL-3.0-only

//! Shared value types for the capture API

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decoded frame in RGB8 layout.
pub type Image = image::RgbImage;

/// Latest-frame handle shared between the capture thread and readers.
///
/// The whole frame sits behind one reference, so a reader always observes a
/// complete image or none at all.
pub type SharedImage = Arc<Image>;

/// Picture size in pixels
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// 320x240
    pub const QVGA: Resolution = Resolution::new(320, 240);
    /// 640x480
    pub const VGA: Resolution = Resolution::new(640, 480);
    /// 1280x720
    pub const HD: Resolution = Resolution::new(1280, 720);
    /// 1920x1080
    pub const FULL_HD: Resolution = Resolution::new(1920, 1080);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Resolution of a decoded frame
    pub fn of_image(image: &Image) -> Self {
        Self::new(image.width(), image.height())
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Flatten a frame into raw RGB bytes, 3 bytes per pixel in sRGB order.
pub fn to_raw_bytes(image: &Image) -> Arc<[u8]> {
    Arc::from(image.as_raw().as_slice())
}
