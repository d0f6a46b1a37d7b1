// SPDX-License-Identifier: GPL-3.0-only

//! MJPEG stream demultiplexer
//!
//! Extracts one JPEG frame at a time from a `multipart/x-mixed-replace`
//! byte stream by scanning for the JPEG start/end markers. Boundary lines
//! and part headers between frames are skipped by the same scan, so the
//! parser does not depend on the exact boundary token the server chose.

use crate::types::Image;
use std::io::{BufReader, Read};

/// Frames larger than this indicate a corrupt stream, not a real picture
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Why a frame could not be produced
#[derive(Debug)]
pub(crate) enum StreamError {
    /// The stream ended cleanly but unexpectedly; the canonical server-side
    /// reset. Recoverable by reconnecting, never surfaced to callers.
    Reset,
    /// Transport-level failure
    Io(std::io::Error),
    /// The part between markers was not a decodable JPEG
    Decode(String),
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Streaming JPEG extractor over any byte source
pub(crate) struct MjpegStream<R: Read> {
    reader: BufReader<R>,
}

impl<R: Read> MjpegStream<R> {
    pub(crate) fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    fn next_byte(&mut self) -> Result<u8, StreamError> {
        let mut byte = [0u8; 1];
        loop {
            return match self.reader.read(&mut byte) {
                Ok(0) => Err(StreamError::Reset),
                Ok(_) => Ok(byte[0]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => Err(StreamError::Io(e)),
            };
        }
    }

    /// Read and decode the next frame, blocking on the underlying source
    pub(crate) fn read_frame(&mut self) -> Result<Image, StreamError> {
        // Skip boundary/header bytes until the JPEG start-of-image marker.
        let mut previous = self.next_byte()?;
        loop {
            let current = self.next_byte()?;
            if [previous, current] == SOI {
                break;
            }
            previous = current;
        }

        let mut frame = Vec::with_capacity(64 * 1024);
        frame.extend_from_slice(&SOI);

        let mut previous = self.next_byte()?;
        frame.push(previous);
        loop {
            let current = self.next_byte()?;
            frame.push(current);
            if [previous, current] == EOI {
                break;
            }
            if frame.len() > MAX_FRAME_BYTES {
                return Err(StreamError::Decode(format!(
                    "frame exceeds {} bytes without an end-of-image marker",
                    MAX_FRAME_BYTES
                )));
            }
            previous = current;
        }

        image::load_from_memory(&frame)
            .map(|decoded| decoded.to_rgb8())
            .map_err(|e| StreamError::Decode(e.to_string()))
    }
}
