//! Frame type representing one camera image with its arrival metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl FrameSize {
    /// Creates a size from width and height.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Returns true if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single frame written by the camera into a surface.
///
/// The timestamp is the camera's monotonic sensor timestamp in
/// nanoseconds; it is what consumers and the frame-rate estimator see
/// as the frame's arrival time.
#[derive(Clone)]
pub struct Frame {
    /// Raw pixel data, one byte per pixel.
    pixels: Vec<u8>,
    /// Frame dimensions.
    size: FrameSize,
    /// Monotonic camera timestamp in nanoseconds.
    timestamp_ns: u64,
    /// Monotonic sequence number within a capture run.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame with the given parameters.
    pub fn new(pixels: Vec<u8>, size: FrameSize, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            pixels,
            size,
            timestamp_ns,
            sequence,
        }
    }

    /// Returns a reference to the raw pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Returns the frame dimensions.
    #[inline]
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Returns the camera timestamp in nanoseconds.
    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Returns the sequence number.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.size.pixel_count()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("size", &self.size)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
