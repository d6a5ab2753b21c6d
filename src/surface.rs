//! Presentable drawing targets.
//!
//! A surface is anything a frame can be written into: the distributor's
//! camera-fed input, an on-screen preview, an encoder input. The host
//! environment provides the real implementations; [`RecordingSurface`]
//! is a simple in-memory consumer used by the demo and the tests.

use crate::frame::{Frame, FrameSize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    /// Allocates a fresh identifier.
    pub fn next() -> Self {
        Self(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Errors raised when writing into a surface.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface {0} has been abandoned")]
    Abandoned(SurfaceId),
    #[error("surface {id} expects {expected} frames, got {actual}")]
    WrongSize {
        id: SurfaceId,
        expected: FrameSize,
        actual: FrameSize,
    },
}

/// A presentable drawing target.
pub trait Surface: Send + Sync {
    /// Returns the surface identifier.
    fn id(&self) -> SurfaceId;

    /// Writes a frame into the surface, making it the next presented image.
    fn queue_frame(&self, frame: Frame) -> Result<(), SurfaceError>;
}

/// Shared reference to a surface.
pub type SurfaceHandle = Arc<dyn Surface>;

/// In-memory consumer surface that keeps every presented frame's metadata.
pub struct RecordingSurface {
    id: SurfaceId,
    presented: Mutex<Vec<(u64, u64)>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self {
            id: SurfaceId::next(),
            presented: Mutex::new(Vec::new()),
        }
    }

    /// Returns `(timestamp_ns, sequence)` for every frame presented so far.
    pub fn presented(&self) -> Vec<(u64, u64)> {
        self.presented
            .lock()
            .map(|frames| frames.clone())
            .unwrap_or_default()
    }

    /// Returns the number of frames presented so far.
    pub fn presented_count(&self) -> usize {
        self.presented.lock().map(|frames| frames.len()).unwrap_or(0)
    }
}

impl Default for RecordingSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for RecordingSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn queue_frame(&self, frame: Frame) -> Result<(), SurfaceError> {
        let mut presented = self
            .presented
            .lock()
            .map_err(|_| SurfaceError::Abandoned(self.id))?;
        presented.push((frame.timestamp_ns(), frame.sequence()));
        tracing::trace!(surface = %self.id, sequence = frame.sequence(), "Frame presented");
        Ok(())
    }
}

impl fmt::Debug for RecordingSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSurface")
            .field("id", &self.id)
            .field("presented", &self.presented_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_ids_are_unique() {
        let a = SurfaceId::next();
        let b = SurfaceId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_recording_surface_keeps_order() {
        let surface = RecordingSurface::new();
        let size = FrameSize::new(4, 4);

        for seq in 1..=3 {
            let frame = Frame::new(vec![0u8; 16], size, seq * 1_000, seq);
            surface.queue_frame(frame).unwrap();
        }

        assert_eq!(surface.presented(), vec![(1_000, 1), (2_000, 2), (3_000, 3)]);
    }
}
