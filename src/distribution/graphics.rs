//! Graphics-context abstraction used by the distributor.
//!
//! The context owns the camera-fed input texture and performs the
//! per-consumer copy. It is moved onto the distribution thread and only
//! ever used there.

use crate::frame::{Frame, FrameSize};
use crate::surface::{Surface, SurfaceError};
use thiserror::Error;

/// Errors raised by a graphics context.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphicsError {
    #[error("no input texture bound")]
    NotBound,
    #[error("frame is {actual}, input texture is {expected}")]
    SizeMismatch {
        expected: FrameSize,
        actual: FrameSize,
    },
    #[error("graphics context released")]
    Released,
    #[error("target surface rejected frame: {0}")]
    Surface(#[from] SurfaceError),
}

/// Trait for graphics backends.
///
/// Implementations wrap whatever the platform uses for texture copies
/// (an EGL/GL context, a Vulkan queue, plain memory).
pub trait GraphicsContext: Send {
    /// Allocates the input texture the camera writes into.
    fn bind_input(&mut self, size: FrameSize) -> Result<(), GraphicsError>;

    /// Copies the latched input frame into `target` and presents it.
    fn blit(&mut self, frame: &Frame, target: &dyn Surface) -> Result<(), GraphicsError>;

    /// Tears down the context. Further calls fail with `Released`.
    fn release(&mut self);
}

/// CPU implementation that copies pixel buffers.
#[derive(Debug, Default)]
pub struct SoftwareGraphics {
    bound: Option<FrameSize>,
    released: bool,
    blits: u64,
}

impl SoftwareGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful copies performed.
    pub fn blit_count(&self) -> u64 {
        self.blits
    }
}

impl GraphicsContext for SoftwareGraphics {
    fn bind_input(&mut self, size: FrameSize) -> Result<(), GraphicsError> {
        if self.released {
            return Err(GraphicsError::Released);
        }
        self.bound = Some(size);
        tracing::debug!(%size, "Input texture bound");
        Ok(())
    }

    fn blit(&mut self, frame: &Frame, target: &dyn Surface) -> Result<(), GraphicsError> {
        if self.released {
            return Err(GraphicsError::Released);
        }
        let expected = self.bound.ok_or(GraphicsError::NotBound)?;
        if frame.size() != expected {
            return Err(GraphicsError::SizeMismatch {
                expected,
                actual: frame.size(),
            });
        }

        let copy = Frame::new(
            frame.pixels().to_vec(),
            frame.size(),
            frame.timestamp_ns(),
            frame.sequence(),
        );
        target.queue_frame(copy)?;
        self.blits += 1;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.bound = None;
            tracing::debug!(blits = self.blits, "Software graphics context released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RecordingSurface;

    fn frame(size: FrameSize, sequence: u64) -> Frame {
        Frame::new(vec![7u8; size.pixel_count()], size, sequence * 10, sequence)
    }

    #[test]
    fn test_blit_requires_bound_input() {
        let mut gfx = SoftwareGraphics::new();
        let target = RecordingSurface::new();
        let size = FrameSize::new(4, 2);

        assert_eq!(gfx.blit(&frame(size, 1), &target), Err(GraphicsError::NotBound));

        gfx.bind_input(size).unwrap();
        gfx.blit(&frame(size, 1), &target).unwrap();
        assert_eq!(gfx.blit_count(), 1);
        assert_eq!(target.presented(), vec![(10, 1)]);
    }

    #[test]
    fn test_blit_rejects_wrong_size() {
        let mut gfx = SoftwareGraphics::new();
        gfx.bind_input(FrameSize::new(4, 2)).unwrap();
        let target = RecordingSurface::new();

        assert!(matches!(
            gfx.blit(&frame(FrameSize::new(2, 2), 1), &target),
            Err(GraphicsError::SizeMismatch { .. })
        ));
        assert_eq!(target.presented_count(), 0);
    }

    #[test]
    fn test_release_is_final() {
        let mut gfx = SoftwareGraphics::new();
        gfx.release();
        gfx.release();
        assert_eq!(gfx.bind_input(FrameSize::new(1, 1)), Err(GraphicsError::Released));
    }
}
