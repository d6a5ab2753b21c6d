//! Per-consumer frame-drop control.

use crate::frame::FrameSize;
use crate::surface::{SurfaceHandle, SurfaceId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A registered consumer surface plus its drop flag.
///
/// Setting [`drop_next`](FrameswapControl::drop_next) makes the
/// distributor skip this consumer until the flag is cleared; other
/// consumers and the distributor's own bookkeeping are unaffected.
pub struct FrameswapControl {
    surface: SurfaceHandle,
    size: FrameSize,
    drop_next: AtomicBool,
    presented: AtomicU64,
    skipped: AtomicU64,
}

impl FrameswapControl {
    pub(crate) fn new(surface: SurfaceHandle, size: FrameSize) -> Self {
        Self {
            surface,
            size,
            drop_next: AtomicBool::new(false),
            presented: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// Whether the next distributed frame should be presented.
    pub fn keep_frame(&self) -> bool {
        !self.drop_next.load(Ordering::Acquire)
    }

    /// Sets or clears the drop flag.
    pub fn drop_next(&self, drop: bool) {
        self.drop_next.store(drop, Ordering::Release);
    }

    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface.id()
    }

    /// Size requested at registration.
    pub fn size(&self) -> FrameSize {
        self.size
    }

    /// Frames presented to this consumer.
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Frames skipped for this consumer.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_presented(&self) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for FrameswapControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameswapControl")
            .field("surface", &self.surface_id())
            .field("size", &self.size)
            .field("keep_frame", &self.keep_frame())
            .field("presented", &self.presented())
            .field("skipped", &self.skipped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::RecordingSurface;
    use std::sync::Arc;

    #[test]
    fn test_drop_flag_is_sticky_until_cleared() {
        let control = FrameswapControl::new(Arc::new(RecordingSurface::new()), FrameSize::new(8, 8));
        assert!(control.keep_frame());

        control.drop_next(true);
        assert!(!control.keep_frame());
        assert!(!control.keep_frame());

        control.drop_next(false);
        assert!(control.keep_frame());
    }
}
