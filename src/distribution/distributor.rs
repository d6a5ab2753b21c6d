//! Fan-out of camera frames to registered consumer surfaces.
//!
//! The camera writes into a single input surface. A dedicated
//! distribution thread, which owns the graphics context, copies each
//! arriving frame into every consumer and then publishes a
//! [`FrameArrival`]. Callers block on [`FrameDistributor::await_new_image`]
//! to receive those arrivals in camera order.

use super::frameswap::FrameswapControl;
use super::graphics::{GraphicsContext, GraphicsError};
use crate::frame::{Frame, FrameSize};
use crate::surface::{Surface, SurfaceError, SurfaceHandle, SurfaceId};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors reported by the distributor.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DistributorError {
    #[error("input surface not ready (needs a consumer and a confirmed size)")]
    NotReady,
    #[error("invalid frame size {0}")]
    InvalidSize(FrameSize),
    #[error("frame size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        expected: FrameSize,
        actual: FrameSize,
    },
    #[error("capture already started; consumers can no longer be registered")]
    CaptureStarted,
    #[error("distributor released")]
    Released,
    #[error("graphics failure: {0}")]
    Graphics(#[from] GraphicsError),
    #[error("timed out waiting for a frame")]
    Timeout,
    #[error("failed to spawn distribution thread: {0}")]
    Spawn(String),
}

/// A frame that has been copied to all consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameArrival {
    /// Camera timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Camera sequence number.
    pub sequence: u64,
}

struct DistributorState {
    consumers: Vec<Arc<FrameswapControl>>,
    size: Option<FrameSize>,
    input: Option<SurfaceHandle>,
    /// Held here until the distribution thread takes it.
    graphics: Option<Box<dyn GraphicsContext>>,
    capture_started: bool,
    pending: VecDeque<Frame>,
    arrivals: VecDeque<FrameArrival>,
    last_timestamp: Option<u64>,
    frames_distributed: u64,
    fatal: Option<DistributorError>,
    released: bool,
}

struct Shared {
    name: String,
    state: Mutex<DistributorState>,
    /// Consumer registered, size confirmed or input created.
    input_ready: Condvar,
    /// Camera wrote a frame into the input surface.
    frame_pending: Condvar,
    /// Distribution thread finished a copy cycle.
    frame_distributed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DistributorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_all(&self) {
        self.input_ready.notify_all();
        self.frame_pending.notify_all();
        self.frame_distributed.notify_all();
    }

    fn fail(&self, error: DistributorError) {
        tracing::error!(distributor = %self.name, error = %error, "Frame distribution aborted");
        let mut state = self.lock();
        if state.fatal.is_none() {
            state.fatal = Some(error);
        }
        drop(state);
        self.notify_all();
    }
}

/// Surface the camera writes into.
struct InputSurface {
    id: SurfaceId,
    shared: Weak<Shared>,
}

impl Surface for InputSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn queue_frame(&self, frame: Frame) -> Result<(), SurfaceError> {
        let shared = self.shared.upgrade().ok_or(SurfaceError::Abandoned(self.id))?;
        let mut state = shared.lock();
        if state.released {
            return Err(SurfaceError::Abandoned(self.id));
        }
        if !state.capture_started {
            state.capture_started = true;
            tracing::debug!(
                distributor = %shared.name,
                consumers = state.consumers.len(),
                "First frame arrived; consumer set locked"
            );
        }
        state.pending.push_back(frame);
        drop(state);
        shared.frame_pending.notify_one();
        Ok(())
    }
}

/// Copies camera frames to N consumer surfaces.
pub struct FrameDistributor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameDistributor {
    /// Creates a distributor that performs its copies with `graphics`.
    pub fn new(name: impl Into<String>, graphics: Box<dyn GraphicsContext>) -> Self {
        let state = DistributorState {
            consumers: Vec::new(),
            size: None,
            input: None,
            graphics: Some(graphics),
            capture_started: false,
            pending: VecDeque::new(),
            arrivals: VecDeque::new(),
            last_timestamp: None,
            frames_distributed: 0,
            fatal: None,
            released: false,
        };

        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                state: Mutex::new(state),
                input_ready: Condvar::new(),
                frame_pending: Condvar::new(),
                frame_distributed: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Adds a consumer surface of the given size.
    ///
    /// Valid until the first frame reaches the input surface. Returns the
    /// consumer's drop control.
    pub fn register_consumer(
        &self,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Result<Arc<FrameswapControl>, DistributorError> {
        let size = FrameSize::new(width, height);
        let mut state = self.shared.lock();
        if state.released {
            return Err(DistributorError::Released);
        }
        if state.capture_started {
            return Err(DistributorError::CaptureStarted);
        }
        if size.is_empty() {
            return Err(DistributorError::InvalidSize(size));
        }
        if let Some(expected) = state.size {
            if expected != size {
                return Err(DistributorError::SizeMismatch {
                    expected,
                    actual: size,
                });
            }
        }

        let control = Arc::new(FrameswapControl::new(surface, size));
        state.consumers.push(Arc::clone(&control));
        tracing::info!(
            distributor = %self.shared.name,
            surface = %control.surface_id(),
            %size,
            consumers = state.consumers.len(),
            "Consumer registered"
        );
        drop(state);
        self.shared.input_ready.notify_all();
        Ok(control)
    }

    /// Locks the frame dimensions every consumer and frame must match.
    pub fn confirm_size(&self, width: u32, height: u32) -> Result<(), DistributorError> {
        let size = FrameSize::new(width, height);
        let mut state = self.shared.lock();
        if state.released {
            return Err(DistributorError::Released);
        }
        if size.is_empty() {
            return Err(DistributorError::InvalidSize(size));
        }
        if let Some(expected) = state.size {
            if expected != size {
                return Err(DistributorError::SizeMismatch {
                    expected,
                    actual: size,
                });
            }
            return Ok(());
        }
        if let Some(consumer) = state.consumers.iter().find(|c| c.size() != size) {
            return Err(DistributorError::SizeMismatch {
                expected: size,
                actual: consumer.size(),
            });
        }

        state.size = Some(size);
        tracing::info!(distributor = %self.shared.name, %size, "Frame size confirmed");
        drop(state);
        self.shared.input_ready.notify_all();
        Ok(())
    }

    /// Returns the surface the camera should write into.
    ///
    /// `None` until at least one consumer is registered and the size is
    /// confirmed. The first successful call starts the distribution thread.
    pub fn input_surface(&self) -> Option<SurfaceHandle> {
        let mut state = self.shared.lock();
        if let Some(input) = &state.input {
            return Some(Arc::clone(input));
        }
        if state.released || state.fatal.is_some() || state.consumers.is_empty() {
            return None;
        }
        let size = state.size?;
        let graphics = state.graphics.take()?;

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("distribute-{}", self.shared.name))
            .spawn(move || run_distribution(shared, graphics, size));

        match spawned {
            Ok(handle) => {
                let input: SurfaceHandle = Arc::new(InputSurface {
                    id: SurfaceId::next(),
                    shared: Arc::downgrade(&self.shared),
                });
                state.input = Some(Arc::clone(&input));
                if let Ok(mut worker) = self.worker.lock() {
                    *worker = Some(handle);
                }
                tracing::info!(
                    distributor = %self.shared.name,
                    surface = %input.id(),
                    %size,
                    "Input surface created"
                );
                drop(state);
                self.shared.input_ready.notify_all();
                Some(input)
            }
            Err(e) => {
                state.fatal = Some(DistributorError::Spawn(e.to_string()));
                None
            }
        }
    }

    /// Waits up to `timeout` for the input surface to become available.
    pub fn wait_input_surface(&self, timeout: Duration) -> Result<SurfaceHandle, DistributorError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(input) = self.input_surface() {
                return Ok(input);
            }

            let state = self.shared.lock();
            if let Some(fatal) = &state.fatal {
                return Err(fatal.clone());
            }
            if state.released {
                return Err(DistributorError::Released);
            }
            let creatable =
                !state.consumers.is_empty() && state.size.is_some() && state.graphics.is_some();
            if state.input.is_some() || creatable {
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DistributorError::NotReady);
            }
            let _ = self
                .shared
                .input_ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the next frame has been copied to all consumers and
    /// returns its timestamp in nanoseconds.
    ///
    /// Arrivals are never dropped: while capture runs, every distributed
    /// frame queues one [`FrameArrival`] until it is awaited or the
    /// distributor is released. A caller that stops awaiting should
    /// release the distributor or stop the camera.
    pub fn await_new_image(&self) -> Result<u64, DistributorError> {
        self.await_new_frame(None).map(|arrival| arrival.timestamp_ns)
    }

    /// Arrivals distributed but not yet awaited.
    pub fn pending_arrivals(&self) -> usize {
        self.shared.lock().arrivals.len()
    }

    /// Like [`await_new_image`](Self::await_new_image) with an optional
    /// timeout, returning the full arrival record.
    pub fn await_new_frame(&self, timeout: Option<Duration>) -> Result<FrameArrival, DistributorError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.shared.lock();
        loop {
            if let Some(fatal) = &state.fatal {
                return Err(fatal.clone());
            }
            if state.released {
                return Err(DistributorError::Released);
            }
            if let Some(arrival) = state.arrivals.pop_front() {
                return Ok(arrival);
            }

            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(DistributorError::Timeout);
                    }
                    self.shared
                        .frame_distributed
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .shared
                    .frame_distributed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Tears down the graphics context and detaches all consumers.
    pub fn release(&self) {
        let graphics = {
            let mut state = self.shared.lock();
            if state.released {
                return;
            }
            state.released = true;
            state.consumers.clear();
            state.input = None;
            state.pending.clear();
            state.arrivals.clear();
            state.graphics.take()
        };
        self.shared.notify_all();

        // Never handed to a distribution thread
        if let Some(mut graphics) = graphics {
            graphics.release();
        }

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = worker {
            if handle.join().is_err() {
                tracing::error!(distributor = %self.shared.name, "Distribution thread panicked");
            }
        }
        tracing::info!(distributor = %self.shared.name, "Distributor released");
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn confirmed_size(&self) -> Option<FrameSize> {
        self.shared.lock().size
    }

    pub fn consumer_count(&self) -> usize {
        self.shared.lock().consumers.len()
    }

    /// Drop controls of all registered consumers.
    pub fn consumers(&self) -> Vec<Arc<FrameswapControl>> {
        self.shared.lock().consumers.clone()
    }

    /// Frames fully distributed so far.
    pub fn frames_distributed(&self) -> u64 {
        self.shared.lock().frames_distributed
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().released
    }
}

impl Drop for FrameDistributor {
    fn drop(&mut self) {
        self.release();
    }
}

/// Blocks until a frame is pending, returning it with a consumer snapshot.
///
/// Returns `None` once the distributor is released or has failed.
fn next_frame(shared: &Shared) -> Option<(Frame, Vec<Arc<FrameswapControl>>)> {
    let mut state = shared.lock();
    loop {
        if state.released || state.fatal.is_some() {
            return None;
        }
        if let Some(frame) = state.pending.pop_front() {
            return Some((frame, state.consumers.clone()));
        }
        state = shared
            .frame_pending
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn run_distribution(shared: Arc<Shared>, mut graphics: Box<dyn GraphicsContext>, size: FrameSize) {
    tracing::debug!(distributor = %shared.name, %size, "Distribution thread started");

    if let Err(e) = graphics.bind_input(size) {
        shared.fail(e.into());
        graphics.release();
        return;
    }

    while let Some((frame, consumers)) = next_frame(&shared) {
        if frame.size() != size {
            shared.fail(DistributorError::SizeMismatch {
                expected: size,
                actual: frame.size(),
            });
            break;
        }

        let mut failed = None;
        for consumer in &consumers {
            if !consumer.keep_frame() {
                consumer.record_skipped();
                continue;
            }
            match graphics.blit(&frame, consumer.surface().as_ref()) {
                Ok(()) => consumer.record_presented(),
                Err(GraphicsError::Surface(e)) => {
                    consumer.record_skipped();
                    tracing::warn!(
                        distributor = %shared.name,
                        surface = %consumer.surface_id(),
                        error = %e,
                        "Consumer rejected frame"
                    );
                }
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failed {
            shared.fail(e.into());
            break;
        }

        let arrival = FrameArrival {
            timestamp_ns: frame.timestamp_ns(),
            sequence: frame.sequence(),
        };
        let mut state = shared.lock();
        if let Some(last) = state.last_timestamp {
            if arrival.timestamp_ns <= last {
                tracing::warn!(
                    distributor = %shared.name,
                    last,
                    timestamp = arrival.timestamp_ns,
                    "Frame timestamp did not increase"
                );
            }
        }
        state.last_timestamp = Some(arrival.timestamp_ns);
        state.frames_distributed += 1;
        state.arrivals.push_back(arrival);
        drop(state);
        shared.frame_distributed.notify_all();

        tracing::trace!(
            distributor = %shared.name,
            sequence = arrival.sequence,
            consumers = consumers.len(),
            "Frame distributed"
        );
    }

    graphics.release();
    tracing::debug!(distributor = %shared.name, "Distribution thread finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::SoftwareGraphics;
    use crate::surface::RecordingSurface;

    const WAIT: Duration = Duration::from_secs(5);

    fn distributor() -> FrameDistributor {
        FrameDistributor::new("test", Box::new(SoftwareGraphics::new()))
    }

    fn frame(size: FrameSize, sequence: u64) -> Frame {
        Frame::new(
            vec![0u8; size.pixel_count()],
            size,
            sequence * 33_333_333,
            sequence,
        )
    }

    #[test]
    fn test_input_not_ready_until_consumer_and_size() {
        let dist = distributor();
        assert!(dist.input_surface().is_none());

        dist.confirm_size(8, 6).unwrap();
        assert!(dist.input_surface().is_none());

        dist.register_consumer(Arc::new(RecordingSurface::new()), 8, 6)
            .unwrap();
        assert!(dist.input_surface().is_some());
    }

    #[test]
    fn test_input_surface_is_stable() {
        let dist = distributor();
        dist.register_consumer(Arc::new(RecordingSurface::new()), 8, 6)
            .unwrap();
        dist.confirm_size(8, 6).unwrap();

        let a = dist.input_surface().unwrap();
        let b = dist.input_surface().unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_confirm_rejects_mismatched_consumers() {
        let dist = distributor();
        dist.register_consumer(Arc::new(RecordingSurface::new()), 1920, 1080)
            .unwrap();
        dist.register_consumer(Arc::new(RecordingSurface::new()), 1920, 1080)
            .unwrap();

        assert_eq!(
            dist.confirm_size(1280, 720),
            Err(DistributorError::SizeMismatch {
                expected: FrameSize::new(1280, 720),
                actual: FrameSize::new(1920, 1080),
            })
        );
        assert!(dist.input_surface().is_none());
    }

    #[test]
    fn test_register_after_confirm_must_match() {
        let dist = distributor();
        dist.confirm_size(640, 480).unwrap();
        assert!(matches!(
            dist.register_consumer(Arc::new(RecordingSurface::new()), 320, 240),
            Err(DistributorError::SizeMismatch { .. })
        ));
        assert!(matches!(
            dist.confirm_size(320, 240),
            Err(DistributorError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_consumer_registered_after_confirm_receives_first_frame() {
        let dist = distributor();
        let size = FrameSize::new(8, 6);
        let first = Arc::new(RecordingSurface::new());
        let late = Arc::new(RecordingSurface::new());

        dist.register_consumer(first.clone(), 8, 6).unwrap();
        dist.confirm_size(8, 6).unwrap();
        dist.register_consumer(late.clone(), 8, 6).unwrap();

        let input = dist.wait_input_surface(WAIT).unwrap();
        input.queue_frame(frame(size, 1)).unwrap();
        dist.await_new_frame(Some(WAIT)).unwrap();

        assert_eq!(first.presented(), vec![(33_333_333, 1)]);
        assert_eq!(late.presented(), vec![(33_333_333, 1)]);
    }

    #[test]
    fn test_arrivals_are_ordered_and_unique() {
        let dist = distributor();
        let size = FrameSize::new(4, 4);
        dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
            .unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();

        for seq in 1..=10 {
            input.queue_frame(frame(size, seq)).unwrap();
        }

        let mut last = 0;
        for _ in 0..10 {
            let arrival = dist.await_new_frame(Some(WAIT)).unwrap();
            assert!(arrival.timestamp_ns > last);
            last = arrival.timestamp_ns;
        }
        assert_eq!(
            dist.await_new_frame(Some(Duration::from_millis(20))),
            Err(DistributorError::Timeout)
        );
        assert_eq!(dist.frames_distributed(), 10);
    }

    #[test]
    fn test_wrong_frame_size_is_fatal() {
        let dist = distributor();
        dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
            .unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();

        input.queue_frame(frame(FrameSize::new(2, 2), 1)).unwrap();

        let expected = DistributorError::SizeMismatch {
            expected: FrameSize::new(4, 4),
            actual: FrameSize::new(2, 2),
        };
        assert_eq!(dist.await_new_frame(Some(WAIT)), Err(expected.clone()));
        assert_eq!(dist.await_new_image(), Err(expected));
    }

    #[test]
    fn test_drop_next_skips_only_that_consumer() {
        let dist = distributor();
        let size = FrameSize::new(4, 4);
        let preview = Arc::new(RecordingSurface::new());
        let encoder = Arc::new(RecordingSurface::new());

        dist.register_consumer(preview.clone(), 4, 4).unwrap();
        let encoder_control = dist.register_consumer(encoder.clone(), 4, 4).unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();

        input.queue_frame(frame(size, 1)).unwrap();
        dist.await_new_frame(Some(WAIT)).unwrap();

        encoder_control.drop_next(true);
        input.queue_frame(frame(size, 2)).unwrap();
        dist.await_new_frame(Some(WAIT)).unwrap();

        encoder_control.drop_next(false);
        input.queue_frame(frame(size, 3)).unwrap();
        dist.await_new_frame(Some(WAIT)).unwrap();

        assert_eq!(preview.presented_count(), 3);
        assert_eq!(encoder.presented().iter().map(|p| p.1).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(encoder_control.skipped(), 1);
        assert_eq!(dist.frames_distributed(), 3);
    }

    #[test]
    fn test_registration_closes_after_first_frame() {
        let dist = distributor();
        dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
            .unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();
        input.queue_frame(frame(FrameSize::new(4, 4), 1)).unwrap();

        assert_eq!(
            dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
                .map(|_| ()),
            Err(DistributorError::CaptureStarted)
        );
    }

    #[test]
    fn test_wait_input_surface_times_out() {
        let dist = distributor();
        assert_eq!(
            dist.wait_input_surface(Duration::from_millis(20)).map(|s| s.id()),
            Err(DistributorError::NotReady)
        );
    }

    #[test]
    fn test_wait_input_surface_wakes_on_registration() {
        let dist = Arc::new(distributor());
        dist.confirm_size(4, 4).unwrap();

        let registrar = Arc::clone(&dist);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            registrar
                .register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
                .unwrap();
        });

        assert!(dist.wait_input_surface(WAIT).is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_release_is_idempotent_and_wakes_waiters() {
        let dist = Arc::new(distributor());
        dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
            .unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();

        let waiter = Arc::clone(&dist);
        let handle = std::thread::spawn(move || waiter.await_new_image());

        std::thread::sleep(Duration::from_millis(20));
        dist.release();
        dist.release();

        assert_eq!(handle.join().unwrap(), Err(DistributorError::Released));
        assert!(dist.is_released());
        assert_eq!(dist.consumer_count(), 0);
        assert!(matches!(
            input.queue_frame(frame(FrameSize::new(4, 4), 1)),
            Err(SurfaceError::Abandoned(_))
        ));
    }

    #[test]
    fn test_release_discards_unawaited_arrivals() {
        let dist = distributor();
        let size = FrameSize::new(4, 4);
        dist.register_consumer(Arc::new(RecordingSurface::new()), 4, 4)
            .unwrap();
        dist.confirm_size(4, 4).unwrap();
        let input = dist.input_surface().unwrap();

        for seq in 1..=5 {
            input.queue_frame(frame(size, seq)).unwrap();
        }
        let deadline = Instant::now() + WAIT;
        while dist.frames_distributed() < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(dist.pending_arrivals(), 5);

        dist.release();
        assert_eq!(dist.pending_arrivals(), 0);
        assert_eq!(dist.await_new_image(), Err(DistributorError::Released));
    }
}
