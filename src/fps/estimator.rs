//! Frame-rate estimation over a one-period window of arrival timestamps.
//!
//! A producer (the frame loop) records arrival timestamps; a consumer
//! (usually the background worker from [`FrameRateEstimator::spawn`])
//! blocks until a new sample exists and recomputes the statistics.
//!
//! The window holds `round(target_fps) + 1` timestamps, so the elapsed
//! time between its oldest and newest entry spans one nominal second
//! whatever the per-frame jitter.

use super::history::{RollingHistory, HISTORY_CAPACITY};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum change between consecutive rates still counted as stable.
pub const STABLE_LIMIT_FPS: f64 = 2.0;

/// Consecutive in-tolerance computations that must be exceeded before
/// the rate is declared stable.
pub const STABLE_PERIOD_LIMIT: u32 = 6;

/// Highest target rate accepted; it bounds the window allocation.
pub const MAX_TARGET_FPS: f64 = 1000.0;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Errors reported by the estimator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EstimatorError {
    #[error("invalid target frame rate {0} (must round to between 1 and 1000 fps)")]
    InvalidTargetFps(f64),
    #[error("window timestamps are not increasing (oldest {oldest} ns, newest {newest} ns)")]
    NonMonotonic { oldest: u64, newest: u64 },
    #[error("timed out waiting for a new sample")]
    Timeout,
    #[error("estimator stopped")]
    Stopped,
    #[error("failed to spawn estimator worker: {0}")]
    Spawn(String),
}

/// Tuning for stability detection and averaging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Maximum fps change between computations counted as stable.
    pub stable_tolerance: f64,
    /// Streak length that must be exceeded to latch stability.
    pub stable_period_limit: u32,
    /// Number of instantaneous rates in the rolling average.
    pub history_capacity: usize,
    /// Keep computing after the rate stabilizes (false stops the worker).
    pub continuous: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            stable_tolerance: STABLE_LIMIT_FPS,
            stable_period_limit: STABLE_PERIOD_LIMIT,
            history_capacity: HISTORY_CAPACITY,
            continuous: true,
        }
    }
}

/// Point-in-time view of the estimator's statistics.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FpsSnapshot {
    /// Most recent instantaneous rate, `None` until the first full window.
    pub current: Option<f64>,
    /// Mean of the rate history, `None` until the first full window.
    pub average: Option<f64>,
    /// Stability latch.
    pub stable: bool,
    /// Timestamps recorded so far.
    pub samples: u64,
}

impl fmt::Display for FpsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.current, self.average) {
            (Some(current), Some(average)) => write!(
                f,
                "{:.2} fps (avg {:.2}){}",
                current,
                average,
                if self.stable { ", stable" } else { "" }
            ),
            _ => write!(f, "no rate yet ({} samples)", self.samples),
        }
    }
}

/// Circular buffer of the latest arrival timestamps.
#[derive(Debug)]
struct Window {
    timestamps: Vec<u64>,
    /// Slot holding the newest timestamp.
    index: usize,
    /// Total timestamps recorded.
    samples: u64,
}

impl Window {
    fn new(len: usize) -> Self {
        Self {
            timestamps: vec![0; len],
            index: 0,
            samples: 0,
        }
    }

    fn push(&mut self, timestamp_ns: u64) {
        self.index = (self.index + 1) % self.timestamps.len();
        self.timestamps[self.index] = timestamp_ns;
        self.samples += 1;
    }

    fn is_full(&self) -> bool {
        self.samples >= self.timestamps.len() as u64
    }

    fn newest(&self) -> u64 {
        self.timestamps[self.index]
    }

    fn oldest(&self) -> u64 {
        self.timestamps[(self.index + 1) % self.timestamps.len()]
    }

    fn intervals(&self) -> usize {
        self.timestamps.len() - 1
    }
}

#[derive(Debug)]
struct EstimatorState {
    window: Window,
    /// `window.samples` at the last computation.
    computed_samples: u64,
    current: Option<f64>,
    last_fps: f64,
    stable_count: u32,
    stable: bool,
    history: RollingHistory,
    stopped: bool,
}

impl EstimatorState {
    fn snapshot(&self) -> FpsSnapshot {
        FpsSnapshot {
            current: self.current,
            average: self.history.average(),
            stable: self.stable,
            samples: self.window.samples,
        }
    }
}

struct Shared {
    state: Mutex<EstimatorState>,
    sample_added: Condvar,
}

/// Thread-safe frame-rate estimator.
///
/// Clones share the same window and statistics, so one clone can feed
/// timestamps while another computes.
#[derive(Clone)]
pub struct FrameRateEstimator {
    id: Arc<str>,
    target_fps: f64,
    config: EstimatorConfig,
    shared: Arc<Shared>,
}

impl FrameRateEstimator {
    /// Creates an estimator with default tuning.
    pub fn new(target_fps: f64, id: impl Into<String>) -> Result<Self, EstimatorError> {
        Self::with_config(target_fps, id, EstimatorConfig::default())
    }

    /// Creates an estimator with custom tuning.
    pub fn with_config(
        target_fps: f64,
        id: impl Into<String>,
        config: EstimatorConfig,
    ) -> Result<Self, EstimatorError> {
        let rounded = target_fps.round();
        if !target_fps.is_finite() || rounded < 1.0 || rounded > MAX_TARGET_FPS {
            return Err(EstimatorError::InvalidTargetFps(target_fps));
        }

        let window_len = (rounded as usize)
            .checked_add(1)
            .ok_or(EstimatorError::InvalidTargetFps(target_fps))?;
        let state = EstimatorState {
            window: Window::new(window_len),
            computed_samples: 0,
            current: None,
            last_fps: 0.0,
            stable_count: 0,
            stable: false,
            history: RollingHistory::new(config.history_capacity),
            stopped: false,
        };

        Ok(Self {
            id: Arc::from(id.into()),
            target_fps,
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                sample_added: Condvar::new(),
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    /// Number of timestamps in the measurement window.
    pub fn window_len(&self) -> usize {
        self.lock().window.timestamps.len()
    }

    /// Records a frame arrival, overwriting the oldest window slot.
    pub fn add_timestamp(&self, timestamp_ns: u64) {
        let mut state = self.lock();
        state.window.push(timestamp_ns);
        self.shared.sample_added.notify_all();
    }

    /// Records a frame arrival given in microseconds.
    pub fn add_timestamp_us(&self, timestamp_us: u64) {
        self.add_timestamp(timestamp_us.saturating_mul(1_000));
    }

    /// Computes statistics if a sample arrived since the last computation.
    ///
    /// Returns `Ok(None)` when there is nothing new.
    pub fn try_compute(&self) -> Result<Option<FpsSnapshot>, EstimatorError> {
        let mut state = self.lock();
        if state.window.samples == state.computed_samples {
            return Ok(None);
        }
        self.compute(&mut state).map(Some)
    }

    /// Blocks until a new sample arrives, then computes statistics.
    ///
    /// With a timeout, returns [`EstimatorError::Timeout`] when no sample
    /// arrives in time. Returns [`EstimatorError::Stopped`] after [`stop`].
    ///
    /// [`stop`]: FrameRateEstimator::stop
    pub fn compute_next(&self, timeout: Option<Duration>) -> Result<FpsSnapshot, EstimatorError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock();

        // Re-check after every wakeup: a notification does not imply a new sample.
        while state.window.samples == state.computed_samples {
            if state.stopped {
                return Err(EstimatorError::Stopped);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EstimatorError::Timeout);
                    }
                    self.shared
                        .sample_added
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0)
                }
                None => self
                    .shared
                    .sample_added
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        if state.stopped {
            return Err(EstimatorError::Stopped);
        }
        self.compute(&mut state)
    }

    fn compute(&self, state: &mut EstimatorState) -> Result<FpsSnapshot, EstimatorError> {
        state.computed_samples = state.window.samples;

        if !state.window.is_full() {
            return Ok(state.snapshot());
        }

        let oldest = state.window.oldest();
        let newest = state.window.newest();
        if newest <= oldest {
            return Err(EstimatorError::NonMonotonic { oldest, newest });
        }

        let elapsed_s = (newest - oldest) as f64 / NANOS_PER_SEC;
        let fps = state.window.intervals() as f64 / elapsed_s;

        state.current = Some(fps);
        state.history.push(fps);

        if (fps - state.last_fps).abs() < self.config.stable_tolerance {
            state.stable_count += 1;
        } else {
            state.stable_count = 0;
        }
        state.last_fps = fps;

        if state.stable_count > self.config.stable_period_limit && !state.stable {
            if fps.round() == 0.0 {
                tracing::warn!(estimator = %self.id, fps, "Too low framerate");
            }
            state.stable = true;
            tracing::info!(
                estimator = %self.id,
                fps,
                target = self.target_fps,
                "Frame rate stabilized"
            );
        }

        tracing::trace!(estimator = %self.id, fps, streak = state.stable_count, "Frame rate computed");
        Ok(state.snapshot())
    }

    /// Spawns a background thread that recomputes on every new sample.
    ///
    /// The worker exits on [`stop`](FrameRateEstimator::stop), or once the
    /// rate is stable when the estimator is not continuous.
    pub fn spawn(&self) -> Result<JoinHandle<()>, EstimatorError> {
        let estimator = self.clone();
        std::thread::Builder::new()
            .name(format!("fps-{}", self.id))
            .spawn(move || estimator.run())
            .map_err(|e| EstimatorError::Spawn(e.to_string()))
    }

    fn run(&self) {
        tracing::debug!(estimator = %self.id, window = self.window_len(), "Estimator worker started");
        loop {
            match self.compute_next(None) {
                Ok(snapshot) => {
                    if snapshot.stable && !self.config.continuous {
                        break;
                    }
                }
                Err(EstimatorError::Stopped) => break,
                Err(e) => tracing::warn!(estimator = %self.id, error = %e, "Frame rate computation skipped"),
            }
        }
        tracing::debug!(estimator = %self.id, "Estimator worker finished");
    }

    /// Wakes any blocked computation and makes it return `Stopped`.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.shared.sample_added.notify_all();
    }

    /// Most recently computed instantaneous rate.
    pub fn current_fps(&self) -> Option<f64> {
        self.lock().current
    }

    /// Mean of the bounded rate history.
    pub fn average_fps(&self) -> Option<f64> {
        self.lock().history.average()
    }

    /// Whether the stability latch has been set for this run.
    pub fn is_stable(&self) -> bool {
        self.lock().stable
    }

    pub fn snapshot(&self) -> FpsSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, EstimatorState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FrameRateEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRateEstimator")
            .field("id", &self.id)
            .field("target_fps", &self.target_fps)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
