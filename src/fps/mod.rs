//! Frame-rate measurement.
//!
//! Turns a stream of frame-arrival timestamps into an instantaneous
//! rate, a rolling average and a one-way stability latch.

mod estimator;
mod history;

pub use estimator::{
    EstimatorConfig, EstimatorError, FpsSnapshot, FrameRateEstimator, MAX_TARGET_FPS,
    STABLE_LIMIT_FPS, STABLE_PERIOD_LIMIT,
};
pub use history::{RollingHistory, HISTORY_CAPACITY};
