//! Prometheus metrics for the viewfinder.
//!
//! # Metrics Exposed
//!
//! ## Frame rate
//! - `viewfinder_current_fps` - Most recent instantaneous rate
//! - `viewfinder_average_fps` - Rolling average rate
//! - `viewfinder_fps_stable` - Stability latch (1=stable)
//!
//! ## Distribution
//! - `viewfinder_frames_distributed_total` - Frames copied from the input surface
//! - `viewfinder_frames_skipped_total` - Frames withheld from dropping consumers
//! - `viewfinder_consumers` - Registered consumer surfaces
//!
//! ## Session
//! - `viewfinder_session_owners` - Live session handles
//! - `viewfinder_session_state` - Session state code
//!
//! With the `metrics` feature, [`MetricsServer`] exposes them over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use camera_viewfinder::metrics::{MetricsRegistry, MetricsSnapshot};
//! use camera_viewfinder::session::SessionState;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! registry.update(&MetricsSnapshot {
//!     session_state: SessionState::Capturing,
//!     current_fps: Some(29.97),
//!     ..Default::default()
//! });
//! println!("{}", registry.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsServerHandle, MetricsState, ServerError};
