//! Camera Viewfinder Library
//!
//! The core of a live camera viewfinder: a camera session state
//! machine, a distributor that fans one camera stream out to several
//! consumer surfaces, and a frame-rate estimator fed by frame-arrival
//! timestamps.
//!
//! # Architecture
//!
//! ```text
//! camera service → session → input surface → distributor → consumers
//!                                                  ↓
//!                                          arrival timestamps
//!                                                  ↓
//!                                           fps estimator
//! ```
//!
//! # Design Principles
//!
//! - **Shared ownership**: the camera session is reference-counted through
//!   a registry; the device is released by the last owner only
//! - **Serialized callbacks**: hardware events are handled one at a time on
//!   the camera service's callback thread
//! - **Blocking waits, no polling**: frame arrival, permission and
//!   estimator samples all use condition variables
//!
//! # Example
//!
//! ```no_run
//! use camera_viewfinder::{
//!     distribution::{FrameDistributor, SoftwareGraphics},
//!     fps::FrameRateEstimator,
//!     session::{CameraSessionRegistry, SessionState, SimulatedCameraService, SimulationConfig},
//!     surface::RecordingSurface,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let service = Arc::new(SimulatedCameraService::new(SimulationConfig::default()));
//! let registry = CameraSessionRegistry::new(service);
//!
//! let distributor = FrameDistributor::new("preview", Box::new(SoftwareGraphics::new()));
//! distributor.register_consumer(Arc::new(RecordingSurface::new()), 1280, 720).unwrap();
//! distributor.confirm_size(1280, 720).unwrap();
//! let input = distributor.wait_input_surface(Duration::from_secs(1)).unwrap();
//!
//! let session = registry.acquire();
//! session.register_surface(input, 1280, 720).unwrap();
//! session.start().unwrap();
//! session.wait_for_state(SessionState::Capturing, Duration::from_secs(5)).unwrap();
//!
//! let estimator = FrameRateEstimator::new(30.0, "preview").unwrap();
//! for _ in 0..64 {
//!     let timestamp = distributor.await_new_image().unwrap();
//!     estimator.add_timestamp(timestamp);
//!     if let Ok(Some(fps)) = estimator.try_compute() {
//!         println!("{}", fps);
//!     }
//! }
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod distribution;
pub mod fps;
pub mod frame;
pub mod metrics;
pub mod session;
pub mod surface;

// Re-export commonly used types at crate root
pub use config::{ConfigError, ViewfinderConfig};
pub use distribution::{FrameDistributor, FrameswapControl, SoftwareGraphics};
pub use fps::{FpsSnapshot, FrameRateEstimator};
pub use frame::{Frame, FrameSize};
pub use session::{
    CameraParameters, CameraSession, CameraSessionRegistry, SessionError, SessionHandle,
    SessionState,
};
pub use surface::{RecordingSurface, Surface, SurfaceHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
