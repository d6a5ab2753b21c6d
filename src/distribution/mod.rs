//! Multi-consumer frame distribution.
//!
//! The camera produces into one input surface; the distributor copies
//! every frame into each registered consumer (preview, encoder, ...)
//! and hands callers an ordered stream of arrival timestamps.

mod distributor;
mod frameswap;
mod graphics;

pub use distributor::{DistributorError, FrameArrival, FrameDistributor};
pub use frameswap::FrameswapControl;
pub use graphics::{GraphicsContext, GraphicsError, SoftwareGraphics};
