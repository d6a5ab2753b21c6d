//! Camera-service abstraction.
//!
//! Mirrors what an OS camera stack offers: device enumeration and
//! characteristics, asynchronous device opening, capture-session
//! creation and repeating capture requests. Results of asynchronous
//! operations are delivered as [`CameraEvent`]s on the service's own
//! callback thread.

use super::parameters::CaptureRequest;
use super::permission::PermissionGate;
use crate::frame::FrameSize;
use crate::surface::SurfaceHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported synchronously by the camera service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    #[error("camera service unavailable")]
    Unavailable,
    #[error("unknown camera device: {0}")]
    UnknownDevice(String),
    #[error("camera access denied")]
    AccessDenied,
    #[error("camera device {0} is closed")]
    DeviceClosed(String),
    #[error("capture session is closed")]
    SessionClosed,
    #[error("camera service failure: {0}")]
    Failure(String),
}

/// Hardware support level, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareLevel {
    Legacy,
    External,
    Limited,
    Full,
    Level3,
}

impl HardwareLevel {
    /// Returns true if this level provides `required` or better.
    pub fn is_at_least(self, required: HardwareLevel) -> bool {
        self >= required
    }
}

impl fmt::Display for HardwareLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HardwareLevel::Legacy => "LEGACY",
            HardwareLevel::External => "EXTERNAL",
            HardwareLevel::Limited => "LIMITED",
            HardwareLevel::Full => "FULL",
            HardwareLevel::Level3 => "LEVEL_3",
        };
        f.write_str(name)
    }
}

/// Pixel formats a device can output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Yuv420,
    Nv21,
    Jpeg,
    Raw10,
}

/// Output sizes supported for one pixel format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfiguration {
    pub format: PixelFormat,
    pub sizes: Vec<FrameSize>,
}

/// Static description of a camera device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCharacteristics {
    /// Output sizes per pixel format.
    pub output_formats: Vec<StreamConfiguration>,
    /// Sizes the device can write into presentable surfaces.
    pub surface_sizes: Vec<FrameSize>,
    /// Supported auto-exposure target frame-rate ranges, inclusive.
    pub fps_ranges: Vec<(u32, u32)>,
    /// Sensitivity range in ISO.
    pub sensitivity_range: Option<(u32, u32)>,
    /// Exposure time range in microseconds.
    pub exposure_range_us: Option<(u64, u64)>,
    /// Longest supported frame duration in microseconds.
    pub max_frame_duration_us: Option<u64>,
    /// Clockwise sensor rotation in degrees.
    pub sensor_orientation: u32,
    pub hardware_level: HardwareLevel,
}

impl DeviceCharacteristics {
    /// Returns true if the device can fill a surface of this size.
    pub fn supports_surface_size(&self, size: FrameSize) -> bool {
        self.surface_sizes.contains(&size)
    }

    /// Returns true if some advertised fps range contains `fps`.
    pub fn supports_fps(&self, fps: f64) -> bool {
        self.fps_ranges
            .iter()
            .any(|&(lo, hi)| fps >= lo as f64 && fps <= hi as f64)
    }

    /// Logs every characteristic at debug level.
    pub fn log(&self, device_id: &str) {
        for stream in &self.output_formats {
            tracing::debug!(device = device_id, format = ?stream.format, "Pixel format");
            for size in &stream.sizes {
                tracing::debug!(device = device_id, format = ?stream.format, %size, "Output size");
            }
        }
        for size in &self.surface_sizes {
            tracing::debug!(device = device_id, %size, "Surface output size");
        }
        for (lo, hi) in &self.fps_ranges {
            tracing::debug!(device = device_id, "fps range: {} -> {}", lo, hi);
        }
        if let Some((lo, hi)) = self.sensitivity_range {
            tracing::debug!(device = device_id, "Sensitivity range: {} -> {}", lo, hi);
        }
        if let Some((lo, hi)) = self.exposure_range_us {
            tracing::debug!(device = device_id, "Exposure range: {} us -> {} us", lo, hi);
        }
        tracing::debug!(
            device = device_id,
            max_frame_duration_us = ?self.max_frame_duration_us,
            sensor_orientation = self.sensor_orientation,
            hardware_level = %self.hardware_level,
            "Device capabilities"
        );
    }
}

/// One destination of a capture session.
#[derive(Clone)]
pub struct OutputConfiguration {
    pub surface: SurfaceHandle,
    pub size: FrameSize,
}

impl fmt::Debug for OutputConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputConfiguration")
            .field("surface", &self.surface.id())
            .field("size", &self.size)
            .finish()
    }
}

/// Asynchronous notifications from the camera service.
pub enum CameraEvent {
    /// The device finished opening.
    Opened(Box<dyn CameraDevice>),
    /// The device went away.
    Disconnected { device_id: String },
    /// The device reported a fatal error.
    DeviceError { device_id: String, code: i32 },
    /// A capture session is ready for requests.
    Configured(Box<dyn CaptureSession>),
    /// The requested output combination was rejected.
    ConfigureFailed { reason: String },
}

impl fmt::Debug for CameraEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            CameraEvent::Disconnected { device_id } => write!(f, "Disconnected({})", device_id),
            CameraEvent::DeviceError { device_id, code } => {
                write!(f, "DeviceError({}, {})", device_id, code)
            }
            CameraEvent::Configured(_) => f.write_str("Configured"),
            CameraEvent::ConfigureFailed { reason } => write!(f, "ConfigureFailed({})", reason),
        }
    }
}

/// Receiver of [`CameraEvent`]s.
///
/// Services invoke this from their callback thread, one event at a
/// time, and never from inside the call that triggered the event.
pub trait DeviceCallbacks: Send + Sync {
    fn on_event(&self, event: CameraEvent);
}

/// Entry point to the platform camera stack.
pub trait CameraService: Send + Sync {
    /// Lists available device identifiers.
    fn device_ids(&self) -> Result<Vec<String>, ServiceError>;

    /// Returns the static characteristics of a device.
    fn characteristics(&self, device_id: &str) -> Result<DeviceCharacteristics, ServiceError>;

    /// Camera-access permission state.
    fn permission(&self) -> &PermissionGate;

    /// Starts opening a device; the outcome arrives as an event.
    fn open_device(
        &self,
        device_id: &str,
        callbacks: Arc<dyn DeviceCallbacks>,
    ) -> Result<(), ServiceError>;
}

/// An opened camera device.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Requests a capture session over `outputs`; the outcome arrives as an event.
    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputConfiguration>,
        callbacks: Arc<dyn DeviceCallbacks>,
    ) -> Result<(), ServiceError>;

    /// Releases the hardware device.
    fn close(&mut self);
}

/// A configured capture session.
pub trait CaptureSession: Send {
    /// Replaces the repeating request.
    fn set_repeating_request(&mut self, request: CaptureRequest) -> Result<(), ServiceError>;

    /// Stops the repeating request and discards in-flight captures.
    fn abort_captures(&mut self) -> Result<(), ServiceError>;
}
