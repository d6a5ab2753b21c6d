//! Capture parameters and repeating capture requests.
//!
//! Sensitivity, exposure and frame duration are each optional. An unset
//! (or zero) value leaves the matching auto-control in automatic mode;
//! only explicitly positive values reach the hardware request. The frame
//! rate is a target for measurement only, since what the hardware
//! achieves depends on the device.

use super::service::DeviceCharacteristics;
use crate::config::ConfigError;
use crate::fps::MAX_TARGET_FPS;
use crate::surface::SurfaceHandle;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested capture parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraParameters {
    /// Target frames per second (sizes the measurement window).
    pub target_fps: f64,
    /// Sensor sensitivity in ISO.
    pub sensitivity_iso: Option<u32>,
    /// Frame duration in microseconds.
    pub frame_duration_us: Option<u64>,
    /// Exposure time in microseconds.
    pub exposure_time_us: Option<u64>,
}

impl Default for CameraParameters {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            sensitivity_iso: None,
            frame_duration_us: None,
            exposure_time_us: None,
        }
    }
}

impl CameraParameters {
    /// Creates parameters with only a target frame rate.
    pub fn with_target_fps(target_fps: f64) -> Self {
        Self {
            target_fps,
            ..Default::default()
        }
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rounded = self.target_fps.round();
        if !self.target_fps.is_finite() || rounded < 1.0 || rounded > MAX_TARGET_FPS {
            return Err(ConfigError::InvalidFrameRate(self.target_fps));
        }
        if self.sensitivity_iso == Some(0) {
            return Err(ConfigError::InvalidParameter("sensitivity_iso"));
        }
        if self.frame_duration_us == Some(0) {
            return Err(ConfigError::InvalidParameter("frame_duration_us"));
        }
        if self.exposure_time_us == Some(0) {
            return Err(ConfigError::InvalidParameter("exposure_time_us"));
        }
        Ok(())
    }

    /// Sensitivity to apply, if explicitly enabled.
    pub fn effective_sensitivity(&self) -> Option<u32> {
        self.sensitivity_iso.filter(|&v| v > 0)
    }

    /// Frame duration to apply, if explicitly enabled.
    pub fn effective_frame_duration_us(&self) -> Option<u64> {
        self.frame_duration_us.filter(|&v| v > 0)
    }

    /// Exposure time to apply, if explicitly enabled.
    pub fn effective_exposure_time_us(&self) -> Option<u64> {
        self.exposure_time_us.filter(|&v| v > 0)
    }

    /// Logs a warning for every explicit value outside the device's ranges.
    ///
    /// Out-of-range values are still applied; the device clamps them.
    pub fn warn_out_of_range(&self, device_id: &str, chars: &DeviceCharacteristics) {
        if !chars.fps_ranges.is_empty() && !chars.supports_fps(self.target_fps) {
            tracing::warn!(
                device = device_id,
                target_fps = self.target_fps,
                ranges = ?chars.fps_ranges,
                "Target frame rate outside advertised ranges"
            );
        }
        if let (Some(iso), Some((lo, hi))) = (self.effective_sensitivity(), chars.sensitivity_range) {
            if iso < lo || iso > hi {
                tracing::warn!(device = device_id, iso, lo, hi, "Sensitivity outside device range");
            }
        }
        if let (Some(exposure), Some((lo, hi))) =
            (self.effective_exposure_time_us(), chars.exposure_range_us)
        {
            if exposure < lo || exposure > hi {
                tracing::warn!(device = device_id, exposure, lo, hi, "Exposure outside device range");
            }
        }
        if let (Some(duration), Some(max)) =
            (self.effective_frame_duration_us(), chars.max_frame_duration_us)
        {
            if duration > max {
                tracing::warn!(device = device_id, duration, max, "Frame duration above device maximum");
            }
        }
    }
}

/// Request template, selecting the device's tuning defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    Record,
    StillCapture,
}

/// Capture intent tag attached to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureIntent {
    Preview,
    VideoRecord,
    StillCapture,
}

/// A capture request, resubmitted for every frame when repeating.
#[derive(Clone)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub targets: Vec<SurfaceHandle>,
    pub capture_intent: Option<CaptureIntent>,
    pub sensitivity_iso: Option<u32>,
    pub frame_duration_us: Option<u64>,
    pub exposure_time_us: Option<u64>,
}

impl CaptureRequest {
    pub fn builder(template: RequestTemplate) -> CaptureRequestBuilder {
        CaptureRequestBuilder {
            request: CaptureRequest {
                template,
                targets: Vec::new(),
                capture_intent: None,
                sensitivity_iso: None,
                frame_duration_us: None,
                exposure_time_us: None,
            },
        }
    }

    /// True when neither sensitivity nor exposure is overridden.
    pub fn is_auto_exposure(&self) -> bool {
        self.sensitivity_iso.is_none() && self.exposure_time_us.is_none()
    }
}

impl fmt::Debug for CaptureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureRequest")
            .field("template", &self.template)
            .field(
                "targets",
                &self.targets.iter().map(|t| t.id()).collect::<Vec<_>>(),
            )
            .field("capture_intent", &self.capture_intent)
            .field("sensitivity_iso", &self.sensitivity_iso)
            .field("frame_duration_us", &self.frame_duration_us)
            .field("exposure_time_us", &self.exposure_time_us)
            .finish()
    }
}

/// Builder for [`CaptureRequest`].
pub struct CaptureRequestBuilder {
    request: CaptureRequest,
}

impl CaptureRequestBuilder {
    pub fn add_target(mut self, surface: SurfaceHandle) -> Self {
        self.request.targets.push(surface);
        self
    }

    pub fn capture_intent(mut self, intent: CaptureIntent) -> Self {
        self.request.capture_intent = Some(intent);
        self
    }

    /// Applies every explicitly enabled parameter; unset ones stay automatic.
    pub fn apply_parameters(mut self, params: &CameraParameters) -> Self {
        if let Some(iso) = params.effective_sensitivity() {
            self.request.sensitivity_iso = Some(iso);
        }
        if let Some(duration) = params.effective_frame_duration_us() {
            self.request.frame_duration_us = Some(duration);
        }
        if let Some(exposure) = params.effective_exposure_time_us() {
            self.request.exposure_time_us = Some(exposure);
        }
        self
    }

    pub fn build(self) -> CaptureRequest {
        self.request
    }
}
