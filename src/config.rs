//! Viewfinder configuration.
//!
//! Loaded from a TOML file whose sections all have defaults, so an
//! empty file (or no file) yields a working simulated setup.

use crate::fps::EstimatorConfig;
use crate::frame::FrameSize;
use crate::session::{CameraParameters, SimulationConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid target frame rate {0} (must be between 1 and 1000 fps)")]
    InvalidFrameRate(f64),
    #[error("parameter {0} must be positive when set")]
    InvalidParameter(&'static str),
    #[error("invalid estimator settings: {0}")]
    InvalidEstimator(String),
    #[error("invalid simulation settings: {0}")]
    InvalidSimulation(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Camera selection and output layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device to open; the first enumerated device when unset.
    pub device_id: Option<String>,
    /// Capture width in pixels.
    pub width: u32,
    /// Capture height in pixels.
    pub height: u32,
    /// Number of consumer surfaces fed by the distributor.
    pub consumers: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            width: 1280,
            height: 720,
            consumers: 2,
        }
    }
}

impl CameraConfig {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Timing of the demo run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval between permission checks.
    pub permission_poll_ms: u64,
    /// Permission checks before giving up.
    pub permission_attempts: u32,
    /// How long to wait for the distributor's input surface.
    pub input_surface_timeout_ms: u64,
    /// How long to wait for the session to reach capturing.
    pub start_timeout_ms: u64,
    /// Frames to process; 0 runs until interrupted.
    pub frame_count: u64,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            permission_poll_ms: 500,
            permission_attempts: 10,
            input_surface_timeout_ms: 2_000,
            start_timeout_ms: 5_000,
            frame_count: 300,
            metrics_port: 9090,
        }
    }
}

impl RuntimeConfig {
    pub fn permission_poll(&self) -> Duration {
        Duration::from_millis(self.permission_poll_ms)
    }

    pub fn input_surface_timeout(&self) -> Duration {
        Duration::from_millis(self.input_surface_timeout_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ViewfinderConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub parameters: CameraParameters,
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl ViewfinderConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        let config: ViewfinderConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.size().is_empty() {
            return Err(ConfigError::InvalidDimensions);
        }
        self.parameters.validate()?;

        let estimator = &self.estimator;
        if !estimator.stable_tolerance.is_finite() || estimator.stable_tolerance <= 0.0 {
            return Err(ConfigError::InvalidEstimator(format!(
                "stable_tolerance {} must be positive",
                estimator.stable_tolerance
            )));
        }
        if estimator.history_capacity == 0 {
            return Err(ConfigError::InvalidEstimator(
                "history_capacity must be at least 1".into(),
            ));
        }

        let simulation = &self.simulation;
        if !simulation.native_fps.is_finite() || simulation.native_fps <= 0.0 {
            return Err(ConfigError::InvalidSimulation(format!(
                "native_fps {} must be positive",
                simulation.native_fps
            )));
        }
        if simulation.device_ids.is_empty() {
            return Err(ConfigError::InvalidSimulation(
                "at least one device id is required".into(),
            ));
        }
        Ok(())
    }
}
