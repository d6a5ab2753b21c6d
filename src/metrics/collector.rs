//! Metrics collection and registry.

use crate::distribution::FrameDistributor;
use crate::fps::FrameRateEstimator;
use crate::session::{CameraSessionRegistry, SessionState};
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of viewfinder state for metrics update.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Current camera session state.
    pub session_state: SessionState,
    /// Live session handles.
    pub session_owners: usize,
    /// Latest instantaneous frame rate.
    pub current_fps: Option<f64>,
    /// Rolling-average frame rate.
    pub average_fps: Option<f64>,
    /// Whether the frame rate has stabilized.
    pub fps_stable: bool,
    /// Frames copied out of the input surface.
    pub frames_distributed: u64,
    /// Frames withheld from consumers that asked to drop.
    pub frames_skipped: u64,
    /// Registered consumer surfaces.
    pub consumers: usize,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            session_state: SessionState::Closed,
            session_owners: 0,
            current_fps: None,
            average_fps: None,
            fps_stable: false,
            frames_distributed: 0,
            frames_skipped: 0,
            consumers: 0,
        }
    }
}

impl MetricsSnapshot {
    /// Creates a snapshot from the current state of the viewfinder components.
    pub fn from_components(
        session_state: SessionState,
        registry: &CameraSessionRegistry,
        estimator: &FrameRateEstimator,
        distributor: &FrameDistributor,
    ) -> Self {
        let fps = estimator.snapshot();
        let consumers = distributor.consumers();

        Self {
            session_state,
            session_owners: registry.owner_count(),
            current_fps: fps.current,
            average_fps: fps.average,
            fps_stable: fps.stable,
            frames_distributed: distributor.frames_distributed(),
            frames_skipped: consumers.iter().map(|c| c.skipped()).sum(),
            consumers: consumers.len(),
        }
    }
}

/// Prometheus metrics registry for viewfinder monitoring.
pub struct MetricsRegistry {
    registry: Registry,

    // Frame rate
    current_fps: Gauge,
    average_fps: Gauge,
    fps_stable: IntGauge,

    // Distribution
    frames_distributed_total: IntCounter,
    frames_skipped_total: IntCounter,
    consumers: IntGauge,

    // Session
    session_owners: IntGauge,
    session_state: IntGauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all viewfinder metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let current_fps = Gauge::new(
            "viewfinder_current_fps",
            "Most recent instantaneous frame rate",
        )?;
        let average_fps = Gauge::new(
            "viewfinder_average_fps",
            "Rolling average of the instantaneous frame rate",
        )?;
        let fps_stable = IntGauge::new(
            "viewfinder_fps_stable",
            "Frame rate stability latch (1=stable, 0=settling)",
        )?;

        let frames_distributed_total = IntCounter::new(
            "viewfinder_frames_distributed_total",
            "Total frames copied from the camera input surface",
        )?;
        let frames_skipped_total = IntCounter::new(
            "viewfinder_frames_skipped_total",
            "Total frames withheld from consumers requesting drops",
        )?;
        let consumers = IntGauge::new(
            "viewfinder_consumers",
            "Number of registered consumer surfaces",
        )?;

        let session_owners = IntGauge::new(
            "viewfinder_session_owners",
            "Number of live camera session handles",
        )?;
        let session_state = IntGauge::new(
            "viewfinder_session_state",
            "Camera session state (0=closed 1=opening 2=open 3=configuring 4=capturing -1=error)",
        )?;

        registry.register(Box::new(current_fps.clone()))?;
        registry.register(Box::new(average_fps.clone()))?;
        registry.register(Box::new(fps_stable.clone()))?;
        registry.register(Box::new(frames_distributed_total.clone()))?;
        registry.register(Box::new(frames_skipped_total.clone()))?;
        registry.register(Box::new(consumers.clone()))?;
        registry.register(Box::new(session_owners.clone()))?;
        registry.register(Box::new(session_state.clone()))?;

        Ok(Self {
            registry,
            current_fps,
            average_fps,
            fps_stable,
            frames_distributed_total,
            frames_skipped_total,
            consumers,
            session_owners,
            session_state,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        // Rates stay at their last value until one is available
        if let Some(fps) = snapshot.current_fps {
            self.current_fps.set(fps);
        }
        if let Some(fps) = snapshot.average_fps {
            self.average_fps.set(fps);
        }
        self.fps_stable.set(i64::from(snapshot.fps_stable));

        // For counters, we need to increment by the difference
        let distributed = self.frames_distributed_total.get();
        if snapshot.frames_distributed > distributed {
            self.frames_distributed_total
                .inc_by(snapshot.frames_distributed - distributed);
        }
        let skipped = self.frames_skipped_total.get();
        if snapshot.frames_skipped > skipped {
            self.frames_skipped_total.inc_by(snapshot.frames_skipped - skipped);
        }
        self.consumers.set(snapshot.consumers as i64);

        self.session_owners.set(snapshot.session_owners as i64);
        self.session_state.set(snapshot.session_state.code());
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        assert!(MetricsRegistry::new().is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let registry = MetricsRegistry::new().unwrap();

        registry.update(&MetricsSnapshot {
            session_state: SessionState::Capturing,
            session_owners: 2,
            current_fps: Some(29.5),
            average_fps: Some(29.8),
            fps_stable: true,
            frames_distributed: 120,
            frames_skipped: 3,
            consumers: 2,
        });

        let output = registry.encode().unwrap();
        assert!(output.contains("viewfinder_current_fps 29.5"));
        assert!(output.contains("viewfinder_fps_stable 1"));
        assert!(output.contains("viewfinder_frames_distributed_total 120"));
        assert!(output.contains("viewfinder_session_state 4"));
        assert!(output.contains("viewfinder_session_owners 2"));
    }

    #[test]
    fn test_counters_never_decrease() {
        let registry = MetricsRegistry::new().unwrap();
        let mut snapshot = MetricsSnapshot {
            frames_distributed: 50,
            ..Default::default()
        };
        registry.update(&snapshot);

        snapshot.frames_distributed = 10;
        registry.update(&snapshot);

        let output = registry.encode().unwrap();
        assert!(output.contains("viewfinder_frames_distributed_total 50"));
    }

    #[test]
    fn test_error_state_encoded() {
        let registry = MetricsRegistry::new().unwrap();
        registry.update(&MetricsSnapshot {
            session_state: SessionState::Error,
            ..Default::default()
        });
        let output = registry.encode().unwrap();
        assert!(output.contains("viewfinder_session_state -1"));
    }
}
