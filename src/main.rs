//! Camera Viewfinder CLI
//!
//! Runs the full viewfinder pipeline against the simulated camera:
//! opens a shared session, fans frames out to a set of in-memory
//! consumers and reports the measured frame rate.

use camera_viewfinder::{
    config::{ConfigError, ViewfinderConfig},
    distribution::{DistributorError, FrameDistributor, FrameswapControl, SoftwareGraphics},
    fps::{EstimatorError, FrameRateEstimator},
    metrics::{MetricsError, MetricsRegistry, MetricsSnapshot},
    session::{
        CameraService, CameraSessionRegistry, ServiceError, SessionError, SessionState,
        SimulatedCameraService,
    },
    surface::RecordingSurface,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg(feature = "metrics")]
use camera_viewfinder::metrics::{MetricsServer, MetricsServerConfig, MetricsServerHandle, ServerError};

const FRAME_WAIT: Duration = Duration::from_secs(1);
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Live camera viewfinder demo.
#[derive(Parser, Debug)]
#[command(name = "viewfinder", version, about)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device to open.
    #[arg(long)]
    device: Option<String>,

    /// Target frame rate.
    #[arg(long)]
    fps: Option<f64>,

    /// Capture width in pixels.
    #[arg(long)]
    width: Option<u32>,

    /// Capture height in pixels.
    #[arg(long)]
    height: Option<u32>,

    /// Sensor sensitivity (ISO).
    #[arg(long)]
    iso: Option<u32>,

    /// Exposure time in microseconds.
    #[arg(long)]
    exposure_us: Option<u64>,

    /// Frame duration in microseconds.
    #[arg(long)]
    frame_duration_us: Option<u64>,

    /// Frames to process (0 runs until interrupted).
    #[arg(long)]
    frames: Option<u64>,

    /// Number of consumer surfaces.
    #[arg(long)]
    consumers: Option<usize>,

    /// Metrics server port (0 disables).
    #[arg(long)]
    metrics_port: Option<u16>,
}

impl Args {
    fn apply(&self, config: &mut ViewfinderConfig) {
        if let Some(device) = &self.device {
            config.camera.device_id = Some(device.clone());
        }
        if let Some(fps) = self.fps {
            config.parameters.target_fps = fps;
        }
        if let Some(width) = self.width {
            config.camera.width = width;
        }
        if let Some(height) = self.height {
            config.camera.height = height;
        }
        if let Some(iso) = self.iso {
            config.parameters.sensitivity_iso = Some(iso);
        }
        if let Some(exposure) = self.exposure_us {
            config.parameters.exposure_time_us = Some(exposure);
        }
        if let Some(duration) = self.frame_duration_us {
            config.parameters.frame_duration_us = Some(duration);
        }
        if let Some(frames) = self.frames {
            config.runtime.frame_count = frames;
        }
        if let Some(consumers) = self.consumers {
            config.camera.consumers = consumers;
        }
        if let Some(port) = self.metrics_port {
            config.runtime.metrics_port = port;
        }
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Distributor(#[from] DistributorError),
    #[error(transparent)]
    Estimator(#[from] EstimatorError),
    #[error(transparent)]
    Metrics(#[from] MetricsError),
    #[cfg(feature = "metrics")]
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("estimator worker panicked")]
    WorkerPanicked,
}

/// Where metrics snapshots go.
enum MetricsSink {
    Local(MetricsRegistry),
    #[cfg(feature = "metrics")]
    Served(MetricsServerHandle),
}

impl MetricsSink {
    #[cfg(feature = "metrics")]
    fn new(port: u16) -> Result<Self, AppError> {
        let registry = MetricsRegistry::new()?;
        if port == 0 {
            return Ok(MetricsSink::Local(registry));
        }
        let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
        Ok(MetricsSink::Served(server.spawn()?))
    }

    #[cfg(not(feature = "metrics"))]
    fn new(port: u16) -> Result<Self, AppError> {
        if port != 0 {
            debug!(port, "Built without the metrics feature; not serving metrics");
        }
        Ok(MetricsSink::Local(MetricsRegistry::new()?))
    }

    fn update(&self, snapshot: &MetricsSnapshot) {
        match self {
            MetricsSink::Local(registry) => registry.update(snapshot),
            #[cfg(feature = "metrics")]
            MetricsSink::Served(handle) => handle.update(snapshot),
        }
    }
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ViewfinderConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => ViewfinderConfig::default(),
    };
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config) {
        error!(error = %e, "Viewfinder failed");
        std::process::exit(1);
    }
}

fn run(config: ViewfinderConfig) -> Result<(), AppError> {
    let started = chrono::Local::now();
    info!("Camera Viewfinder v{}", camera_viewfinder::VERSION);
    info!("This is a demonstration using a simulated camera");

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let service = Arc::new(SimulatedCameraService::try_new(config.simulation.clone())?);
    let registry = match &config.camera.device_id {
        Some(id) => CameraSessionRegistry::with_device(service.clone(), id.clone()),
        None => CameraSessionRegistry::new(service.clone()),
    };

    // Consumers first, then the size, then the camera-facing surface
    let size = config.camera.size();
    let distributor = FrameDistributor::new("viewfinder", Box::new(SoftwareGraphics::new()));
    let mut consumers: Vec<(Arc<RecordingSurface>, Arc<FrameswapControl>)> = Vec::new();
    for _ in 0..config.camera.consumers.max(1) {
        let surface = Arc::new(RecordingSurface::new());
        let control = distributor.register_consumer(surface.clone(), size.width, size.height)?;
        consumers.push((surface, control));
    }
    distributor.confirm_size(size.width, size.height)?;
    let input = distributor.wait_input_surface(config.runtime.input_surface_timeout())?;

    let session = registry.acquire();
    session.register_surface(input, size.width, size.height)?;
    session.set_parameters(config.parameters.clone())?;

    service
        .permission()
        .wait(config.runtime.permission_poll(), config.runtime.permission_attempts)?;
    session.start()?;
    session.wait_for_state(SessionState::Capturing, config.runtime.start_timeout())?;
    info!(device = ?session.device_id(), %size, consumers = consumers.len(), "Capturing");

    let estimator = FrameRateEstimator::with_config(
        config.parameters.target_fps,
        "viewfinder",
        config.estimator.clone(),
    )?;
    let worker = estimator.spawn()?;
    let metrics = MetricsSink::new(config.runtime.metrics_port)?;

    info!("Processing frames...");

    let frame_count = config.runtime.frame_count;
    let mut processed: u64 = 0;
    let mut last_report = Instant::now();
    let mut outcome = Ok(());

    while running.load(Ordering::SeqCst) && (frame_count == 0 || processed < frame_count) {
        match distributor.await_new_frame(Some(FRAME_WAIT)) {
            Ok(arrival) => {
                estimator.add_timestamp(arrival.timestamp_ns);
                processed += 1;
            }
            Err(DistributorError::Timeout) => {
                if session.state() == SessionState::Error {
                    outcome = Err(session.last_error().unwrap_or(SessionError::Unusable).into());
                    break;
                }
                warn!(waited = ?FRAME_WAIT, "No frame arrived");
                continue;
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }

        // The last consumer stands in for a half-rate encoder
        if consumers.len() > 1 {
            if let Some((_, control)) = consumers.last() {
                control.drop_next(processed % 2 == 1);
            }
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            last_report = Instant::now();
            let fps = estimator.snapshot();
            info!(frames = processed, "{}", fps);
            metrics.update(&MetricsSnapshot::from_components(
                session.state(),
                &registry,
                &estimator,
                &distributor,
            ));
        }
    }

    let fps = estimator.snapshot();
    metrics.update(&MetricsSnapshot::from_components(
        session.state(),
        &registry,
        &estimator,
        &distributor,
    ));
    for (surface, control) in &consumers {
        debug!(
            surface = %control.surface_id(),
            presented = control.presented(),
            skipped = control.skipped(),
            recorded = surface.presented_count(),
            "Consumer summary"
        );
    }

    // Last owner: stops capture and releases the device
    drop(session);
    distributor.release();
    estimator.stop();
    if worker.join().is_err() {
        return Err(AppError::WorkerPanicked);
    }

    let elapsed = chrono::Local::now().signed_duration_since(started);
    info!(
        frames = processed,
        distributed = distributor.frames_distributed(),
        elapsed_ms = elapsed.num_milliseconds(),
        device_closes = service.device_close_count(),
        "Done. {}",
        fps
    );

    outcome
}
