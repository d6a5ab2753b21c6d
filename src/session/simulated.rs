//! Simulated camera service.
//!
//! Behaves like a platform camera stack: results of `open_device` and
//! `create_capture_session` arrive later on a dedicated callback
//! thread, and a repeating request streams frames into its targets at
//! the configured rate with a little timestamp jitter. Failure modes
//! (open errors, rejected configurations, disconnects, missing
//! permission) can be injected through [`SimulationConfig`].

use super::parameters::CaptureRequest;
use super::permission::PermissionGate;
use super::service::{
    CameraDevice, CameraEvent, CameraService, CaptureSession, DeviceCallbacks,
    DeviceCharacteristics, HardwareLevel, OutputConfiguration, PixelFormat, ServiceError,
    StreamConfiguration,
};
use crate::frame::{Frame, FrameSize};
use crate::surface::{SurfaceError, SurfaceId};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Behaviour of the simulated camera stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Devices reported by enumeration.
    pub device_ids: Vec<String>,
    /// Rate at which repeating requests produce frames.
    pub native_fps: f64,
    /// Maximum timestamp jitter in microseconds.
    pub jitter_us: u64,
    /// Jitter seed; random when unset.
    pub seed: Option<u64>,
    /// Surface sizes every device supports.
    pub surface_sizes: Vec<FrameSize>,
    pub hardware_level: HardwareLevel,
    /// Device error code reported instead of a successful open.
    pub open_error: Option<i32>,
    /// Reject every capture-session configuration.
    pub fail_configuration: bool,
    /// Initial camera permission.
    pub permission_granted: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            device_ids: vec!["0".to_string(), "1".to_string()],
            native_fps: 30.0,
            jitter_us: 500,
            seed: None,
            surface_sizes: vec![
                FrameSize::new(1920, 1080),
                FrameSize::new(1280, 720),
                FrameSize::new(640, 480),
                FrameSize::new(320, 240),
            ],
            hardware_level: HardwareLevel::Full,
            open_error: None,
            fail_configuration: false,
            permission_granted: true,
        }
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Single thread running callback jobs in submission order.
struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    fn spawn() -> Result<Self, ServiceError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = std::thread::Builder::new()
            .name("camera".to_string())
            .spawn(move || {
                for job in receiver {
                    job();
                }
                tracing::debug!("Camera callback thread exiting");
            })
            .map_err(|e| ServiceError::Failure(e.to_string()))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    fn post(&self, job: Job) -> Result<(), ServiceError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| ServiceError::Unavailable),
            None => Err(ServiceError::Unavailable),
        }
    }

    fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // The last owner may be released by a callback itself.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Camera callback thread panicked");
            }
        }
    }
}

#[derive(Default)]
struct SimStats {
    opens: u64,
    closes: u64,
    last_request: Option<CaptureRequest>,
}

struct SimShared {
    config: SimulationConfig,
    dispatcher: Dispatcher,
    stats: Mutex<SimStats>,
    listeners: Mutex<HashMap<String, Weak<dyn DeviceCallbacks>>>,
}

impl SimShared {
    fn stats(&self) -> MutexGuard<'_, SimStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, callbacks: Arc<dyn DeviceCallbacks>, event: CameraEvent) -> Result<(), ServiceError> {
        self.dispatcher
            .post(Box::new(move || callbacks.on_event(event)))
    }
}

/// In-process camera service backed by synthetic frames.
pub struct SimulatedCameraService {
    shared: Arc<SimShared>,
    permission: PermissionGate,
}

impl SimulatedCameraService {
    /// Creates the service and starts its callback thread.
    ///
    /// # Panics
    ///
    /// Panics if the callback thread cannot be spawned; use
    /// [`try_new`](Self::try_new) to handle that case.
    pub fn new(config: SimulationConfig) -> Self {
        match Self::try_new(config) {
            Ok(service) => service,
            Err(e) => panic!("failed to start simulated camera service: {}", e),
        }
    }

    pub fn try_new(config: SimulationConfig) -> Result<Self, ServiceError> {
        let permission = PermissionGate::new(config.permission_granted);
        Ok(Self {
            shared: Arc::new(SimShared {
                config,
                dispatcher: Dispatcher::spawn()?,
                stats: Mutex::new(SimStats::default()),
                listeners: Mutex::new(HashMap::new()),
            }),
            permission,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.shared.config
    }

    /// Number of successful device opens.
    pub fn device_open_count(&self) -> u64 {
        self.shared.stats().opens
    }

    /// Number of device closes.
    pub fn device_close_count(&self) -> u64 {
        self.shared.stats().closes
    }

    /// Most recent repeating request submitted to any device.
    pub fn last_request(&self) -> Option<CaptureRequest> {
        self.shared.stats().last_request.clone()
    }

    /// Simulates the device being unplugged.
    pub fn disconnect(&self, device_id: &str) {
        let listener = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .and_then(Weak::upgrade);

        match listener {
            Some(callbacks) => {
                tracing::info!(device = device_id, "Simulating camera disconnect");
                let event = CameraEvent::Disconnected {
                    device_id: device_id.to_string(),
                };
                if let Err(e) = self.shared.deliver(callbacks, event) {
                    tracing::warn!(error = %e, "Failed to deliver disconnect");
                }
            }
            None => tracing::debug!(device = device_id, "No listener for disconnect"),
        }
    }

    fn build_characteristics(&self) -> DeviceCharacteristics {
        let config = &self.shared.config;
        let native = config.native_fps.round().max(1.0) as u32;
        let low = (native / 2).max(1);

        DeviceCharacteristics {
            output_formats: vec![
                StreamConfiguration {
                    format: PixelFormat::Yuv420,
                    sizes: config.surface_sizes.clone(),
                },
                StreamConfiguration {
                    format: PixelFormat::Jpeg,
                    sizes: config.surface_sizes.clone(),
                },
            ],
            surface_sizes: config.surface_sizes.clone(),
            fps_ranges: vec![(low, native), (native, native)],
            sensitivity_range: Some((100, 3200)),
            exposure_range_us: Some((100, 1_000_000)),
            max_frame_duration_us: Some(1_000_000),
            sensor_orientation: 90,
            hardware_level: config.hardware_level,
        }
    }
}

impl CameraService for SimulatedCameraService {
    fn device_ids(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.shared.config.device_ids.clone())
    }

    fn characteristics(&self, device_id: &str) -> Result<DeviceCharacteristics, ServiceError> {
        if !self.shared.config.device_ids.iter().any(|id| id == device_id) {
            return Err(ServiceError::UnknownDevice(device_id.to_string()));
        }
        Ok(self.build_characteristics())
    }

    fn permission(&self) -> &PermissionGate {
        &self.permission
    }

    fn open_device(
        &self,
        device_id: &str,
        callbacks: Arc<dyn DeviceCallbacks>,
    ) -> Result<(), ServiceError> {
        if !self.permission.is_granted() {
            return Err(ServiceError::AccessDenied);
        }
        if !self.shared.config.device_ids.iter().any(|id| id == device_id) {
            return Err(ServiceError::UnknownDevice(device_id.to_string()));
        }

        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.to_string(), Arc::downgrade(&callbacks));

        let event = match self.shared.config.open_error {
            Some(code) => CameraEvent::DeviceError {
                device_id: device_id.to_string(),
                code,
            },
            None => {
                self.shared.stats().opens += 1;
                CameraEvent::Opened(Box::new(SimulatedDevice {
                    id: device_id.to_string(),
                    shared: Arc::clone(&self.shared),
                    closed: false,
                }))
            }
        };
        self.shared.deliver(callbacks, event)
    }
}

impl Drop for SimulatedCameraService {
    fn drop(&mut self) {
        self.shared.dispatcher.shutdown();
    }
}

struct SimulatedDevice {
    id: String,
    shared: Arc<SimShared>,
    closed: bool,
}

impl SimulatedDevice {
    fn reject_reason(&self, outputs: &[OutputConfiguration]) -> Option<String> {
        if self.shared.config.fail_configuration {
            return Some("configuration rejected by device".to_string());
        }
        if outputs.is_empty() {
            return Some("no outputs".to_string());
        }
        outputs
            .iter()
            .find(|o| !self.shared.config.surface_sizes.contains(&o.size))
            .map(|o| format!("unsupported output size {}", o.size))
    }
}

impl CameraDevice for SimulatedDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: Vec<OutputConfiguration>,
        callbacks: Arc<dyn DeviceCallbacks>,
    ) -> Result<(), ServiceError> {
        if self.closed {
            return Err(ServiceError::DeviceClosed(self.id.clone()));
        }

        let event = match self.reject_reason(&outputs) {
            Some(reason) => CameraEvent::ConfigureFailed { reason },
            None => CameraEvent::Configured(Box::new(SimulatedCaptureSession {
                device_id: self.id.clone(),
                shared: Arc::clone(&self.shared),
                sizes: outputs.iter().map(|o| (o.surface.id(), o.size)).collect(),
                streamer: None,
            })),
        };
        self.shared.deliver(callbacks, event)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.stats().closes += 1;
            tracing::debug!(device = %self.id, "Simulated device closed");
        }
    }
}

struct Streamer {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

struct SimulatedCaptureSession {
    device_id: String,
    shared: Arc<SimShared>,
    sizes: HashMap<SurfaceId, FrameSize>,
    streamer: Option<Streamer>,
}

impl SimulatedCaptureSession {
    fn stop_streaming(&mut self) {
        if let Some(streamer) = self.streamer.take() {
            drop(streamer.stop);
            if streamer.handle.join().is_err() {
                tracing::error!(device = %self.device_id, "Frame streamer panicked");
            }
        }
    }

    fn frame_period(&self, request: &CaptureRequest) -> Duration {
        match request.frame_duration_us {
            Some(us) => Duration::from_micros(us),
            None => Duration::from_secs_f64(1.0 / self.shared.config.native_fps.max(0.001)),
        }
    }
}

impl CaptureSession for SimulatedCaptureSession {
    fn set_repeating_request(&mut self, request: CaptureRequest) -> Result<(), ServiceError> {
        self.stop_streaming();
        self.shared.stats().last_request = Some(request.clone());

        let period = self.frame_period(&request);
        let config = &self.shared.config;
        let jitter_bound = (config.jitter_us * 1_000).min(period.as_nanos() as u64 / 4);
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let targets: Vec<_> = request
            .targets
            .iter()
            .filter_map(|surface| match self.sizes.get(&surface.id()) {
                Some(&size) => Some((Arc::clone(surface), size)),
                None => {
                    tracing::warn!(surface = %surface.id(), "Request target not in session outputs");
                    None
                }
            })
            .collect();

        let (stop, stop_rx) = mpsc::channel::<()>();
        let device_id = self.device_id.clone();
        let handle = std::thread::Builder::new()
            .name(format!("sim-camera-{}", device_id))
            .spawn(move || {
                let mut rng = rng;
                let mut due = Instant::now();
                let base_ns = monotonic_ns();
                let period_ns = period.as_nanos() as u64;
                let mut sequence: u64 = 0;

                loop {
                    due += period;
                    let wait = due.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }

                    let jitter = if jitter_bound > 0 {
                        rng.next_u64() % jitter_bound
                    } else {
                        0
                    };
                    let timestamp_ns = base_ns + sequence * period_ns + jitter;

                    for (surface, size) in &targets {
                        let pixels = synthetic_pixels(*size, sequence);
                        match surface.queue_frame(Frame::new(pixels, *size, timestamp_ns, sequence)) {
                            Ok(()) => {}
                            Err(SurfaceError::Abandoned(id)) => {
                                tracing::debug!(surface = %id, "Target abandoned; frame dropped");
                            }
                            Err(e) => tracing::warn!(error = %e, "Failed to queue frame"),
                        }
                    }
                    sequence += 1;
                }
                tracing::debug!(device = %device_id, frames = sequence, "Frame streamer stopped");
            })
            .map_err(|e| ServiceError::Failure(e.to_string()))?;

        self.streamer = Some(Streamer { stop, handle });
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), ServiceError> {
        self.stop_streaming();
        Ok(())
    }
}

impl Drop for SimulatedCaptureSession {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

/// Deterministic test pattern for one frame.
fn synthetic_pixels(size: FrameSize, sequence: u64) -> Vec<u8> {
    (0..size.pixel_count())
        .map(|i| ((i as u64 ^ sequence) % 256) as u8)
        .collect()
}

/// Nanoseconds on a process-wide monotonic clock.
fn monotonic_ns() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CaptureIntent, RequestTemplate};
    use crate::surface::{RecordingSurface, SurfaceHandle};

    const WAIT: Duration = Duration::from_secs(5);

    /// Forwards every event to a channel.
    struct ChannelCallbacks(Mutex<mpsc::Sender<CameraEvent>>);

    impl DeviceCallbacks for ChannelCallbacks {
        fn on_event(&self, event: CameraEvent) {
            let _ = self.0.lock().unwrap().send(event);
        }
    }

    fn callbacks() -> (Arc<dyn DeviceCallbacks>, mpsc::Receiver<CameraEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(ChannelCallbacks(Mutex::new(tx))), rx)
    }

    fn open(service: &SimulatedCameraService) -> (Box<dyn CameraDevice>, Arc<dyn DeviceCallbacks>, mpsc::Receiver<CameraEvent>) {
        let (cb, rx) = callbacks();
        service.open_device("0", Arc::clone(&cb)).unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            CameraEvent::Opened(device) => (device, cb, rx),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_enumeration_and_characteristics() {
        let service = SimulatedCameraService::new(SimulationConfig::default());
        assert_eq!(service.device_ids().unwrap(), vec!["0", "1"]);

        let chars = service.characteristics("0").unwrap();
        assert!(chars.supports_fps(30.0));
        assert!(chars.supports_surface_size(FrameSize::new(1280, 720)));
        assert_eq!(chars.hardware_level, HardwareLevel::Full);

        assert_eq!(
            service.characteristics("9"),
            Err(ServiceError::UnknownDevice("9".into()))
        );
    }

    #[test]
    fn test_open_requires_permission() {
        let service = SimulatedCameraService::new(SimulationConfig {
            permission_granted: false,
            ..Default::default()
        });
        let (cb, _rx) = callbacks();
        assert_eq!(service.open_device("0", cb), Err(ServiceError::AccessDenied));
    }

    #[test]
    fn test_open_error_reported_asynchronously() {
        let service = SimulatedCameraService::new(SimulationConfig {
            open_error: Some(3),
            ..Default::default()
        });
        let (cb, rx) = callbacks();
        service.open_device("1", cb).unwrap();
        match rx.recv_timeout(WAIT).unwrap() {
            CameraEvent::DeviceError { device_id, code } => {
                assert_eq!(device_id, "1");
                assert_eq!(code, 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(service.device_open_count(), 0);
    }

    #[test]
    fn test_streams_frames_at_requested_rate() {
        let service = SimulatedCameraService::new(SimulationConfig {
            native_fps: 100.0,
            seed: Some(7),
            ..Default::default()
        });
        let (mut device, cb, rx) = open(&service);

        let surface = Arc::new(RecordingSurface::new());
        let handle: SurfaceHandle = surface.clone();
        let size = FrameSize::new(320, 240);
        device
            .create_capture_session(
                vec![OutputConfiguration {
                    surface: Arc::clone(&handle),
                    size,
                }],
                cb,
            )
            .unwrap();

        let mut capture = match rx.recv_timeout(WAIT).unwrap() {
            CameraEvent::Configured(capture) => capture,
            other => panic!("unexpected event {:?}", other),
        };

        let request = CaptureRequest::builder(RequestTemplate::Record)
            .add_target(handle)
            .capture_intent(CaptureIntent::VideoRecord)
            .build();
        capture.set_repeating_request(request).unwrap();

        let deadline = Instant::now() + WAIT;
        while surface.presented_count() < 5 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        capture.abort_captures().unwrap();

        let presented = surface.presented();
        assert!(presented.len() >= 5);
        for pair in presented.windows(2) {
            assert!(pair[1].0 > pair[0].0, "timestamps must increase");
            assert_eq!(pair[1].1, pair[0].1 + 1);
        }

        device.close();
        device.close();
        assert_eq!(service.device_close_count(), 1);
    }

    #[test]
    fn test_unsupported_size_rejected() {
        let service = SimulatedCameraService::new(SimulationConfig::default());
        let (mut device, cb, rx) = open(&service);

        device
            .create_capture_session(
                vec![OutputConfiguration {
                    surface: Arc::new(RecordingSurface::new()),
                    size: FrameSize::new(100, 100),
                }],
                cb,
            )
            .unwrap();

        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            CameraEvent::ConfigureFailed { .. }
        ));
    }

    #[test]
    fn test_closed_device_refuses_sessions() {
        let service = SimulatedCameraService::new(SimulationConfig::default());
        let (mut device, cb, _rx) = open(&service);
        device.close();
        assert_eq!(
            device.create_capture_session(Vec::new(), cb),
            Err(ServiceError::DeviceClosed("0".into()))
        );
    }

    #[test]
    fn test_disconnect_notifies_listener() {
        let service = SimulatedCameraService::new(SimulationConfig::default());
        let (_device, _cb, rx) = open(&service);

        service.disconnect("0");
        assert!(matches!(
            rx.recv_timeout(WAIT).unwrap(),
            CameraEvent::Disconnected { .. }
        ));
    }
}
