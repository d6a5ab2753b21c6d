//! Camera session state machine.
//!
//! ```text
//! Closed ─start→ Opening ─opened→ Open ─configure→ Configuring ─configured→ Capturing
//!                   │                                   │
//!                   └─disconnect/error→ Error ←─failed──┘
//! ```
//!
//! All hardware-driven transitions happen inside [`CameraEvent`]
//! handling, which the camera service serializes on its callback
//! thread. Caller-driven transitions (`start`, `close`) take the same
//! lock, so no two transitions are ever in flight for one session.
//!
//! Every open and configure request carries the session generation it
//! was issued under. `start` and `close` advance the generation, so an
//! `Opened` or `Configured` answering a request that was superseded is
//! released instead of applied.

use super::parameters::{CameraParameters, CaptureIntent, CaptureRequest, RequestTemplate};
use super::service::{
    CameraDevice, CameraEvent, CameraService, CaptureSession, DeviceCallbacks,
    DeviceCharacteristics, OutputConfiguration, ServiceError,
};
use crate::frame::FrameSize;
use crate::surface::SurfaceHandle;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Lifecycle state of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Configuring,
    Capturing,
    Error,
}

impl SessionState {
    /// Numeric code for metrics export.
    pub fn code(self) -> i64 {
        match self {
            SessionState::Closed => 0,
            SessionState::Opening => 1,
            SessionState::Open => 2,
            SessionState::Configuring => 3,
            SessionState::Capturing => 4,
            SessionState::Error => -1,
        }
    }

    /// True while a capture session is being set up or running.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Configuring | SessionState::Capturing)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Closed => "closed",
            SessionState::Opening => "opening",
            SessionState::Open => "open",
            SessionState::Configuring => "configuring",
            SessionState::Capturing => "capturing",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Errors raised by camera sessions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("camera permission not granted")]
    PermissionDenied,
    #[error("no output surfaces registered")]
    NoOutputs,
    #[error("no camera device available")]
    NoDevice,
    #[error("outputs cannot change while the session is {0}")]
    OutputsLocked(SessionState),
    #[error("session cannot start while {0}")]
    InvalidState(SessionState),
    #[error("session failed and must be discarded")]
    Unusable,
    #[error("camera device {0} unavailable")]
    DeviceUnavailable(String),
    #[error("camera device {device_id} reported error {code}")]
    DeviceError { device_id: String, code: i32 },
    #[error("capture session configuration failed: {0}")]
    ConfigurationFailed(String),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("timed out waiting for {expected} (session is {actual})")]
    Timeout {
        expected: SessionState,
        actual: SessionState,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// A surface the camera writes into, with its requested size.
#[derive(Clone)]
pub struct RegisteredOutput {
    pub surface: SurfaceHandle,
    pub size: FrameSize,
}

impl fmt::Debug for RegisteredOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredOutput")
            .field("surface", &self.surface.id())
            .field("size", &self.size)
            .finish()
    }
}

struct SessionInner {
    state: SessionState,
    outputs: Vec<RegisteredOutput>,
    parameters: CameraParameters,
    device_id: Option<String>,
    characteristics: Option<DeviceCharacteristics>,
    device: Option<Box<dyn CameraDevice>>,
    capture: Option<Box<dyn CaptureSession>>,
    last_error: Option<SessionError>,
    generation: u64,
    /// Generation of the open request that produced the current device.
    device_generation: u64,
    /// Listener registered with the service for the current device.
    device_callbacks: Option<Arc<dyn DeviceCallbacks>>,
}

impl SessionInner {
    fn next_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

struct SessionCore {
    service: Arc<dyn CameraService>,
    preferred_device: Option<String>,
    weak_self: Weak<SessionCore>,
    inner: Mutex<SessionInner>,
    changed: Condvar,
}

/// Event sink handed to the camera service, one per request.
struct SessionCallbacks {
    core: Weak<SessionCore>,
    generation: u64,
}

impl DeviceCallbacks for SessionCallbacks {
    fn on_event(&self, event: CameraEvent) {
        match self.core.upgrade() {
            Some(core) => core.handle_event(self.generation, event),
            None => discard_event(event),
        }
    }
}

/// Releases hardware carried by an event nobody will handle.
fn discard_event(event: CameraEvent) {
    tracing::debug!(?event, "Camera event after session teardown");
    match event {
        CameraEvent::Opened(mut device) => device.close(),
        CameraEvent::Configured(mut capture) => {
            let _ = capture.abort_captures();
        }
        _ => {}
    }
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn callbacks(&self, generation: u64) -> Arc<dyn DeviceCallbacks> {
        Arc::new(SessionCallbacks {
            core: self.weak_self.clone(),
            generation,
        })
    }

    fn transition(&self, inner: &mut SessionInner, next: SessionState) {
        if inner.state != next {
            tracing::info!(from = %inner.state, to = %next, "Camera session state change");
            inner.state = next;
            self.changed.notify_all();
        }
    }

    fn fail(&self, inner: &mut SessionInner, error: SessionError) {
        tracing::error!(error = %error, state = %inner.state, "Camera session failed");
        if let Some(mut capture) = inner.capture.take() {
            let _ = capture.abort_captures();
        }
        inner.last_error = Some(error);
        self.transition(inner, SessionState::Error);
    }

    fn handle_event(&self, generation: u64, event: CameraEvent) {
        let mut inner = self.lock();
        let state = inner.state;
        let current = generation == inner.generation;
        let from_device = generation == inner.device_generation;

        match event {
            CameraEvent::Opened(device) if state == SessionState::Opening && current => {
                tracing::info!(device = device.id(), "Camera opened");
                inner.device = Some(device);
                self.transition(&mut inner, SessionState::Open);
                self.configure(&mut inner);
            }
            CameraEvent::Disconnected { device_id } if state != SessionState::Closed && from_device => {
                tracing::warn!(device = %device_id, "Camera disconnected");
                if let Some(mut device) = inner.device.take() {
                    device.close();
                }
                self.fail(&mut inner, SessionError::DeviceUnavailable(device_id));
            }
            CameraEvent::DeviceError { device_id, code }
                if state != SessionState::Closed && from_device =>
            {
                if let Some(mut device) = inner.device.take() {
                    device.close();
                }
                self.fail(&mut inner, SessionError::DeviceError { device_id, code });
            }
            CameraEvent::Configured(capture) if state == SessionState::Configuring && current => {
                tracing::debug!("Capture session configured");
                self.start_repeating(&mut inner, capture);
            }
            CameraEvent::ConfigureFailed { reason }
                if state == SessionState::Configuring && current =>
            {
                self.fail(&mut inner, SessionError::ConfigurationFailed(reason));
            }
            event if !current => {
                tracing::debug!(?event, generation, current = inner.generation, "Stale camera event");
                drop(inner);
                discard_event(event);
            }
            event => {
                tracing::warn!(?event, %state, "Unexpected camera event");
                drop(inner);
                discard_event(event);
            }
        }
    }

    /// Requests a capture session over all registered outputs.
    fn configure(&self, inner: &mut SessionInner) {
        let outputs: Vec<OutputConfiguration> = inner
            .outputs
            .iter()
            .map(|output| {
                tracing::debug!(surface = %output.surface.id(), size = %output.size, "Add config surface");
                OutputConfiguration {
                    surface: Arc::clone(&output.surface),
                    size: output.size,
                }
            })
            .collect();

        let callbacks = self.callbacks(inner.next_generation());
        let result = match inner.device.as_mut() {
            Some(device) => device.create_capture_session(outputs, callbacks),
            None => Err(ServiceError::Unavailable),
        };

        match result {
            Ok(()) => self.transition(inner, SessionState::Configuring),
            Err(e) => self.fail(inner, e.into()),
        }
    }

    /// Builds and submits the repeating record request.
    fn start_repeating(&self, inner: &mut SessionInner, mut capture: Box<dyn CaptureSession>) {
        let mut builder = CaptureRequest::builder(RequestTemplate::Record);
        for output in &inner.outputs {
            tracing::debug!(surface = %output.surface.id(), "Add target surface");
            builder = builder.add_target(Arc::clone(&output.surface));
        }
        let request = builder
            .capture_intent(CaptureIntent::VideoRecord)
            .apply_parameters(&inner.parameters)
            .build();

        tracing::info!(
            targets = request.targets.len(),
            sensitivity_iso = ?request.sensitivity_iso,
            exposure_time_us = ?request.exposure_time_us,
            frame_duration_us = ?request.frame_duration_us,
            "Submitting repeating capture request"
        );

        match capture.set_repeating_request(request) {
            Ok(()) => {
                inner.capture = Some(capture);
                self.transition(inner, SessionState::Capturing);
            }
            Err(e) => {
                let _ = capture.abort_captures();
                self.fail(inner, e.into());
            }
        }
    }

    /// Picks the device to open: the preferred one if present, else the first.
    fn select_device(&self) -> Result<String, SessionError> {
        let ids = self.service.device_ids()?;
        for id in &ids {
            tracing::debug!(device = %id, "Camera available");
        }
        if let Some(preferred) = &self.preferred_device {
            if ids.contains(preferred) {
                return Ok(preferred.clone());
            }
            tracing::warn!(device = %preferred, "Preferred camera not found, using first");
        }
        ids.into_iter().next().ok_or(SessionError::NoDevice)
    }
}

/// One physical camera and its capture lifecycle.
///
/// Sessions are shared through [`CameraSessionRegistry`]; only the
/// registry creates and tears them down.
///
/// [`CameraSessionRegistry`]: super::CameraSessionRegistry
pub struct CameraSession {
    core: Arc<SessionCore>,
}

impl CameraSession {
    pub(crate) fn new(service: Arc<dyn CameraService>, preferred_device: Option<String>) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<SessionCore>| SessionCore {
            service,
            preferred_device,
            weak_self: weak.clone(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Closed,
                outputs: Vec::new(),
                parameters: CameraParameters::default(),
                device_id: None,
                characteristics: None,
                device: None,
                capture: None,
                last_error: None,
                generation: 0,
                device_generation: 0,
                device_callbacks: None,
            }),
            changed: Condvar::new(),
        });
        Self { core }
    }

    /// Adds an output surface. Not allowed once capture is being set up.
    pub fn register_surface(
        &self,
        surface: SurfaceHandle,
        width: u32,
        height: u32,
    ) -> Result<(), SessionError> {
        let mut inner = self.core.lock();
        match inner.state {
            SessionState::Closed | SessionState::Open => {}
            SessionState::Error => return Err(SessionError::Unusable),
            state => return Err(SessionError::OutputsLocked(state)),
        }

        let size = FrameSize::new(width, height);
        tracing::debug!(surface = %surface.id(), %size, "Register surface");
        inner.outputs.push(RegisteredOutput { surface, size });
        Ok(())
    }

    /// Sets the parameters used by the next capture configuration.
    pub fn set_parameters(&self, parameters: CameraParameters) -> Result<(), SessionError> {
        parameters
            .validate()
            .map_err(|e| SessionError::InvalidParameters(e.to_string()))?;
        self.core.lock().parameters = parameters;
        Ok(())
    }

    pub fn parameters(&self) -> CameraParameters {
        self.core.lock().parameters.clone()
    }

    /// Opens the camera (or reuses the open device) and starts capture.
    ///
    /// Returns once the request is in flight; progress is reported
    /// through [`state`](Self::state) and [`wait_for_state`](Self::wait_for_state).
    pub fn start(&self) -> Result<(), SessionError> {
        let core = &self.core;
        let mut inner = core.lock();

        match inner.state {
            SessionState::Closed | SessionState::Open => {}
            SessionState::Error => return Err(SessionError::Unusable),
            state => return Err(SessionError::InvalidState(state)),
        }
        if !core.service.permission().is_granted() {
            tracing::warn!("Camera permission missing; start refused");
            return Err(SessionError::PermissionDenied);
        }
        if inner.outputs.is_empty() {
            return Err(SessionError::NoOutputs);
        }

        if inner.state == SessionState::Open && inner.device.is_some() {
            core.configure(&mut inner);
            return Ok(());
        }

        let device_id = core.select_device()?;
        let characteristics = core.service.characteristics(&device_id)?;
        characteristics.log(&device_id);
        inner.parameters.warn_out_of_range(&device_id, &characteristics);
        tracing::info!(
            device = %device_id,
            hardware_level = %characteristics.hardware_level,
            sensor_orientation = characteristics.sensor_orientation,
            "Opening camera"
        );

        inner.device_id = Some(device_id.clone());
        inner.characteristics = Some(characteristics);
        inner.last_error = None;
        let generation = inner.next_generation();
        inner.device_generation = generation;
        let callbacks = core.callbacks(generation);
        inner.device_callbacks = Some(Arc::clone(&callbacks));
        core.transition(&mut inner, SessionState::Opening);

        if let Err(e) = core.service.open_device(&device_id, callbacks) {
            let error = SessionError::from(e);
            core.fail(&mut inner, error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Stops capture and clears outputs; releases the device when `release_device`.
    pub(crate) fn close(&self, release_device: bool) {
        let core = &self.core;
        let mut inner = core.lock();
        inner.next_generation();

        if let Some(mut capture) = inner.capture.take() {
            if let Err(e) = capture.abort_captures() {
                tracing::warn!(error = %e, "Failed to abort captures");
            }
        }
        inner.outputs.clear();

        if release_device {
            if let Some(mut device) = inner.device.take() {
                device.close();
                tracing::info!(device = ?inner.device_id, "Camera device released");
            }
            inner.device_callbacks = None;
            core.transition(&mut inner, SessionState::Closed);
        } else {
            let next = match inner.state {
                SessionState::Error => SessionState::Error,
                _ if inner.device.is_some() => SessionState::Open,
                _ => SessionState::Closed,
            };
            core.transition(&mut inner, next);
        }
    }

    pub fn state(&self) -> SessionState {
        self.core.lock().state
    }

    /// Error that moved the session into `Error`, if any.
    pub fn last_error(&self) -> Option<SessionError> {
        self.core.lock().last_error.clone()
    }

    /// Identifier of the selected device.
    pub fn device_id(&self) -> Option<String> {
        self.core.lock().device_id.clone()
    }

    pub fn characteristics(&self) -> Option<DeviceCharacteristics> {
        self.core.lock().characteristics.clone()
    }

    pub fn outputs(&self) -> Vec<RegisteredOutput> {
        self.core.lock().outputs.clone()
    }

    /// Blocks until the session reaches `target`.
    ///
    /// Fails early with the recorded error if the session enters `Error`.
    pub fn wait_for_state(&self, target: SessionState, timeout: Duration) -> Result<(), SessionError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.core.lock();
        loop {
            if inner.state == target {
                return Ok(());
            }
            if inner.state == SessionState::Error {
                return Err(inner.last_error.clone().unwrap_or(SessionError::Unusable));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout {
                    expected: target,
                    actual: inner.state,
                });
            }
            inner = self
                .core
                .changed
                .wait_timeout(inner, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }
}

impl fmt::Debug for CameraSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.core.lock();
        f.debug_struct("CameraSession")
            .field("state", &inner.state)
            .field("device_id", &inner.device_id)
            .field("outputs", &inner.outputs)
            .finish()
    }
}
