//! Camera session management.
//!
//! A [`CameraSession`] drives one device from closed to capturing into
//! a set of registered output surfaces. Sessions are shared through a
//! [`CameraSessionRegistry`]; the device stays open while any
//! [`SessionHandle`] is alive.

mod parameters;
mod permission;
mod registry;
#[allow(clippy::module_inception)]
mod session;
mod service;
mod simulated;

pub use parameters::{
    CameraParameters, CaptureIntent, CaptureRequest, CaptureRequestBuilder, RequestTemplate,
};
pub use permission::PermissionGate;
pub use registry::{CameraSessionRegistry, SessionHandle};
pub use service::{
    CameraDevice, CameraEvent, CameraService, CaptureSession, DeviceCallbacks,
    DeviceCharacteristics, HardwareLevel, OutputConfiguration, PixelFormat, ServiceError,
    StreamConfiguration,
};
pub use session::{CameraSession, RegisteredOutput, SessionError, SessionState};
pub use simulated::{SimulatedCameraService, SimulationConfig};
