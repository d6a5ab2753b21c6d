//! Shared ownership of the camera session.
//!
//! Every component that needs the camera acquires a [`SessionHandle`].
//! The session is created by the first acquire and torn down, with the
//! device released, when the last handle goes away. Dropping a handle
//! that is not the last only stops capture and clears the outputs.

use super::service::CameraService;
use super::session::CameraSession;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct RegistryState {
    session: Option<Arc<CameraSession>>,
    owners: usize,
}

struct RegistryInner {
    service: Arc<dyn CameraService>,
    preferred_device: Option<String>,
    state: Mutex<RegistryState>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner-counted access to one camera session.
#[derive(Clone)]
pub struct CameraSessionRegistry {
    inner: Arc<RegistryInner>,
}

impl CameraSessionRegistry {
    pub fn new(service: Arc<dyn CameraService>) -> Self {
        Self::build(service, None)
    }

    /// Creates a registry whose session prefers `device_id` when opening.
    pub fn with_device(service: Arc<dyn CameraService>, device_id: impl Into<String>) -> Self {
        Self::build(service, Some(device_id.into()))
    }

    fn build(service: Arc<dyn CameraService>, preferred_device: Option<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                service,
                preferred_device,
                state: Mutex::new(RegistryState {
                    session: None,
                    owners: 0,
                }),
            }),
        }
    }

    /// Returns a handle to the shared session, creating it if needed.
    pub fn acquire(&self) -> SessionHandle {
        let mut state = self.inner.lock();
        let session = match &state.session {
            Some(session) => Arc::clone(session),
            None => {
                tracing::debug!(device = ?self.inner.preferred_device, "Creating camera session");
                let session = Arc::new(CameraSession::new(
                    Arc::clone(&self.inner.service),
                    self.inner.preferred_device.clone(),
                ));
                state.session = Some(Arc::clone(&session));
                session
            }
        };
        state.owners += 1;
        tracing::debug!(owners = state.owners, "Camera session acquired");

        SessionHandle {
            registry: Arc::clone(&self.inner),
            session,
        }
    }

    /// Number of live handles.
    pub fn owner_count(&self) -> usize {
        self.inner.lock().owners
    }

    /// True while a session exists.
    pub fn has_session(&self) -> bool {
        self.inner.lock().session.is_some()
    }
}

impl fmt::Debug for CameraSessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("CameraSessionRegistry")
            .field("owners", &state.owners)
            .field("session", &state.session)
            .finish()
    }
}

/// One owner's claim on the camera session.
///
/// Derefs to [`CameraSession`]. Dropping the handle closes it.
pub struct SessionHandle {
    registry: Arc<RegistryInner>,
    session: Arc<CameraSession>,
}

impl SessionHandle {
    /// Releases this claim. Equivalent to dropping the handle.
    pub fn close(self) {
        drop(self);
    }
}

impl Deref for SessionHandle {
    type Target = CameraSession;

    fn deref(&self) -> &CameraSession {
        &self.session
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.session).finish()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        state.owners = state.owners.saturating_sub(1);
        let last = state.owners == 0;

        tracing::debug!(owners = state.owners, last, "Camera session released");
        self.session.close(last);
        if last {
            state.session = None;
        }
    }
}
