//! Camera-access permission gate.
//!
//! The host flips the gate when the user grants access; waiters are
//! woken immediately instead of sleeping and re-checking.

use super::session::SessionError;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Shared permission flag with wait/notify.
#[derive(Debug)]
pub struct PermissionGate {
    granted: Mutex<bool>,
    changed: Condvar,
}

impl PermissionGate {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: Mutex::new(granted),
            changed: Condvar::new(),
        }
    }

    /// Marks access as granted and wakes all waiters.
    pub fn grant(&self) {
        *self.lock() = true;
        self.changed.notify_all();
        tracing::info!("Camera permission granted");
    }

    /// Marks access as revoked.
    pub fn revoke(&self) {
        *self.lock() = false;
        self.changed.notify_all();
        tracing::info!("Camera permission revoked");
    }

    pub fn is_granted(&self) -> bool {
        *self.lock()
    }

    /// Waits for permission in bounded attempts.
    ///
    /// Each attempt lasts `interval` and ends early only when access is
    /// granted. Wakeups that leave the gate closed, such as a `revoke`,
    /// do not use up an attempt. After `max_attempts` intervals the
    /// result is [`SessionError::PermissionDenied`], and the caller may
    /// retry.
    pub fn wait(&self, interval: Duration, max_attempts: u32) -> Result<(), SessionError> {
        let mut granted = self.lock();
        for attempt in 0..max_attempts {
            if *granted {
                return Ok(());
            }
            tracing::debug!(attempt, "Missing camera permission");

            // An interval too long to represent waits for the grant itself
            let attempt_end = Instant::now().checked_add(interval);
            while !*granted {
                let remaining = match attempt_end {
                    Some(end) => end.saturating_duration_since(Instant::now()),
                    None => Duration::MAX,
                };
                if remaining.is_zero() {
                    break;
                }
                granted = match attempt_end {
                    Some(_) => self
                        .changed
                        .wait_timeout(granted, remaining)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0),
                    None => self
                        .changed
                        .wait(granted)
                        .unwrap_or_else(PoisonError::into_inner),
                };
            }
        }

        if *granted {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied)
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.granted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PermissionGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_granted_returns_immediately() {
        let gate = PermissionGate::new(true);
        assert!(gate.wait(Duration::from_secs(10), 1).is_ok());
    }

    #[test]
    fn test_denied_after_bounded_attempts() {
        let gate = PermissionGate::default();
        let start = Instant::now();
        assert_eq!(
            gate.wait(Duration::from_millis(10), 3),
            Err(SessionError::PermissionDenied)
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_grant_wakes_waiter() {
        let gate = Arc::new(PermissionGate::default());
        let granter = Arc::clone(&gate);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            granter.grant();
        });

        let start = Instant::now();
        assert!(gate.wait(Duration::from_secs(10), 2).is_ok());
        assert!(start.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }

    #[test]
    fn test_repeated_revokes_do_not_shorten_wait() {
        let gate = Arc::new(PermissionGate::default());
        let done = Arc::new(AtomicBool::new(false));
        let revoker = {
            let gate = Arc::clone(&gate);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::SeqCst) {
                    gate.revoke();
                    std::thread::sleep(Duration::from_millis(2));
                }
            })
        };

        let start = Instant::now();
        assert_eq!(
            gate.wait(Duration::from_millis(40), 3),
            Err(SessionError::PermissionDenied)
        );
        assert!(start.elapsed() >= Duration::from_millis(120));

        done.store(true, Ordering::SeqCst);
        revoker.join().unwrap();
    }

    #[test]
    fn test_revoke() {
        let gate = PermissionGate::new(true);
        gate.revoke();
        assert!(!gate.is_granted());
    }
}
