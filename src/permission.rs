use nokhwa::{nokhwa_check, nokhwa_initialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
}

/// Runtime camera permission.
pub trait PermissionGate {
    /// Whether the permission is already held.
    fn check(&self) -> bool;

    /// Asks the user; only called when `check` said no.
    fn request(&mut self) -> PermissionOutcome;
}

/// Platform camera authorization through nokhwa. On platforms without an
/// authorization step this is always granted.
pub struct CameraPermission {
    timeout: Duration,
}

impl CameraPermission {
    pub fn new(timeout: Duration) -> CameraPermission {
        CameraPermission { timeout }
    }
}

impl Default for CameraPermission {
    fn default() -> Self {
        CameraPermission::new(Duration::from_secs(60))
    }
}

impl PermissionGate for CameraPermission {
    fn check(&self) -> bool {
        nokhwa_check()
    }

    fn request(&mut self) -> PermissionOutcome {
        let (tx, rx) = flume::bounded(1);
        nokhwa_initialize(move |granted| {
            debug!("User said {}", granted);
            let _ = tx.send(granted);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(true) => PermissionOutcome::Granted,
            Ok(false) => PermissionOutcome::Denied,
            Err(e) => {
                warn!("No answer to camera permission request: {e:?}");
                PermissionOutcome::Denied
            }
        }
    }
}

/// For captures that never touch a camera.
pub struct Preapproved;

impl PermissionGate for Preapproved {
    fn check(&self) -> bool {
        true
    }

    fn request(&mut self) -> PermissionOutcome {
        PermissionOutcome::Granted
    }
}
