//! Production features for modulesmgrd
//!
//! Systemd readiness notification and cooperative shutdown.

use crate::error::{ModulesMgmtError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Systemd notification for notify-on-ready
///
/// Enabled when run under systemd with Type=notify. READY is sent once the
/// static detection pass has classified every port.
#[derive(Clone, Debug)]
pub struct SystemdNotifier {
    /// Is systemd socket available (NOTIFY_SOCKET env var set)?
    enabled: bool,
}

impl SystemdNotifier {
    /// Create new systemd notifier
    pub fn new() -> Self {
        let enabled = std::env::var("NOTIFY_SOCKET").is_ok();

        if enabled {
            debug!("Systemd notification socket detected");
        }

        Self { enabled }
    }

    /// Notifier that never talks to systemd.
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Send READY notification to systemd
    pub fn notify_ready(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        sd_notify::notify(false, &[sd_notify::NotifyState::Ready]).map_err(|e| {
            ModulesMgmtError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to send READY notification: {}", e),
            ))
        })?;

        info!("Sent READY notification to systemd");
        Ok(())
    }

    /// Send status message to systemd
    pub fn notify_status(&self, message: &str) -> Result<()> {
        if !self.enabled {
            debug!(status = message, "Status");
            return Ok(());
        }

        sd_notify::notify(false, &[sd_notify::NotifyState::Status(message)]).map_err(|e| {
            ModulesMgmtError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to send STATUS notification: {}", e),
            ))
        })
    }

    /// Check if systemd is available
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for SystemdNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative stop signal shared by the driver loop and the settle timer.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    shutdown_requested: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request graceful shutdown
    pub fn request_shutdown(&self) {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            info!("Graceful shutdown requested");
        }
    }

    /// Check if shutdown was requested
    pub fn should_shutdown(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}
