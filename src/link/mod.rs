// link/mod.rs
//! Wireless transport seam. The conversation engine only ever sees these traits.

#[cfg(feature = "ble")]
pub mod ble;
pub mod simulated;

use crate::{config::LinkSettings, error::{AppError, LinkError}};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::debug;

/// Opens transient connections to devices.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, device_id: &str) -> Result<Box<dyn Link>, LinkError>;
}

/// An open connection to one device, valid for a single conversation.
#[async_trait]
pub trait Link: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Waits up to `timeout` for the next notification on the response
    /// characteristic. `Ok(None)` means nothing arrived in time.
    async fn await_notification(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, LinkError>;

    async fn disconnect(self: Box<Self>) -> Result<(), LinkError>;
}

/// Builds the transport selected by `link.backend`. `connect_timeout` bounds
/// each whole connect, so any scanning a backend does must finish inside it.
pub async fn from_settings(
    settings: &LinkSettings,
    connect_timeout: Duration,
) -> Result<Arc<dyn Transport>, AppError> {
    let scan = scan_deadline(Duration::from_millis(settings.scan_timeout_ms), connect_timeout);
    debug!(backend = %settings.backend, scan_ms = scan.as_millis() as u64, "Selecting link backend");
    match settings.backend.as_str() {
        "simulated" => Ok(Arc::new(simulated::SimulatedTransport::new(&settings.simulated))),
        #[cfg(feature = "ble")]
        "ble" => Ok(Arc::new(ble::BleTransport::new(scan).await?)),
        other => Err(AppError::UnsupportedBackend(other.to_string())),
    }
}

/// Scan window for a single connect. Capped at three quarters of the connect
/// timeout so the scan ends, and its cleanup runs, before the connect is cut off.
pub fn scan_deadline(scan: Duration, connect_timeout: Duration) -> Duration {
    scan.min(connect_timeout * 3 / 4)
}

/// Async cleanup owed by a half-finished link operation.
///
/// Call [`CleanupGuard::run`] on error paths and [`CleanupGuard::disarm`] once
/// the operation succeeds. If the owning future is dropped first, e.g. by an
/// outer `tokio::time::timeout`, the cleanup is spawned onto the runtime.
#[must_use = "dropping the guard runs the cleanup"]
pub struct CleanupGuard {
    cleanup: Option<BoxFuture<'static, ()>>,
}

impl CleanupGuard {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            cleanup: Some(Box::pin(cleanup)),
        }
    }

    pub fn disarm(mut self) {
        self.cleanup = None;
    }

    pub async fn run(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup.await;
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Link operation cancelled, spawning cleanup");
                handle.spawn(cleanup);
            }
            Err(_) => debug!("No runtime left to run link cleanup"),
        }
    }
}
