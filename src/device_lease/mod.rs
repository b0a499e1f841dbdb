//! DeviceLeaseManager - one camera handle per session
//!
//! ## Purpose
//!
//! - A session holds exactly one camera handle at a time
//! - A new acquisition waits until the previous handle has been released
//!   ("release old, then acquire new")
//! - The wait is bounded; on timeout the acquisition fails as busy
//!
//! There are exactly two slots, one for the scan session and one for the
//! photo session. They never wait on each other.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;

/// Default wait for the previous handle (5 seconds)
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5000;

/// Camera consumer that owns a handle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseSlot {
    /// Barcode scan session
    Scan,
    /// Product-photo session
    Photo,
}

impl LeaseSlot {
    /// Session name published to the UI
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseSlot::Scan => "scan",
            LeaseSlot::Photo => "photo",
        }
    }
}

impl fmt::Display for LeaseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DeviceLeaseManager - serializes camera handles per session
pub struct DeviceLeaseManager {
    scan: Arc<Mutex<()>>,
    photo: Arc<Mutex<()>>,
    wait_timeout: Duration,
}

impl DeviceLeaseManager {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_WAIT_TIMEOUT_MS)
    }

    /// Create with a custom wait timeout
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            scan: Arc::new(Mutex::new(())),
            photo: Arc::new(Mutex::new(())),
            wait_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn slot(&self, slot: LeaseSlot) -> &Arc<Mutex<()>> {
        match slot {
            LeaseSlot::Scan => &self.scan,
            LeaseSlot::Photo => &self.photo,
        }
    }

    /// Acquire the slot's handle, waiting for a prior release
    ///
    /// The returned lease releases the slot when dropped.
    pub async fn acquire(&self, slot: LeaseSlot, device_id: &str) -> Result<DeviceLease, LeaseError> {
        let lock = self.slot(slot).clone();

        match timeout(self.wait_timeout, lock.lock_owned()).await {
            Ok(guard) => {
                tracing::debug!(slot = %slot, device_id = %device_id, "Camera handle acquired");
                Ok(DeviceLease {
                    slot,
                    device_id: device_id.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => {
                let waited_ms = self.wait_timeout.as_millis() as u64;
                tracing::warn!(
                    slot = %slot,
                    device_id = %device_id,
                    timeout_ms = waited_ms,
                    "Previous camera handle not released in time"
                );
                Err(LeaseError::Busy { slot, waited_ms })
            }
        }
    }

    /// True while a lease for `slot` is alive
    pub fn is_held(&self, slot: LeaseSlot) -> bool {
        self.slot(slot).try_lock().is_err()
    }
}

impl Default for DeviceLeaseManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Camera handle lease - released on Drop
#[derive(Debug)]
pub struct DeviceLease {
    slot: LeaseSlot,
    device_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceLease {
    pub fn slot(&self) -> LeaseSlot {
        self.slot
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        tracing::debug!(slot = %self.slot, device_id = %self.device_id, "Camera handle released");
    }
}

/// Lease error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    #[error("{slot} camera handle still held after {waited_ms}ms")]
    Busy { slot: LeaseSlot, waited_ms: u64 },
}
