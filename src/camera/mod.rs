//! Camera - Device Enumeration
//!
//! ## Responsibilities
//!
//! - Query the platform for video-input devices
//! - Rank devices (physical first, virtual/bridge cameras last)
//! - Pick the starting device for the current deployment mode
//!
//! Zero devices and a denied permission are reported identically as
//! `Error::NoDevicesFound`; the underlying cause is only logged.

pub mod ranking;
mod types;

pub use types::*;

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Platform query for video-input devices
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn list_cameras(&self) -> std::result::Result<Vec<CameraDevice>, CameraError>;
}

/// Device enumerator
///
/// Holds only the ranking policy; nothing returned is retained.
#[derive(Debug, Clone, Default)]
pub struct DeviceEnumerator {
    filter: VirtualCameraFilter,
}

impl DeviceEnumerator {
    pub fn new(filter: VirtualCameraFilter) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &VirtualCameraFilter {
        &self.filter
    }

    /// List and rank cameras, starting from index 0
    pub async fn list_cameras<S>(&self, source: &S, mode: ProductionMode) -> Result<RankedDevices>
    where
        S: DeviceSource + ?Sized,
    {
        self.list_cameras_from(source, mode, 0).await
    }

    /// List and rank cameras, applying the mode's skip rule from `from`
    pub async fn list_cameras_from<S>(
        &self,
        source: &S,
        mode: ProductionMode,
        from: usize,
    ) -> Result<RankedDevices>
    where
        S: DeviceSource + ?Sized,
    {
        let devices = self.enumerate(source).await?;
        let devices = ranking::rank_devices(devices, &self.filter);
        let preferred = ranking::preferred_index(&devices, from, mode, &self.filter);

        tracing::debug!(
            count = devices.len(),
            preferred = preferred,
            mode = ?mode,
            "Cameras enumerated"
        );

        Ok(RankedDevices { devices, preferred })
    }

    /// Platform order, unranked
    pub async fn enumerate<S>(&self, source: &S) -> Result<Vec<CameraDevice>>
    where
        S: DeviceSource + ?Sized,
    {
        let devices = match source.list_cameras().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(error = %e, "Camera enumeration failed");
                return Err(Error::NoDevicesFound);
            }
        };

        if devices.is_empty() {
            tracing::warn!("No video input devices reported");
            return Err(Error::NoDevicesFound);
        }

        Ok(devices)
    }
}
