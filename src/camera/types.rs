//! Camera device types

use serde::{Deserialize, Serialize};

/// Label keywords that identify software/bridge cameras
pub const DEFAULT_VIRTUAL_KEYWORDS: &[&str] = &[
    "camo",
    "virtual",
    "droidcam",
    "epoccam",
    "manycam",
    "snap camera",
    "xsplit",
];

/// Device kind reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    VideoInput,
}

/// Camera device as enumerated by the platform
///
/// Immutable once enumerated. The label is untrusted: it may be empty,
/// localized, or identical across devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub kind: DeviceKind,
}

impl CameraDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: DeviceKind::VideoInput,
        }
    }
}

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductionMode {
    /// Virtual/bridge cameras are avoided whenever a physical one exists
    Production,
    /// Local development; virtual cameras are first-class
    Development,
}

impl ProductionMode {
    /// Derive the mode from the host the front end is served from
    ///
    /// Loopback hosts are development, everything else is production.
    pub fn from_host(host: &str) -> Self {
        if host.contains("localhost") || host.contains("127.0.0.1") {
            Self::Development
        } else {
            Self::Production
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl Default for ProductionMode {
    fn default() -> Self {
        Self::Production
    }
}

/// Ranked device list with the index a session should bind first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedDevices {
    pub devices: Vec<CameraDevice>,
    /// Always `< devices.len()`
    pub preferred: usize,
}

impl RankedDevices {
    pub fn preferred_device(&self) -> Option<&CameraDevice> {
        self.devices.get(self.preferred)
    }
}

/// Label heuristic for virtual/bridge cameras
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualCameraFilter {
    /// Lower-cased keywords
    keywords: Vec<String>,
}

impl VirtualCameraFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// True when the label matches any virtual-camera keyword
    pub fn is_virtual(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.keywords.iter().any(|k| label.contains(k.as_str()))
    }

    pub fn is_virtual_device(&self, device: &CameraDevice) -> bool {
        self.is_virtual(&device.label)
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl Default for VirtualCameraFilter {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_KEYWORDS.iter().copied())
    }
}

/// Backend-level camera failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera not found: {0}")]
    NotFound(String),
    #[error("camera busy: {0}")]
    Busy(String),
    #[error("camera failure: {0}")]
    Failed(String),
}
