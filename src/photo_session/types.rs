//! Product photo types

use crate::camera::{CameraError, DeviceSource};
use crate::scan_session::SessionState;
use async_trait::async_trait;
use base64::Engine;
use std::time::Duration;

pub type ProductPhotoSessionState = SessionState;

/// Captured still frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// e.g. "image/jpeg"
    pub mime: String,
}

impl StillImage {
    pub fn jpeg(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            mime: "image/jpeg".to_string(),
        }
    }

    /// `data:` URL as the product form's image field expects it
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.data);
        format!("data:{};base64,{}", self.mime, encoded)
    }
}

/// Camera capable of a live preview and still capture
#[async_trait]
pub trait StillCamera: DeviceSource {
    async fn open(&self, device_id: &str) -> Result<Box<dyn PreviewStream>, CameraError>;
}

/// Open preview on one device
#[async_trait]
pub trait PreviewStream: Send {
    /// Copy the current frame
    async fn capture_frame(&mut self) -> Result<StillImage, CameraError>;

    /// Release the device
    async fn close(self: Box<Self>) -> Result<(), CameraError>;
}

/// Photo session configuration
#[derive(Debug, Clone)]
pub struct PhotoSessionConfig {
    pub bind_timeout: Duration,
    pub release_timeout: Duration,
    pub retry_delay: Duration,
    /// Upper bound for one frame capture
    pub capture_timeout: Duration,
}

impl Default for PhotoSessionConfig {
    fn default() -> Self {
        Self {
            bind_timeout: Duration::from_secs(5),
            release_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_millis(500),
            capture_timeout: Duration::from_secs(3),
        }
    }
}
