//! DecodeEngine - external barcode/QR decoder seam
//!
//! The engine is a black box: it binds a camera, decodes frames, and pushes
//! raw events into the channel handed to `start`. Payload decoding is never
//! done in this crate.

mod line;

pub use line::LineDecodeEngine;

use crate::camera::{CameraError, DeviceSource};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Depth of the engine -> session event queue
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Fixed engine configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Frames decoded per second
    pub fps: u32,
    /// Preview aspect ratio (16:9)
    pub aspect_ratio: f64,
}

impl EngineConfig {
    pub const DEFAULT: EngineConfig = EngineConfig {
        fps: 10,
        aspect_ratio: 1.777778,
    };
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Raw event from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A frame decoded to a payload
    Decoded { payload: String, at: Instant },
    /// Per-frame decode error (no code in view, blur, ...)
    Error(String),
}

impl EngineEvent {
    pub fn decoded(payload: impl Into<String>) -> Self {
        EngineEvent::Decoded {
            payload: payload.into(),
            at: Instant::now(),
        }
    }
}

/// Decode engine bound to one camera at a time
#[async_trait]
pub trait DecodeEngine: DeviceSource {
    /// Bind `device_id` and start emitting events into `events`
    async fn start(
        &self,
        device_id: &str,
        config: &EngineConfig,
        events: mpsc::Sender<EngineEvent>,
    ) -> std::result::Result<(), CameraError>;

    /// Release the camera and stop emitting
    async fn stop(&self) -> std::result::Result<(), CameraError>;
}
