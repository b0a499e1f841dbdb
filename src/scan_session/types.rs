//! Scan session types

use crate::camera::ProductionMode;
use crate::decode_engine::EngineConfig;
use crate::detection_throttle::ThrottlePolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Camera session lifecycle state
///
/// Shared shape for the scan and photo sessions; each session owns its own
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Starting,
    Active,
    Stopping,
}

pub type ScanSessionState = SessionState;

/// Detection handed upward after the throttle accepted it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedDetection {
    pub payload: String,
    pub device_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// Receiver of accepted detections
#[async_trait]
pub trait DetectionSink: Send + Sync {
    async fn on_detection(&self, detection: AcceptedDetection);
}

/// Scan session configuration
#[derive(Debug, Clone)]
pub struct ScanSessionConfig {
    pub mode: ProductionMode,
    pub throttle: ThrottlePolicy,
    pub engine: EngineConfig,
    /// Upper bound for one bind attempt
    pub bind_timeout: Duration,
    /// Upper bound for a release, and for waiting on an in-flight stop
    pub release_timeout: Duration,
    /// Pause between two bind attempts
    pub retry_delay: Duration,
    /// Pause between stop and start when switching cameras
    pub restart_delay: Duration,
}

impl Default for ScanSessionConfig {
    fn default() -> Self {
        Self {
            mode: ProductionMode::default(),
            throttle: ThrottlePolicy::default(),
            engine: EngineConfig::DEFAULT,
            bind_timeout: Duration::from_secs(5),
            release_timeout: Duration::from_secs(3),
            retry_delay: Duration::from_millis(500),
            restart_delay: Duration::from_millis(500),
        }
    }
}
