//! Application state
//!
//! Holds all shared components and configuration

use crate::camera::{DeviceEnumerator, ProductionMode, VirtualCameraFilter, DEFAULT_VIRTUAL_KEYWORDS};
use crate::decode_engine::DecodeEngine;
use crate::detection_throttle::{ThrottlePolicy, DEFAULT_COOLDOWN_MS, DEFAULT_MIN_PAYLOAD_LEN};
use crate::device_lease::DeviceLeaseManager;
use crate::feedback_hub::FeedbackHub;
use crate::inventory_client::ProductLookup;
use crate::lookup_dispatch::LookupDispatcher;
use crate::photo_session::{PhotoSessionConfig, ProductPhotoSession, StillCamera};
use crate::scan_session::{ScanSession, ScanSessionConfig};
use crate::session_trigger::SessionTrigger;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Inventory API base URL
    pub inventory_api_url: String,
    /// Host the front end is served from (drives production mode)
    pub deployment_host: String,
    /// Forced production mode, overrides host detection
    pub production: Option<bool>,
    pub min_payload_len: usize,
    pub cooldown_ms: u64,
    /// 0 disables the burst guard
    pub burst_ms: u64,
    pub bind_timeout_ms: u64,
    pub release_timeout_ms: u64,
    pub retry_delay_ms: u64,
    /// Label keywords marking virtual/bridge cameras
    pub virtual_keywords: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl AppConfig {
    /// Build from any key -> value source (the environment by default)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let production = lookup("SCANNER_PRODUCTION").and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            other => {
                tracing::warn!(value = %other, "Invalid SCANNER_PRODUCTION, using host detection");
                None
            }
        });

        let virtual_keywords = lookup("VIRTUAL_CAMERA_KEYWORDS")
            .map(|v| {
                v.split(',')
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_VIRTUAL_KEYWORDS.iter().map(|k| k.to_string()).collect());

        Self {
            inventory_api_url: lookup("INVENTORY_API_URL")
                .unwrap_or_else(|| "http://localhost:5000".to_string()),
            deployment_host: lookup("DEPLOYMENT_HOST").unwrap_or_else(|| "localhost".to_string()),
            production,
            min_payload_len: parse_or(&lookup, "SCANNER_MIN_PAYLOAD_LEN", DEFAULT_MIN_PAYLOAD_LEN),
            cooldown_ms: parse_or(&lookup, "SCANNER_COOLDOWN_MS", DEFAULT_COOLDOWN_MS),
            burst_ms: parse_or(&lookup, "SCANNER_BURST_MS", 0),
            bind_timeout_ms: parse_or(&lookup, "CAMERA_BIND_TIMEOUT_MS", 5000),
            release_timeout_ms: parse_or(&lookup, "CAMERA_RELEASE_TIMEOUT_MS", 3000),
            retry_delay_ms: parse_or(&lookup, "CAMERA_RETRY_DELAY_MS", 500),
            virtual_keywords,
        }
    }

    pub fn mode(&self) -> ProductionMode {
        match self.production {
            Some(true) => ProductionMode::Production,
            Some(false) => ProductionMode::Development,
            None => ProductionMode::from_host(&self.deployment_host),
        }
    }

    pub fn throttle_policy(&self) -> ThrottlePolicy {
        ThrottlePolicy {
            min_len: self.min_payload_len,
            cooldown: Duration::from_millis(self.cooldown_ms),
            burst_interval: Duration::from_millis(self.burst_ms),
        }
    }

    pub fn virtual_filter(&self) -> VirtualCameraFilter {
        VirtualCameraFilter::new(self.virtual_keywords.iter().cloned())
    }

    pub fn scan_config(&self) -> ScanSessionConfig {
        ScanSessionConfig {
            mode: self.mode(),
            throttle: self.throttle_policy(),
            bind_timeout: Duration::from_millis(self.bind_timeout_ms),
            release_timeout: Duration::from_millis(self.release_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            restart_delay: Duration::from_millis(self.retry_delay_ms),
            ..ScanSessionConfig::default()
        }
    }

    pub fn photo_config(&self) -> PhotoSessionConfig {
        PhotoSessionConfig {
            bind_timeout: Duration::from_millis(self.bind_timeout_ms),
            release_timeout: Duration::from_millis(self.release_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            ..PhotoSessionConfig::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key = %key, value = %raw, default = %default, "Invalid number, using default");
                default
            }
        },
        None => default,
    }
}

/// Application state shared across tasks
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// FeedbackHub (flash, toasts, session state)
    pub hub: Arc<FeedbackHub>,
    /// DeviceLeaseManager (one handle per session)
    pub leases: Arc<DeviceLeaseManager>,
    /// Barcode scan session
    pub scan: ScanSession,
    /// Visibility-driven trigger over the scan session
    pub trigger: Arc<SessionTrigger>,
    /// Scanner visibility signal
    pub visibility: Arc<watch::Sender<bool>>,
    /// Product photo session (only with a still camera backend)
    pub photo: Option<Arc<ProductPhotoSession>>,
}

impl AppState {
    /// Wire every component; must run inside a tokio runtime
    pub fn build(
        config: AppConfig,
        engine: Arc<dyn DecodeEngine>,
        lookup: Arc<dyn ProductLookup>,
        still_camera: Option<Arc<dyn StillCamera>>,
    ) -> Self {
        let hub = Arc::new(FeedbackHub::new());
        let leases = Arc::new(DeviceLeaseManager::with_timeout(config.bind_timeout_ms));
        let enumerator = DeviceEnumerator::new(config.virtual_filter());

        let dispatcher = Arc::new(LookupDispatcher::new(lookup, hub.clone()));
        let scan = ScanSession::new(
            engine,
            enumerator.clone(),
            leases.clone(),
            hub.clone(),
            dispatcher,
            config.scan_config(),
        );

        let (visibility, visibility_rx) = watch::channel(false);
        let trigger = Arc::new(SessionTrigger::spawn(scan.clone(), visibility_rx));

        let photo = still_camera.map(|camera| {
            Arc::new(ProductPhotoSession::new(
                camera,
                enumerator,
                leases.clone(),
                hub.clone(),
                config.photo_config(),
            ))
        });

        tracing::info!(
            mode = ?config.mode(),
            inventory_api_url = %config.inventory_api_url,
            photo = photo.is_some(),
            "Application state built"
        );

        Self {
            config,
            hub,
            leases,
            scan,
            trigger,
            visibility: Arc::new(visibility),
            photo,
        }
    }

    /// Scanner container shown
    pub fn show_scanner(&self) {
        self.visibility.send_replace(true);
    }

    /// Scanner container hidden
    pub fn hide_scanner(&self) {
        self.visibility.send_replace(false);
    }
}
