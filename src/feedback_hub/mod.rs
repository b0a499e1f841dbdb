//! FeedbackHub - UI notification distribution
//!
//! ## Responsibilities
//!
//! - Subscriber management (scanner overlay, toast area, product panel)
//! - Transient flash overlay on accepted detections
//! - User-visible toast notifications (camera errors, scan results)
//! - Session state changes for button visibility
//!
//! Presentation only: nothing here feeds back into session state.

use crate::inventory_client::Product;
use crate::scan_session::SessionState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Flash overlay colour (translucent green)
pub const FLASH_COLOR: &str = "rgba(80,255,80,0.4)";
/// Flash overlay duration
pub const FLASH_DURATION_MS: u64 = 180;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    SessionState(SessionStateMessage),
    Flash(FlashMessage),
    Toast(ToastMessage),
    Detection(DetectionMessage),
    LookupResult(LookupResultMessage),
}

impl HubMessage {
    fn kind(&self) -> &'static str {
        match self {
            HubMessage::SessionState(_) => "session_state",
            HubMessage::Flash(_) => "flash",
            HubMessage::Toast(_) => "toast",
            HubMessage::Detection(_) => "detection",
            HubMessage::LookupResult(_) => "lookup_result",
        }
    }
}

/// Session state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateMessage {
    /// "scan" or "photo"
    pub session: String,
    pub state: SessionState,
    pub device_id: Option<String>,
    pub timestamp: String,
}

/// Flash overlay request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashMessage {
    pub color: String,
    pub duration_ms: u64,
}

/// Toast severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Error,
}

/// Toast notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToastMessage {
    pub level: ToastLevel,
    pub message: String,
    pub timestamp: String,
}

/// Accepted detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionMessage {
    pub payload: String,
    pub device_id: String,
    pub timestamp: String,
}

/// Product lookup outcome for the details panel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupResultMessage {
    pub payload: String,
    pub product: Option<Product>,
}

struct Subscriber {
    id: Uuid,
    name: String,
    tx: mpsc::UnboundedSender<HubMessage>,
}

/// FeedbackHub instance
pub struct FeedbackHub {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    subscriber_count: AtomicU64,
}

impl FeedbackHub {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicU64::new(0),
        }
    }

    /// Register a subscriber
    pub async fn subscribe(&self, name: impl Into<String>) -> (Uuid, mpsc::UnboundedReceiver<HubMessage>) {
        let id = Uuid::new_v4();
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::debug!(subscriber_id = %id, name = %name, "Feedback subscriber registered");

        self.subscribers
            .write()
            .await
            .insert(id, Subscriber { id, name, tx });
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);

        (id, rx)
    }

    pub async fn unsubscribe(&self, id: &Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(sub) = subscribers.remove(id) {
            self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(subscriber_id = %id, name = %sub.name, "Feedback subscriber removed");
        }
    }

    /// Send a message to every subscriber
    pub async fn broadcast(&self, message: HubMessage) {
        tracing::debug!(message_type = %message.kind(), "Broadcasting feedback");

        let closed: Vec<Uuid> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .values()
                .filter(|sub| sub.tx.send(message.clone()).is_err())
                .map(|sub| sub.id)
                .collect()
        };

        if closed.is_empty() {
            return;
        }

        // receiver dropped without unsubscribing
        let mut subscribers = self.subscribers.write().await;
        for id in closed {
            if let Some(sub) = subscribers.remove(&id) {
                self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
                tracing::debug!(subscriber_id = %id, name = %sub.name, "Closed feedback subscriber pruned");
            }
        }
    }

    /// Transient flash overlay
    pub async fn flash(&self) {
        self.broadcast(HubMessage::Flash(FlashMessage {
            color: FLASH_COLOR.to_string(),
            duration_ms: FLASH_DURATION_MS,
        }))
        .await;
    }

    /// User-visible notification
    pub async fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.broadcast(HubMessage::Toast(ToastMessage {
            level,
            message: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub async fn session_state(&self, session: &str, state: SessionState, device_id: Option<String>) {
        self.broadcast(HubMessage::SessionState(SessionStateMessage {
            session: session.to_string(),
            state,
            device_id,
            timestamp: Utc::now().to_rfc3339(),
        }))
        .await;
    }

    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::Relaxed)
    }
}

impl Default for FeedbackHub {
    fn default() -> Self {
        Self::new()
    }
}
