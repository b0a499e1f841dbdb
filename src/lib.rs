//! Scan Station Library
//!
//! Camera barcode/QR scan sessions for an inventory front end
//!
//! ## Architecture
//!
//! 1. Camera - Device enumeration and ranking
//! 2. DeviceLeaseManager - One camera handle per session
//! 3. DecodeEngine - External decoder seam
//! 4. DetectionThrottle - Short/duplicate/stale detection filter
//! 5. ScanSession - Scan state machine (start/stop/switch, auto-stop)
//! 6. FeedbackHub - Flash overlay, toasts, session state to the UI
//! 7. SessionTrigger - Scanner visibility to session lifecycle
//! 8. ProductPhotoSession - Independent still capture
//! 9. LookupDispatcher - Product lookup and scan logging after acceptance
//! 10. InventoryClient - Inventory API adapter
//!
//! ## Design Principles
//!
//! - All session state lives in the session structs
//! - Label heuristics only in `camera::ranking`
//! - Release old, then acquire new

pub mod camera;
pub mod decode_engine;
pub mod detection_throttle;
pub mod device_lease;
pub mod error;
pub mod feedback_hub;
pub mod inventory_client;
pub mod lookup_dispatch;
pub mod photo_session;
pub mod scan_session;
pub mod session_trigger;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
