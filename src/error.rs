//! Error handling for the scan station

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Zero video inputs, or camera permission denied (not distinguishable)
    #[error("No camera devices found")]
    NoDevicesFound,

    /// Every ranked device failed to bind within the retry budget
    #[error("Camera unavailable after {attempts} attempt(s): {reason}")]
    CameraUnavailable { attempts: usize, reason: String },

    /// Fewer than two devices to switch between
    #[error("Camera switch unavailable: {0}")]
    SwitchUnavailable(String),

    /// Single bind attempt failed
    #[error("Bind error: {0}")]
    Bind(String),

    /// Still capture failed
    #[error("Capture error: {0}")]
    Capture(String),

    /// Operation not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Product lookup error
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code used in user notifications
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoDevicesFound => "NO_DEVICES_FOUND",
            Error::CameraUnavailable { .. } => "CAMERA_UNAVAILABLE",
            Error::SwitchUnavailable(_) => "SWITCH_UNAVAILABLE",
            Error::Bind(_) => "BIND_ERROR",
            Error::Capture(_) => "CAPTURE_ERROR",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::Lookup(_) => "LOOKUP_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
