//! Error types for call signaling and media acquisition

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for controller operations
pub type CallResult<T> = Result<T, CallError>;

/// Classification of local media acquisition failures
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaErrorKind {
    DeviceNotFound,
    DeviceInUse,
    PermissionDenied,
    Unknown,
}

impl MediaErrorKind {
    /// Maps a platform error name (DOM-style or OS-style) onto a kind.
    pub fn classify(platform_error: &str) -> Self {
        let name = platform_error.to_ascii_lowercase();
        if name.contains("notfound")
            || name.contains("not found")
            || name.contains("devicesnotfound")
            || name.contains("overconstrained")
        {
            MediaErrorKind::DeviceNotFound
        } else if name.contains("notreadable")
            || name.contains("trackstart")
            || name.contains("in use")
            || name.contains("busy")
        {
            MediaErrorKind::DeviceInUse
        } else if name.contains("notallowed")
            || name.contains("permission")
            || name.contains("denied")
            || name.contains("security")
        {
            MediaErrorKind::PermissionDenied
        } else {
            MediaErrorKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaErrorKind::DeviceNotFound => "device_not_found",
            MediaErrorKind::DeviceInUse => "device_in_use",
            MediaErrorKind::PermissionDenied => "permission_denied",
            MediaErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local media could not be acquired
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("media error ({kind}): {detail}")]
pub struct MediaError {
    pub kind: MediaErrorKind,
    pub detail: String,
}

impl MediaError {
    pub fn new(kind: MediaErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Builds an error from a platform error name, classifying it on the way.
    pub fn from_platform(platform_error: &str, detail: impl Into<String>) -> Self {
        Self::new(MediaErrorKind::classify(platform_error), detail)
    }

    /// Text suitable for showing to the person placing or answering the call.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            MediaErrorKind::DeviceNotFound => {
                "No camera or microphone was found. Please connect a device and try again."
            }
            MediaErrorKind::DeviceInUse => {
                "Your camera or microphone is being used by another application."
            }
            MediaErrorKind::PermissionDenied => {
                "Camera and microphone access was denied. Please allow access in your settings."
            }
            MediaErrorKind::Unknown => "Could not start the call. Please try again.",
        }
    }
}

/// Failures reported by a signaling store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures handing a reminder to the notification component
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("reminder rejected: {0}")]
    Rejected(String),

    #[error("notification backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by the call controller and registry
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("signaling store error: {0}")]
    Store(#[from] StoreError),

    #[error("call was not answered within {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("a call is already active on this controller")]
    Busy,

    #[error("call not found: {call_id}")]
    NotFound { call_id: String },

    #[error("invalid call state: {message}")]
    InvalidState { message: String },

    #[error("call {call_id} is stale and can no longer be answered")]
    Expired { call_id: String },

    #[error("media pipeline error in {operation}: {details}")]
    Pipeline { operation: String, details: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl CallError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn pipeline(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Pipeline {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Message for the UI layer; only media failures carry specific wording.
    pub fn user_message(&self) -> &'static str {
        match self {
            CallError::Media(e) => e.user_message(),
            CallError::Timeout { .. } => "No answer.",
            CallError::Busy => "You are already in a call.",
            CallError::Expired { .. } => "This call is no longer available.",
            _ => "Something went wrong with the call. Please try again.",
        }
    }
}

/// Configuration loading and validation failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
