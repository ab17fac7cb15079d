//! Error types for ride-core operations.
//!
//! Channel failures never become errors: they are absorbed into session state
//! (connection status, staleness). These variants cover setup paths only.

use std::path::PathBuf;

/// All errors that can occur while setting up a tracking session.
#[derive(Debug, thiserror::Error)]
pub enum RideError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file unreadable: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration value invalid: {field}: {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ─────────────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid endpoint: {code}: {message}")]
    Endpoint { code: String, message: String },

    #[error("Invalid coordinates for {field}: ({lat}, {lng})")]
    InvalidCoordinates { field: String, lat: f64, lng: f64 },
}

impl From<ride_protocol::ErrorInfo> for RideError {
    fn from(info: ride_protocol::ErrorInfo) -> Self {
        RideError::Endpoint {
            code: info.code,
            message: info.message,
        }
    }
}

/// Convenience type alias for Results using RideError.
pub type Result<T> = std::result::Result<T, RideError>;
