use std::path::PathBuf;

use ride_core::RideError;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Session(#[from] RideError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No pickup location: pass --pickup or make sure the ride details include one")]
    MissingPickup,

    #[error("Transcript unreadable: {path}: {source}")]
    TranscriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transcript line {line} malformed: {details}")]
    TranscriptRecord { line: usize, details: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ride_protocol::ErrorInfo> for TrackerError {
    fn from(info: ride_protocol::ErrorInfo) -> Self {
        TrackerError::Session(RideError::from(info))
    }
}
