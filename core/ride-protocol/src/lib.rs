//! Wire types and validation for the ride-tracking channels.
//!
//! This crate is shared by the tracking core and the runtime binary so both
//! agree on what the push socket and the pull endpoints send. Parsing is
//! lenient about unknown fields (the server attaches payment/fare data that
//! the tracking core only passes through) but strict about shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// WebSocket close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Explicit phase signal carried in a `status` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSignal {
    Searching,
    Assigned,
    Enroute,
    Arrived,
    Started,
    Completed,
    Cancelled,
}

impl PhaseSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseSignal::Searching => "searching",
            PhaseSignal::Assigned => "assigned",
            PhaseSignal::Enroute => "enroute",
            PhaseSignal::Arrived => "arrived",
            PhaseSignal::Started => "started",
            PhaseSignal::Completed => "completed",
            PhaseSignal::Cancelled => "cancelled",
        }
    }

    /// Maps a server status string onto a phase signal.
    ///
    /// Matching ignores case and treats `-` and spaces as `_`. Returns `None`
    /// for strings outside the known vocabulary.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "searching" | "pending" | "requested" => Some(PhaseSignal::Searching),
            "assigned" | "accepted" | "confirmed" | "driver_assigned" => {
                Some(PhaseSignal::Assigned)
            }
            "arriving" | "enroute" | "en_route" | "on_the_way" => Some(PhaseSignal::Enroute),
            "arrived" | "driver_arrived" => Some(PhaseSignal::Arrived),
            "started" | "ongoing" | "in_progress" | "otp_verified" | "picked_up" => {
                Some(PhaseSignal::Started)
            }
            "completed" | "finished" | "ended" => Some(PhaseSignal::Completed),
            "cancelled" | "canceled" => Some(PhaseSignal::Cancelled),
            _ => None,
        }
    }
}

/// One inbound push-channel message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub driver: Option<Coordinates>,
    #[serde(default)]
    pub near: Option<bool>,
    #[serde(default)]
    pub arrived: Option<bool>,
    #[serde(default)]
    pub status: Option<String>,
    /// Source timestamp in epoch milliseconds, when the server provides one.
    #[serde(default, alias = "ts")]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl PushMessage {
    pub fn signal(&self) -> Option<PhaseSignal> {
        self.status.as_deref().and_then(PhaseSignal::parse)
    }

    /// True when the message carries nothing the tracking core consumes.
    pub fn is_passthrough_only(&self) -> bool {
        self.driver.is_none()
            && self.near.is_none()
            && self.arrived.is_none()
            && self.status.is_none()
    }
}

/// Response of the lightweight status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub near: bool,
    #[serde(default)]
    pub arrived: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub vehicle: Option<String>,
    #[serde(default, alias = "last_location", alias = "current_location")]
    pub location: Option<Coordinates>,
}

/// Full booking record returned by the details endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideDetails {
    #[serde(default, alias = "id", alias = "booking_id")]
    pub ride_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "pickup_location")]
    pub pickup: Option<Coordinates>,
    #[serde(default, alias = "dropoff_location", alias = "drop")]
    pub dropoff: Option<Coordinates>,
    #[serde(default)]
    pub driver: Option<DriverInfo>,
    #[serde(default)]
    pub near: Option<bool>,
    #[serde(default)]
    pub arrived: Option<bool>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl RideDetails {
    pub fn signal(&self) -> Option<PhaseSignal> {
        self.status.as_deref().and_then(PhaseSignal::parse)
    }

    pub fn driver_location(&self) -> Option<Coordinates> {
        self.driver.as_ref().and_then(|driver| driver.location)
    }

    /// A driver record on the booking counts as an assignment signal.
    pub fn has_driver(&self) -> bool {
        self.driver
            .as_ref()
            .map(|driver| driver.name.is_some() || driver.phone.is_some() || driver.location.is_some())
            .unwrap_or(false)
    }
}

pub fn parse_push_message(text: &str) -> Result<PushMessage, ErrorInfo> {
    if text.trim().is_empty() {
        return Err(ErrorInfo::new("empty_message", "push message is empty"));
    }
    if text.len() > MAX_MESSAGE_BYTES {
        return Err(ErrorInfo::new(
            "message_too_large",
            format!("push message exceeds {} bytes", MAX_MESSAGE_BYTES),
        ));
    }
    serde_json::from_str(text).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("push message is invalid JSON: {}", err),
        )
    })
}

pub fn parse_status_response(body: &[u8]) -> Result<StatusResponse, ErrorInfo> {
    serde_json::from_slice(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("status response is invalid JSON: {}", err),
        )
    })
}

pub fn parse_ride_details(body: &[u8]) -> Result<RideDetails, ErrorInfo> {
    serde_json::from_slice(body).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("ride details are invalid JSON: {}", err),
        )
    })
}

/// Substitutes the ride id into an endpoint template containing `{ride_id}`.
pub fn render_endpoint(template: &str, ride_id: &str) -> Result<String, ErrorInfo> {
    if !template.contains("{ride_id}") {
        return Err(ErrorInfo::new(
            "invalid_endpoint",
            format!("endpoint template is missing {{ride_id}}: {}", template),
        ));
    }
    if ride_id.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_ride_id", "ride_id is required"));
    }
    Ok(template.replace("{ride_id}", ride_id.trim()))
}
