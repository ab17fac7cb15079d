//! Value types shared across the tracking pipeline.

use ride_protocol::{Coordinates, PhaseSignal};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }
}

impl From<Coordinates> for GeoPoint {
    fn from(value: Coordinates) -> Self {
        Self::new(value.lat, value.lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Push,
    Pull,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Pull => "pull",
        }
    }
}

/// Ordering key of an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stamp {
    pub effective_at: Millis,
    pub channel: Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationSample {
    pub point: GeoPoint,
    pub source_timestamp: Option<Millis>,
    pub received_at: Millis,
    pub channel: Channel,
}

impl LocationSample {
    pub fn effective_timestamp(&self) -> Millis {
        self.source_timestamp.unwrap_or(self.received_at)
    }
}

/// One inbound update from either channel.
///
/// A sample with a `location` is a location sample; one without is a pure
/// status sample. Explicit `near`/`arrived` values win over distance-derived
/// proximity for the update they arrive in.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub channel: Channel,
    pub source_timestamp: Option<Millis>,
    pub received_at: Millis,
    pub location: Option<GeoPoint>,
    pub near: Option<bool>,
    pub arrived: Option<bool>,
    pub signal: Option<PhaseSignal>,
    pub driver_assigned: bool,
}

impl Sample {
    pub fn location(channel: Channel, point: GeoPoint, received_at: Millis) -> Self {
        Self {
            channel,
            source_timestamp: None,
            received_at,
            location: Some(point),
            near: None,
            arrived: None,
            signal: None,
            driver_assigned: false,
        }
    }

    pub fn status(channel: Channel, received_at: Millis) -> Self {
        Self {
            channel,
            source_timestamp: None,
            received_at,
            location: None,
            near: None,
            arrived: None,
            signal: None,
            driver_assigned: false,
        }
    }

    pub fn with_source_timestamp(mut self, timestamp: Millis) -> Self {
        self.source_timestamp = Some(timestamp);
        self
    }

    pub fn with_signal(mut self, signal: PhaseSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_flags(mut self, near: Option<bool>, arrived: Option<bool>) -> Self {
        self.near = near;
        self.arrived = arrived;
        self
    }

    /// Pull responses never carry a trustworthy source timestamp.
    pub fn effective_timestamp(&self) -> Millis {
        match self.channel {
            Channel::Push => self.source_timestamp.unwrap_or(self.received_at),
            Channel::Pull => self.received_at,
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            effective_at: self.effective_timestamp(),
            channel: self.channel,
        }
    }

    pub fn location_sample(&self) -> Option<LocationSample> {
        self.location.map(|point| LocationSample {
            point,
            source_timestamp: match self.channel {
                Channel::Push => self.source_timestamp,
                Channel::Pull => None,
            },
            received_at: self.received_at,
            channel: self.channel,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.near.is_none()
            && self.arrived.is_none()
            && self.signal.is_none()
            && !self.driver_assigned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProximityFlags {
    pub near: bool,
    pub arrived: bool,
}

/// Ride lifecycle phase. Non-terminal phases are ordered; `Cancelled` is
/// reachable from any of them and compares above all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RidePhase {
    Searching,
    Assigned,
    EnroutePickup,
    ArrivedPickup,
    InProgress,
    Completed,
    Cancelled,
}

impl RidePhase {
    fn rank(&self) -> u8 {
        match self {
            RidePhase::Searching => 0,
            RidePhase::Assigned => 1,
            RidePhase::EnroutePickup => 2,
            RidePhase::ArrivedPickup => 3,
            RidePhase::InProgress => 4,
            RidePhase::Completed => 5,
            RidePhase::Cancelled => 6,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RidePhase::Completed | RidePhase::Cancelled)
    }

    /// Pickup is the proximity target until the ride starts.
    pub fn targets_dropoff(&self) -> bool {
        matches!(self, RidePhase::InProgress | RidePhase::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RidePhase::Searching => "searching",
            RidePhase::Assigned => "assigned",
            RidePhase::EnroutePickup => "enroute_pickup",
            RidePhase::ArrivedPickup => "arrived_pickup",
            RidePhase::InProgress => "in_progress",
            RidePhase::Completed => "completed",
            RidePhase::Cancelled => "cancelled",
        }
    }
}

impl PartialOrd for RidePhase {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RidePhase {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseChange {
    pub from: RidePhase,
    pub to: RidePhase,
}
