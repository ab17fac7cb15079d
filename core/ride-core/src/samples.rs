//! Conversion from wire messages to reconciler samples.

use ride_protocol::{PushMessage, RideDetails, StatusResponse};

use crate::types::{Channel, GeoPoint, Millis, Sample};

pub fn from_push(message: &PushMessage, received_at: Millis) -> Sample {
    let mut sample = Sample::status(Channel::Push, received_at);
    sample.source_timestamp = message.timestamp;
    sample.location = message.driver.map(GeoPoint::from);
    sample.near = message.near;
    sample.arrived = message.arrived;
    sample.signal = message.signal();
    if message.status.is_some() && sample.signal.is_none() {
        tracing::warn!(status = ?message.status, "Unknown ride status on push channel");
    }
    sample
}

pub fn from_status(status: &StatusResponse, received_at: Millis) -> Sample {
    Sample::status(Channel::Pull, received_at).with_flags(Some(status.near), Some(status.arrived))
}

pub fn from_details(details: &RideDetails, received_at: Millis) -> Sample {
    let mut sample = Sample::status(Channel::Pull, received_at);
    sample.location = details.driver_location().map(GeoPoint::from);
    sample.near = details.near;
    sample.arrived = details.arrived;
    sample.signal = details.signal();
    sample.driver_assigned = details.has_driver();
    if details.status.is_some() && sample.signal.is_none() {
        tracing::warn!(status = ?details.status, "Unknown ride status in booking details");
    }
    sample
}
