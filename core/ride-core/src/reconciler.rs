//! Single writer of ride-session state.
//!
//! Samples from both channels go through `accept`. The merge rule is
//! channel-agnostic: a sample is ordered by its effective timestamp, and
//! anything older than the current sample is dropped. Equal timestamps favor
//! the push channel. Accepted samples update the driver location, recompute
//! proximity against the phase's target point, and drive the lifecycle.

use serde::Serialize;

use crate::lifecycle::{LifecycleInput, RideLifecycle};
use crate::proximity::ProximityThresholds;
use crate::types::{
    Channel, GeoPoint, LocationSample, Millis, PhaseChange, ProximityFlags, RidePhase, Sample,
    Stamp,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RideSession {
    pub ride_id: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub phase: RidePhase,
    pub last_driver_location: Option<LocationSample>,
    pub proximity: ProximityFlags,
    pub last_accepted: Option<Stamp>,
    /// Client receive time of the current sample; drives staleness.
    pub last_accepted_at: Option<Millis>,
}

impl RideSession {
    pub fn new(ride_id: impl Into<String>, pickup: GeoPoint) -> Self {
        Self {
            ride_id: ride_id.into(),
            pickup,
            dropoff: None,
            phase: RidePhase::Searching,
            last_driver_location: None,
            proximity: ProximityFlags::default(),
            last_accepted: None,
            last_accepted_at: None,
        }
    }

    /// Point the proximity flags are measured against in the current phase.
    pub fn target(&self) -> Option<GeoPoint> {
        if self.phase.targets_dropoff() {
            self.dropoff
        } else {
            Some(self.pickup)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    Terminal,
    Empty,
    InvalidCoordinates,
    OutOfOrder,
    SupersededByPush,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Accepted { phase_change: Option<PhaseChange> },
    Rejected(Rejection),
}

impl AcceptOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AcceptOutcome::Accepted { .. })
    }

    pub fn phase_change(&self) -> Option<PhaseChange> {
        match self {
            AcceptOutcome::Accepted { phase_change } => *phase_change,
            AcceptOutcome::Rejected(_) => None,
        }
    }
}

pub struct StateReconciler {
    session: RideSession,
    lifecycle: RideLifecycle,
    thresholds: ProximityThresholds,
    current: Option<Sample>,
}

impl StateReconciler {
    pub fn new(session: RideSession, thresholds: ProximityThresholds) -> Self {
        let lifecycle = RideLifecycle::new(session.phase);
        Self {
            session,
            lifecycle,
            thresholds,
            current: None,
        }
    }

    pub fn session(&self) -> &RideSession {
        &self.session
    }

    pub fn phase(&self) -> RidePhase {
        self.lifecycle.phase()
    }

    pub fn is_terminal(&self) -> bool {
        self.lifecycle.is_terminal()
    }

    /// Records the dropoff point once it is known (booking details).
    pub fn set_dropoff(&mut self, dropoff: GeoPoint) -> bool {
        if !dropoff.is_valid() || self.session.dropoff == Some(dropoff) {
            return false;
        }
        self.session.dropoff = Some(dropoff);
        self.refresh_proximity();
        true
    }

    pub fn accept(&mut self, sample: Sample) -> AcceptOutcome {
        if let Err(rejection) = self.check(&sample) {
            tracing::debug!(
                ride_id = %self.session.ride_id,
                channel = sample.channel.as_str(),
                effective_at = sample.effective_timestamp(),
                reason = ?rejection,
                "Sample rejected"
            );
            return AcceptOutcome::Rejected(rejection);
        }

        let from = self.lifecycle.phase();
        self.session.last_accepted = Some(sample.stamp());
        self.session.last_accepted_at = Some(sample.received_at);

        let mut inputs = Vec::with_capacity(3);
        if sample.driver_assigned {
            inputs.push(LifecycleInput::DriverAssigned);
        }
        if let Some(location) = sample.location_sample() {
            self.session.last_driver_location = Some(location);
            inputs.push(LifecycleInput::DriverLocated);
        }
        if let Some(signal) = sample.signal {
            inputs.push(LifecycleInput::Signal(signal));
        }
        self.lifecycle.apply(inputs);
        self.session.phase = self.lifecycle.phase();

        let mut flags = self.derived_proximity();
        if let Some(near) = sample.near {
            flags.near = near;
        }
        if let Some(arrived) = sample.arrived {
            flags.arrived = arrived;
        }
        self.session.proximity = flags;

        // Arrival only advances the pickup leg; at dropoff it is just a flag.
        if flags.arrived && !self.session.phase.targets_dropoff() {
            self.lifecycle.apply([LifecycleInput::ArrivedAtPickup]);
            self.session.phase = self.lifecycle.phase();
        }

        self.current = Some(sample);
        let to = self.lifecycle.phase();
        let phase_change = (to != from).then_some(PhaseChange { from, to });
        if let Some(change) = phase_change {
            tracing::info!(
                ride_id = %self.session.ride_id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                "Ride phase changed"
            );
        }
        AcceptOutcome::Accepted { phase_change }
    }

    /// Rider- or server-initiated cancellation outside the sample stream.
    pub fn cancel(&mut self) -> Option<PhaseChange> {
        let change = self.lifecycle.apply([LifecycleInput::CancelRequested]);
        self.session.phase = self.lifecycle.phase();
        change
    }

    fn check(&self, sample: &Sample) -> Result<(), Rejection> {
        if self.lifecycle.is_terminal() {
            return Err(Rejection::Terminal);
        }
        if sample.is_empty() {
            return Err(Rejection::Empty);
        }
        if sample.location.map(|point| !point.is_valid()).unwrap_or(false) {
            return Err(Rejection::InvalidCoordinates);
        }
        let Some(current) = self.session.last_accepted else {
            return Ok(());
        };
        let incoming = sample.stamp();
        if incoming.effective_at < current.effective_at {
            return Err(Rejection::OutOfOrder);
        }
        if incoming.effective_at == current.effective_at {
            if current.channel == Channel::Push && incoming.channel == Channel::Pull {
                return Err(Rejection::SupersededByPush);
            }
            if self
                .current
                .as_ref()
                .map(|current| same_content(current, sample))
                .unwrap_or(false)
            {
                return Err(Rejection::Duplicate);
            }
        }
        Ok(())
    }

    fn derived_proximity(&self) -> ProximityFlags {
        match (self.session.last_driver_location, self.session.target()) {
            (Some(driver), Some(target)) => self.thresholds.classify(&driver.point, &target),
            _ => ProximityFlags::default(),
        }
    }

    fn refresh_proximity(&mut self) {
        if self.session.last_driver_location.is_some() {
            self.session.proximity = self.derived_proximity();
        }
    }
}

fn same_content(left: &Sample, right: &Sample) -> bool {
    left.channel == right.channel
        && left.location == right.location
        && left.near == right.near
        && left.arrived == right.arrived
        && left.signal == right.signal
        && left.driver_assigned == right.driver_assigned
}
