//! Maps reconciled ride signals to lifecycle phase transitions.
//! Phases only move forward; completed and cancelled are absorbing.

use ride_protocol::PhaseSignal;

use crate::types::{PhaseChange, RidePhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    /// A driver was assigned (explicit status or a driver record on the booking).
    DriverAssigned,
    /// A driver location sample was accepted.
    DriverLocated,
    /// Arrival at pickup, derived from distance or confirmed by the server.
    ArrivedAtPickup,
    /// Explicit phase signal from either channel.
    Signal(PhaseSignal),
    /// Rider-initiated cancellation.
    CancelRequested,
}

pub fn next_phase(current: RidePhase, input: LifecycleInput) -> Option<RidePhase> {
    let target = match input {
        LifecycleInput::DriverAssigned => RidePhase::Assigned,
        LifecycleInput::DriverLocated => RidePhase::EnroutePickup,
        LifecycleInput::ArrivedAtPickup => RidePhase::ArrivedPickup,
        LifecycleInput::Signal(signal) => phase_for_signal(signal),
        LifecycleInput::CancelRequested => RidePhase::Cancelled,
    };
    advance(current, target)
}

fn phase_for_signal(signal: PhaseSignal) -> RidePhase {
    match signal {
        PhaseSignal::Searching => RidePhase::Searching,
        PhaseSignal::Assigned => RidePhase::Assigned,
        PhaseSignal::Enroute => RidePhase::EnroutePickup,
        PhaseSignal::Arrived => RidePhase::ArrivedPickup,
        PhaseSignal::Started => RidePhase::InProgress,
        PhaseSignal::Completed => RidePhase::Completed,
        PhaseSignal::Cancelled => RidePhase::Cancelled,
    }
}

fn advance(current: RidePhase, target: RidePhase) -> Option<RidePhase> {
    if current.is_terminal() || target <= current {
        return None;
    }
    Some(target)
}

#[derive(Debug, Clone)]
pub struct RideLifecycle {
    phase: RidePhase,
}

impl Default for RideLifecycle {
    fn default() -> Self {
        Self::new(RidePhase::Searching)
    }
}

impl RideLifecycle {
    pub fn new(phase: RidePhase) -> Self {
        Self { phase }
    }

    pub fn phase(&self) -> RidePhase {
        self.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Applies inputs in order and reports the net change, if any.
    pub fn apply<I>(&mut self, inputs: I) -> Option<PhaseChange>
    where
        I: IntoIterator<Item = LifecycleInput>,
    {
        let from = self.phase;
        for input in inputs {
            if let Some(next) = next_phase(self.phase, input) {
                tracing::debug!(from = %self.phase.as_str(), to = %next.as_str(), input = ?input, "Ride phase advanced");
                self.phase = next;
            }
        }
        if self.phase == from {
            None
        } else {
            Some(PhaseChange {
                from,
                to: self.phase,
            })
        }
    }
}
