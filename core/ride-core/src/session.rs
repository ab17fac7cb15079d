//! Per-ride tracking session.
//!
//! Owns every piece of mutable state for one active ride: the connection
//! manager, the poll scheduler, the reconciler, the visibility source and the
//! observable outputs. The session is sans-IO: the runtime feeds it
//! `SessionEvent`s and executes the `SessionCommand`s it returns.
//!
//! Reaching a terminal phase tears both channels down; `dispose` does the
//! same on demand. Both are idempotent.

use ride_protocol::{parse_push_message, render_endpoint, RideDetails, StatusResponse};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::clock::{Clock, VisibilitySource};
use crate::config::{PullTarget, TrackingConfig};
use crate::connection::{ConnectionAction, ConnectionEvent, ConnectionManager, ConnectionState, ConnectionStatus};
use crate::error::{RideError, Result};
use crate::poll::PollScheduler;
use crate::reconciler::{AcceptOutcome, RideSession, StateReconciler};
use crate::samples;
use crate::signal::{Subscription, Watch};
use crate::types::{GeoPoint, LocationSample, Millis, PhaseChange, ProximityFlags, RidePhase, Sample};

#[derive(Debug, Clone, PartialEq)]
pub enum PullPayload {
    Status(StatusResponse),
    Details(RideDetails),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PushOpened,
    PushMessage { text: String },
    PushClosed { code: Option<u16> },
    PushError { reason: String },
    ReconnectTimerFired,
    PollTick,
    PollCompleted {
        request_id: u64,
        result: std::result::Result<PullPayload, String>,
    },
    VisibilityChanged { visible: bool },
    CancelRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    OpenPush { url: String },
    ClosePush { code: u16 },
    ScheduleReconnect { delay_ms: u64 },
    CancelReconnect,
    IssuePull {
        request_id: u64,
        target: PullTarget,
        url: String,
    },
    StopPolling,
}

/// What presentation layers read to decide on degraded-mode banners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackingHealth {
    pub connection: ConnectionStatus,
    /// No accepted sample within the staleness window.
    pub stale: bool,
    /// Push retries are spent and the data is stale: "live updates paused".
    pub live_updates_paused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub ride_id: String,
    pub phase: RidePhase,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub driver_location: Option<LocationSample>,
    pub proximity: ProximityFlags,
    pub connection: ConnectionState,
    pub health: TrackingHealth,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extras: Map<String, Value>,
}

pub struct TrackingSession {
    config: TrackingConfig,
    clock: Box<dyn Clock>,
    status_url: String,
    details_url: String,
    visibility: VisibilitySource,
    connection: ConnectionManager,
    scheduler: PollScheduler,
    reconciler: StateReconciler,
    phase_change: Watch<Option<PhaseChange>>,
    driver_location: Watch<Option<GeoPoint>>,
    health: Watch<TrackingHealth>,
    extras: Map<String, Value>,
    started_at: Option<Millis>,
    started: bool,
    torn_down: bool,
}

impl TrackingSession {
    pub fn new(
        ride_id: &str,
        pickup: GeoPoint,
        config: TrackingConfig,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        if !pickup.is_valid() {
            return Err(RideError::InvalidCoordinates {
                field: "pickup".to_string(),
                lat: pickup.lat,
                lng: pickup.lng,
            });
        }
        let push_url = render_endpoint(&config.endpoints.push_url, ride_id)?;
        let status_url = render_endpoint(&config.endpoints.status_url, ride_id)?;
        let details_url = render_endpoint(&config.endpoints.details_url, ride_id)?;

        let visibility = VisibilitySource::default();
        let connection = ConnectionManager::new(push_url, config.push.clone());
        let scheduler = PollScheduler::new(&config.poll, connection.connected(), visibility.reader());
        let reconciler = StateReconciler::new(
            RideSession::new(ride_id.trim(), pickup),
            config.proximity.thresholds(),
        );
        let health = TrackingHealth {
            connection: connection.status(),
            stale: false,
            live_updates_paused: false,
        };

        Ok(Self {
            config,
            clock,
            status_url,
            details_url,
            visibility,
            connection,
            scheduler,
            reconciler,
            phase_change: Watch::new(None),
            driver_location: Watch::new(None),
            health: Watch::new(health),
            extras: Map::new(),
            started_at: None,
            started: false,
            torn_down: false,
        })
    }

    pub fn ride_id(&self) -> &str {
        &self.reconciler.session().ride_id
    }

    pub fn ride(&self) -> &RideSession {
        self.reconciler.session()
    }

    pub fn phase(&self) -> RidePhase {
        self.reconciler.phase()
    }

    pub fn connection(&self) -> &ConnectionState {
        self.connection.state()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Time left until the next poll tick, or `None` while polling is stopped.
    pub fn next_poll_in_ms(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        self.scheduler
            .next_due()
            .map(|due| due.saturating_sub(now).max(0) as u64)
    }

    /// Phase observers, e.g. navigation to the payment screen on completion.
    pub fn subscribe_phase<F>(&self, mut listener: F) -> Subscription
    where
        F: FnMut(&PhaseChange) + 'static,
    {
        self.phase_change.subscribe(move |change| {
            if let Some(change) = change {
                listener(change);
            }
        })
    }

    /// Map consumers re-render on every driver position change.
    pub fn subscribe_driver_location<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&Option<GeoPoint>) + 'static,
    {
        self.driver_location.subscribe(listener)
    }

    pub fn subscribe_health<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&TrackingHealth) + 'static,
    {
        self.health.subscribe(listener)
    }

    pub fn subscribe_connected<F>(&self, listener: F) -> Subscription
    where
        F: FnMut(&bool) + 'static,
    {
        self.connection.subscribe_connected(listener)
    }

    /// Seeds state from the booking record before either channel produces
    /// data. Also records the dropoff point.
    pub fn hydrate(&mut self, details: &RideDetails) -> Vec<SessionCommand> {
        if self.torn_down {
            return Vec::new();
        }
        self.apply_dropoff(details);
        let sample = samples::from_details(details, self.clock.now_ms());
        let commands = self.ingest(sample, &details.extras);
        self.refresh_health();
        commands
    }

    /// Opens the push channel and arms the poll timer.
    pub fn start(&mut self) -> Vec<SessionCommand> {
        if self.torn_down || self.started {
            return Vec::new();
        }
        self.started = true;
        let now = self.clock.now_ms();
        self.started_at = Some(now);
        tracing::info!(ride_id = %self.ride_id(), "Tracking session started");

        let mut commands = map_actions(self.connection.connect());
        self.scheduler.start(now);
        commands.extend(self.scheduler.take_wake().map(|request| self.pull_command(request.id, request.target)));
        self.refresh_health();
        commands
    }

    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionCommand> {
        if self.torn_down {
            tracing::debug!(event = ?event, "Event after teardown ignored");
            return Vec::new();
        }
        let now = self.clock.now_ms();
        let commands = match event {
            SessionEvent::PushOpened => self.connection_event(ConnectionEvent::Opened),
            SessionEvent::PushClosed { code } => self.connection_event(ConnectionEvent::Closed { code }),
            SessionEvent::PushError { reason } => {
                self.connection_event(ConnectionEvent::Errored { reason })
            }
            SessionEvent::ReconnectTimerFired => {
                self.connection_event(ConnectionEvent::RetryTimerFired)
            }
            SessionEvent::PushMessage { text } => self.on_push_message(&text, now),
            SessionEvent::PollTick => match self.scheduler.on_tick(now) {
                Ok(request) => vec![self.pull_command(request.id, request.target)],
                Err(skip) => {
                    tracing::trace!(reason = ?skip, "Poll tick skipped");
                    Vec::new()
                }
            },
            SessionEvent::PollCompleted { request_id, result } => {
                self.on_poll_completed(request_id, result, now)
            }
            SessionEvent::VisibilityChanged { visible } => {
                self.visibility.set_visible(visible);
                self.scheduler
                    .take_wake()
                    .map(|request| vec![self.pull_command(request.id, request.target)])
                    .unwrap_or_default()
            }
            SessionEvent::CancelRequested => match self.reconciler.cancel() {
                Some(change) => self.on_phase_change(change),
                None => Vec::new(),
            },
        };
        self.refresh_health();
        commands
    }

    /// Caller-initiated teardown (view unmounted). Safe to call repeatedly.
    pub fn dispose(&mut self) -> Vec<SessionCommand> {
        self.teardown("disposed")
    }

    pub fn health(&self) -> TrackingHealth {
        let now = self.clock.now_ms();
        let terminal = self.reconciler.is_terminal();
        let reference = self.ride().last_accepted_at.or(self.started_at);
        let stale = !terminal
            && reference
                .map(|at| now.saturating_sub(at) > self.config.health.stale_after_ms as Millis)
                .unwrap_or(false);
        TrackingHealth {
            connection: self.connection.status(),
            stale,
            live_updates_paused: stale && self.connection.is_exhausted(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let ride = self.ride();
        SessionSnapshot {
            ride_id: ride.ride_id.clone(),
            phase: ride.phase,
            pickup: ride.pickup,
            dropoff: ride.dropoff,
            driver_location: ride.last_driver_location,
            proximity: ride.proximity,
            connection: self.connection.state().clone(),
            health: self.health(),
            extras: self.extras.clone(),
        }
    }

    fn connection_event(&mut self, event: ConnectionEvent) -> Vec<SessionCommand> {
        map_actions(self.connection.transition(event))
    }

    fn on_push_message(&mut self, text: &str, now: Millis) -> Vec<SessionCommand> {
        let message = match parse_push_message(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(code = %err.code, message = %err.message, "Dropping malformed push message");
                return Vec::new();
            }
        };
        if message.is_passthrough_only() {
            merge_extras(&mut self.extras, &message.extras);
            return Vec::new();
        }
        self.ingest(samples::from_push(&message, now), &message.extras)
    }

    fn on_poll_completed(
        &mut self,
        request_id: u64,
        result: std::result::Result<PullPayload, String>,
        now: Millis,
    ) -> Vec<SessionCommand> {
        if !self.scheduler.complete(request_id) {
            tracing::debug!(request_id, "Ignoring completion of superseded poll");
            return Vec::new();
        }
        match result {
            Ok(PullPayload::Status(status)) => {
                self.ingest(samples::from_status(&status, now), &Map::new())
            }
            Ok(PullPayload::Details(details)) => {
                self.apply_dropoff(&details);
                self.ingest(samples::from_details(&details, now), &details.extras)
            }
            Err(err) => {
                tracing::warn!(request_id, error = %err, "Poll failed");
                Vec::new()
            }
        }
    }

    fn apply_dropoff(&mut self, details: &RideDetails) {
        if let Some(dropoff) = details.dropoff {
            self.reconciler.set_dropoff(GeoPoint::from(dropoff));
        }
    }

    /// Extras travel with their sample: a sample the reconciler rejects as
    /// stale must not overwrite extras from a newer one.
    fn ingest(&mut self, sample: Sample, extras: &Map<String, Value>) -> Vec<SessionCommand> {
        if sample.is_empty() {
            merge_extras(&mut self.extras, extras);
            return Vec::new();
        }
        let outcome = self.reconciler.accept(sample);
        let AcceptOutcome::Accepted { phase_change } = outcome else {
            return Vec::new();
        };
        merge_extras(&mut self.extras, extras);
        self.driver_location.set(
            self.ride()
                .last_driver_location
                .map(|location| location.point),
        );
        match phase_change {
            Some(change) => self.on_phase_change(change),
            None => Vec::new(),
        }
    }

    fn on_phase_change(&mut self, change: PhaseChange) -> Vec<SessionCommand> {
        self.phase_change.set(Some(change));
        if change.to.is_terminal() {
            return self.teardown(change.to.as_str());
        }
        Vec::new()
    }

    fn teardown(&mut self, reason: &str) -> Vec<SessionCommand> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        let mut commands = map_actions(self.connection.disconnect());
        self.scheduler.stop();
        commands.push(SessionCommand::StopPolling);
        tracing::info!(ride_id = %self.ride_id(), reason, "Tracking session torn down");
        self.refresh_health();
        commands
    }

    fn pull_command(&self, request_id: u64, target: PullTarget) -> SessionCommand {
        let url = match target {
            PullTarget::Status => self.status_url.clone(),
            PullTarget::Details => self.details_url.clone(),
        };
        SessionCommand::IssuePull {
            request_id,
            target,
            url,
        }
    }

    fn refresh_health(&mut self) {
        let health = self.health();
        if self.health.set(health) && health.live_updates_paused {
            tracing::warn!(ride_id = %self.ride_id(), "Live updates paused");
        }
    }
}

fn map_actions(actions: Vec<ConnectionAction>) -> Vec<SessionCommand> {
    actions
        .into_iter()
        .map(|action| match action {
            ConnectionAction::Open { url } => SessionCommand::OpenPush { url },
            ConnectionAction::Close { code } => SessionCommand::ClosePush { code },
            ConnectionAction::ScheduleReconnect { delay_ms } => {
                SessionCommand::ScheduleReconnect { delay_ms }
            }
            ConnectionAction::CancelReconnect => SessionCommand::CancelReconnect,
        })
        .collect()
}

fn merge_extras(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        target.insert(key.clone(), value.clone());
    }
}
