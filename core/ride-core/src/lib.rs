//! Ride Core - client-side synchronization for live ride tracking.
//!
//! Merges a push channel (WebSocket) and a pull channel (HTTP polling) into
//! one consistent view of a ride: where the driver is, how close they are to
//! the current target, and which lifecycle phase the ride is in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   SessionEvent    ┌─────────────────────────────────────┐
//! │   runtime    │ ────────────────▶ │          TrackingSession            │
//! │ (sockets,    │                   │  ConnectionManager   PollScheduler  │
//! │  HTTP,       │ ◀──────────────── │          StateReconciler            │
//! │  timers)     │   SessionCommand  │  (proximity + RideLifecycle)        │
//! └──────────────┘                   └─────────────────────────────────────┘
//! ```
//!
//! The core performs no I/O. A runtime owns the socket, the HTTP client and
//! the timers; it feeds everything that happens back in as events on a single
//! thread and executes the commands that come out.
//!
//! # Modules
//!
//! - [`connection`]: push-channel state machine with a bounded retry budget
//! - [`poll`]: pull-channel cadence, debounce and suppression
//! - [`reconciler`]: timestamp ordering and sample acceptance
//! - [`lifecycle`]: monotonic ride phase transitions
//! - [`proximity`]: haversine distance and near/arrived classification
//! - [`session`]: the per-ride composite the runtime talks to

pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod poll;
pub mod proximity;
pub mod reconciler;
pub mod samples;
pub mod session;
pub mod signal;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, VisibilitySource};
pub use config::{load_config, PullTarget, TrackingConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use error::{Result, RideError};
pub use lifecycle::{next_phase, LifecycleInput, RideLifecycle};
pub use poll::{PollRequest, PollScheduler, PollSkip};
pub use proximity::{haversine_distance, ProximityThresholds};
pub use reconciler::{AcceptOutcome, Rejection, RideSession, StateReconciler};
pub use session::{
    PullPayload, SessionCommand, SessionEvent, SessionSnapshot, TrackingHealth, TrackingSession,
};
pub use signal::{Subscription, Watch, WatchReader};
pub use types::{Channel, GeoPoint, LocationSample, Millis, PhaseChange, ProximityFlags, RidePhase, Sample};
