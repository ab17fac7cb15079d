//! Pull-channel cadence.
//!
//! The scheduler decides *whether* a pull request may go out; the runtime
//! owns the actual timer and HTTP call. A tick only issues a request when
//! nothing is in flight, the page is visible, and the push channel is not
//! connected.

use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;

use crate::config::{PollConfig, PullTarget};
use crate::signal::{Subscription, WatchReader};
use crate::types::Millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub id: u64,
    pub target: PullTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollSkip {
    Stopped,
    InFlight,
    Hidden,
    PushConnected,
}

pub struct PollScheduler {
    interval_ms: u64,
    target: PullTarget,
    connected: WatchReader<bool>,
    visible: WatchReader<bool>,
    running: bool,
    next_due: Option<Millis>,
    next_id: u64,
    in_flight: Option<u64>,
    wake_pending: Rc<Cell<bool>>,
    _visibility: Subscription,
}

impl PollScheduler {
    pub fn new(
        config: &PollConfig,
        connected: WatchReader<bool>,
        visible: WatchReader<bool>,
    ) -> Self {
        let wake_pending = Rc::new(Cell::new(false));
        let flag = Rc::clone(&wake_pending);
        let visibility = visible.subscribe(move |visible| {
            if *visible {
                flag.set(true);
            }
        });
        Self {
            interval_ms: config.interval_ms,
            target: config.target,
            connected,
            visible,
            running: false,
            next_due: None,
            next_id: 1,
            in_flight: None,
            wake_pending,
            _visibility: visibility,
        }
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.next_due
    }

    pub fn start(&mut self, now: Millis) {
        if self.running {
            return;
        }
        self.running = true;
        self.next_due = Some(now.saturating_add(self.interval_ms as Millis));
        tracing::debug!(interval_ms = self.interval_ms, "Poll scheduler started");
    }

    /// Clears the interval and the in-flight guard. Completions for requests
    /// issued before the stop no longer match and are ignored.
    pub fn stop(&mut self) {
        if !self.running && self.in_flight.is_none() {
            return;
        }
        self.running = false;
        self.next_due = None;
        self.in_flight = None;
        self.wake_pending.set(false);
        tracing::debug!("Poll scheduler stopped");
    }

    /// Regular interval tick. Re-arms the timer whether or not a request
    /// goes out.
    pub fn on_tick(&mut self, now: Millis) -> Result<PollRequest, PollSkip> {
        if !self.running {
            return Err(PollSkip::Stopped);
        }
        self.next_due = Some(now.saturating_add(self.interval_ms as Millis));
        self.try_issue()
    }

    /// Fires the out-of-band tick owed after the page became visible again.
    pub fn take_wake(&mut self) -> Option<PollRequest> {
        if !self.wake_pending.replace(false) || !self.running {
            return None;
        }
        match self.try_issue() {
            Ok(request) => {
                tracing::debug!(request_id = request.id, "Out-of-band poll after visibility change");
                Some(request)
            }
            Err(_) => None,
        }
    }

    /// Marks a request finished. Returns false for unknown or superseded ids.
    pub fn complete(&mut self, request_id: u64) -> bool {
        if self.in_flight == Some(request_id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    fn try_issue(&mut self) -> Result<PollRequest, PollSkip> {
        if self.in_flight.is_some() {
            return Err(PollSkip::InFlight);
        }
        if !self.visible.get() {
            return Err(PollSkip::Hidden);
        }
        if self.connected.get() {
            return Err(PollSkip::PushConnected);
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.in_flight = Some(id);
        Ok(PollRequest {
            id,
            target: self.target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Watch;

    struct Fixture {
        connected: Watch<bool>,
        visible: Watch<bool>,
        scheduler: PollScheduler,
    }

    fn fixture() -> Fixture {
        let connected = Watch::new(false);
        let visible = Watch::new(true);
        let scheduler = PollScheduler::new(
            &PollConfig::default(),
            connected.reader(),
            visible.reader(),
        );
        Fixture {
            connected,
            visible,
            scheduler,
        }
    }

    #[test]
    fn tick_before_start_is_skipped() {
        let mut f = fixture();
        assert_eq!(f.scheduler.on_tick(0), Err(PollSkip::Stopped));
    }

    #[test]
    fn tick_issues_request_and_rearms() {
        let mut f = fixture();
        f.scheduler.start(0);
        assert_eq!(f.scheduler.next_due(), Some(8_000));
        let request = f.scheduler.on_tick(8_000).expect("request");
        assert_eq!(request.target, PullTarget::Details);
        assert_eq!(f.scheduler.next_due(), Some(16_000));
    }

    #[test]
    fn in_flight_request_debounces_ticks() {
        let mut f = fixture();
        f.scheduler.start(0);
        let first = f.scheduler.on_tick(8_000).expect("first");
        assert_eq!(f.scheduler.on_tick(16_000), Err(PollSkip::InFlight));
        assert_eq!(f.scheduler.on_tick(24_000), Err(PollSkip::InFlight));
        assert!(f.scheduler.complete(first.id));
        let second = f.scheduler.on_tick(32_000).expect("second");
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn connected_push_suppresses_every_tick() {
        let mut f = fixture();
        f.scheduler.start(0);
        f.connected.set(true);
        for tick in 1..=20 {
            assert_eq!(
                f.scheduler.on_tick(tick * 8_000),
                Err(PollSkip::PushConnected)
            );
        }
        f.connected.set(false);
        assert!(f.scheduler.on_tick(200_000).is_ok());
    }

    #[test]
    fn hidden_page_skips_and_visible_again_wakes_once() {
        let mut f = fixture();
        f.scheduler.start(0);
        f.visible.set(false);
        assert_eq!(f.scheduler.on_tick(8_000), Err(PollSkip::Hidden));
        assert!(f.scheduler.take_wake().is_none());

        f.visible.set(true);
        assert!(f.scheduler.take_wake().is_some());
        assert!(f.scheduler.take_wake().is_none());
    }

    #[test]
    fn stop_clears_in_flight_guard_and_ignores_late_completion() {
        let mut f = fixture();
        f.scheduler.start(0);
        let stale = f.scheduler.on_tick(8_000).expect("request");
        f.scheduler.stop();
        assert_eq!(f.scheduler.in_flight(), None);
        assert_eq!(f.scheduler.on_tick(16_000), Err(PollSkip::Stopped));

        f.scheduler.start(20_000);
        let fresh = f.scheduler.on_tick(28_000).expect("fresh request");
        assert!(!f.scheduler.complete(stale.id));
        assert_eq!(f.scheduler.in_flight(), Some(fresh.id));
        assert!(f.scheduler.complete(fresh.id));
    }
}
