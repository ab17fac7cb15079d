//! Single-threaded event loop around a `TrackingSession`.
//!
//! Transport threads only send `RuntimeEvent`s; the loop owns the session and
//! the reconnect timer. The poll deadline comes from the session's scheduler.
//! Each step waits on whichever deadline is next.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ride_core::{PullTarget, SessionCommand, SessionEvent, SessionSnapshot, TrackingSession};
use ride_protocol::RideDetails;

use crate::transport::{PullTransport, PushLink, PushTransport, RuntimeEvent, TransportError};

pub struct Runtime<W: Write> {
    session: TrackingSession,
    push: Box<dyn PushTransport>,
    pull: Arc<dyn PullTransport>,
    events_tx: Sender<RuntimeEvent>,
    events_rx: Receiver<RuntimeEvent>,
    link: Option<(u64, Box<dyn PushLink>)>,
    next_socket: u64,
    reconnect_at: Option<Instant>,
    out: W,
    last_line: Option<String>,
}

impl<W: Write> Runtime<W> {
    pub fn new(
        session: TrackingSession,
        push: Box<dyn PushTransport>,
        pull: Arc<dyn PullTransport>,
        out: W,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            session,
            push,
            pull,
            events_tx,
            events_rx,
            link: None,
            next_socket: 0,
            reconnect_at: None,
            out,
            last_line: None,
        }
    }

    pub fn hydrate(&mut self, details: &RideDetails) {
        let commands = self.session.hydrate(details);
        self.execute(commands);
    }

    /// Runs until the ride reaches a terminal phase. Returns the final state.
    pub fn run(mut self) -> Result<SessionSnapshot, TransportError> {
        let commands = self.session.start();
        self.execute(commands);
        self.emit()?;

        while !self.session.is_torn_down() {
            self.step(None)?;
        }
        tracing::info!(
            ride_id = %self.session.ride_id(),
            phase = self.session.phase().as_str(),
            "Tracking finished"
        );
        Ok(self.session.snapshot())
    }

    /// Waits for the next event or timer (at most `max_wait`) and applies it.
    fn step(&mut self, max_wait: Option<Duration>) -> Result<(), TransportError> {
        let now = Instant::now();
        let next_poll = self
            .session
            .next_poll_in_ms()
            .map(|ms| now + Duration::from_millis(ms));
        let deadline = [self.reconnect_at, next_poll].into_iter().flatten().min();
        let wait = match (deadline.map(|at| at.saturating_duration_since(now)), max_wait) {
            (Some(until), Some(max)) => Some(until.min(max)),
            (until, max) => until.or(max),
        };

        let received = match wait {
            Some(wait) => match self.events_rx.recv_timeout(wait) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.events_rx.recv().ok(),
        };

        if let Some(event) = received {
            self.on_runtime_event(event);
        }
        // A busy socket must not starve the timers.
        self.fire_due_timers(Instant::now());
        self.emit()
    }

    fn on_runtime_event(&mut self, event: RuntimeEvent) {
        let commands = match event {
            RuntimeEvent::Push { socket, event } => {
                if self.link.as_ref().map(|(id, _)| *id) != Some(socket) {
                    tracing::debug!(socket, event = ?event, "Dropping event from retired socket");
                    return;
                }
                if matches!(
                    event,
                    SessionEvent::PushClosed { .. } | SessionEvent::PushError { .. }
                ) {
                    self.link = None;
                }
                self.session.handle(event)
            }
            RuntimeEvent::PullDone { request_id, result } => self
                .session
                .handle(SessionEvent::PollCompleted { request_id, result }),
        };
        self.execute(commands);
    }

    fn fire_due_timers(&mut self, now: Instant) {
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            let commands = self.session.handle(SessionEvent::ReconnectTimerFired);
            self.execute(commands);
        }
        if self.session.next_poll_in_ms() == Some(0) {
            let commands = self.session.handle(SessionEvent::PollTick);
            self.execute(commands);
        }
    }

    fn execute(&mut self, commands: Vec<SessionCommand>) {
        for command in commands {
            match command {
                SessionCommand::OpenPush { url } => {
                    self.next_socket += 1;
                    let socket = self.next_socket;
                    let link = self.push.open(socket, &url, self.events_tx.clone());
                    self.link = Some((socket, link));
                }
                SessionCommand::ClosePush { code } => {
                    if let Some((_, mut link)) = self.link.take() {
                        link.close(code);
                    }
                }
                SessionCommand::ScheduleReconnect { delay_ms } => {
                    self.reconnect_at = Some(Instant::now() + Duration::from_millis(delay_ms));
                }
                SessionCommand::CancelReconnect => self.reconnect_at = None,
                SessionCommand::IssuePull {
                    request_id,
                    target,
                    url,
                } => self.spawn_pull(request_id, target, url),
                SessionCommand::StopPolling => tracing::debug!("Polling stopped"),
            }
        }
    }

    fn spawn_pull(&self, request_id: u64, target: PullTarget, url: String) {
        let pull = Arc::clone(&self.pull);
        let events = self.events_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("pull-{}", request_id))
            .spawn(move || {
                let result = pull.fetch(&url, target).map_err(|err| err.to_string());
                let _ = events.send(RuntimeEvent::PullDone { request_id, result });
            });
        if let Err(err) = spawned {
            tracing::warn!(request_id, error = %err, "Failed to spawn pull worker");
            let _ = self.events_tx.send(RuntimeEvent::PullDone {
                request_id,
                result: Err(err.to_string()),
            });
        }
    }

    /// Prints the snapshot when anything visible changed.
    fn emit(&mut self) -> Result<(), TransportError> {
        let line = serde_json::to_string(&self.session.snapshot()).map_err(std::io::Error::from)?;
        if self.last_line.as_deref() == Some(line.as_str()) {
            return Ok(());
        }
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        self.last_line = Some(line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ride_core::{
        Clock, ConnectionStatus, GeoPoint, ManualClock, PullPayload, RidePhase, SystemClock,
        TrackingConfig,
    };
    use ride_protocol::parse_ride_details;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Each `open` replays the next script of events synchronously.
    #[derive(Clone, Default)]
    struct FakePush {
        scripts: Arc<Mutex<VecDeque<Vec<SessionEvent>>>>,
        opened: Arc<Mutex<Vec<String>>>,
        closed: Arc<Mutex<Vec<u16>>>,
    }

    struct FakeLink {
        closed: Arc<Mutex<Vec<u16>>>,
    }

    impl PushLink for FakeLink {
        fn close(&mut self, code: u16) {
            self.closed.lock().unwrap().push(code);
        }
    }

    impl PushTransport for FakePush {
        fn open(&mut self, socket: u64, url: &str, events: Sender<RuntimeEvent>) -> Box<dyn PushLink> {
            self.opened.lock().unwrap().push(url.to_string());
            let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            for event in script {
                events.send(RuntimeEvent::Push { socket, event }).unwrap();
            }
            Box::new(FakeLink {
                closed: Arc::clone(&self.closed),
            })
        }
    }

    #[derive(Default)]
    struct FakePull {
        responses: Mutex<VecDeque<Result<PullPayload, TransportError>>>,
        urls: Mutex<Vec<String>>,
    }

    impl PullTransport for FakePull {
        fn fetch(&self, url: &str, _target: PullTarget) -> Result<PullPayload, TransportError> {
            self.urls.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(TransportError::Status {
                    status: 503,
                    url: url.to_string(),
                }))
        }
    }

    fn session(config: TrackingConfig) -> TrackingSession {
        session_on(config, Box::new(SystemClock))
    }

    fn session_on(config: TrackingConfig, clock: Box<dyn Clock>) -> TrackingSession {
        TrackingSession::new("r-1", GeoPoint::new(25.60, 85.10), config, clock).unwrap()
    }

    fn details(json: &str) -> RideDetails {
        parse_ride_details(json.as_bytes()).unwrap()
    }

    fn push_message(text: &str) -> SessionEvent {
        SessionEvent::PushMessage {
            text: text.to_string(),
        }
    }

    #[test]
    fn runs_push_stream_to_completion_and_closes_socket() {
        let push = FakePush::default();
        push.scripts.lock().unwrap().push_back(vec![
            SessionEvent::PushOpened,
            push_message(r#"{"driver":{"lat":25.6010,"lng":85.1010}}"#),
            push_message(r#"{"status":"completed","fare":120}"#),
        ]);
        let mut out = Vec::new();
        let mut runtime = Runtime::new(
            session(TrackingConfig::default()),
            Box::new(push.clone()),
            Arc::new(FakePull::default()),
            &mut out,
        );
        runtime.hydrate(&details(r#"{"status":"confirmed","driver":{"name":"Ravi"}}"#));
        let snapshot = runtime.run().unwrap();

        assert_eq!(snapshot.phase, RidePhase::Completed);
        assert_eq!(*push.closed.lock().unwrap(), vec![1000]);
        assert_eq!(
            *push.opened.lock().unwrap(),
            vec!["ws://localhost:8000/ws/rides/r-1".to_string()]
        );

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(lines.len() >= 3);
        assert_eq!(lines[0]["phase"], "assigned");
        assert_eq!(lines.last().unwrap()["phase"], "completed");
        assert_eq!(lines.last().unwrap()["extras"]["fare"], 120);
    }

    #[test]
    fn falls_back_to_polling_after_push_exhausts() {
        let mut config = TrackingConfig::default();
        config.push.retry_budget = 1;
        let clock = ManualClock::new(0);
        let push = FakePush::default();
        push.scripts
            .lock()
            .unwrap()
            .push_back(vec![SessionEvent::PushClosed { code: Some(1006) }]);
        let pull = Arc::new(FakePull::default());
        pull.responses
            .lock()
            .unwrap()
            .push_back(Ok(PullPayload::Details(details(r#"{"status":"completed"}"#))));

        let mut runtime = Runtime::new(
            session_on(config, Box::new(clock.clone())),
            Box::new(push.clone()),
            pull.clone(),
            std::io::sink(),
        );
        let commands = runtime.session.start();
        runtime.execute(commands);
        runtime.step(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(
            runtime.session.connection().status,
            ConnectionStatus::Exhausted
        );
        assert!(runtime.reconnect_at.is_none());
        assert!(pull.urls.lock().unwrap().is_empty());

        clock.set(8_000);
        runtime.step(Some(Duration::from_secs(1))).unwrap();
        runtime.step(Some(Duration::from_secs(5))).unwrap();

        assert_eq!(runtime.session.phase(), RidePhase::Completed);
        assert!(runtime.session.is_torn_down());
        assert_eq!(runtime.session.next_poll_in_ms(), None);
        assert_eq!(
            *pull.urls.lock().unwrap(),
            vec!["http://localhost:8000/api/rides/r-1".to_string()]
        );
        assert_eq!(push.opened.lock().unwrap().len(), 1);
    }

    #[test]
    fn due_poll_fires_even_when_an_event_arrives_first() {
        let clock = ManualClock::new(0);
        let pull = Arc::new(FakePull::default());
        let mut runtime = Runtime::new(
            session_on(TrackingConfig::default(), Box::new(clock.clone())),
            Box::new(FakePush::default()),
            pull.clone(),
            std::io::sink(),
        );
        let commands = runtime.session.start();
        runtime.execute(commands);

        clock.set(8_000);
        runtime
            .events_tx
            .send(RuntimeEvent::PullDone {
                request_id: 99,
                result: Err("late".to_string()),
            })
            .unwrap();
        runtime.step(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(runtime.session.next_poll_in_ms(), Some(8_000));

        runtime.step(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(
            *pull.urls.lock().unwrap(),
            vec!["http://localhost:8000/api/rides/r-1".to_string()]
        );
    }

    #[test]
    fn events_from_retired_sockets_are_ignored() {
        let push = FakePush::default();
        push.scripts.lock().unwrap().push_back(vec![SessionEvent::PushOpened]);
        let mut runtime = Runtime::new(
            session(TrackingConfig::default()),
            Box::new(push),
            Arc::new(FakePull::default()),
            std::io::sink(),
        );
        let commands = runtime.session.start();
        runtime.execute(commands);
        runtime.on_runtime_event(RuntimeEvent::Push {
            socket: 99,
            event: push_message(r#"{"status":"completed"}"#),
        });
        assert_eq!(runtime.session.phase(), RidePhase::Searching);
    }
}
