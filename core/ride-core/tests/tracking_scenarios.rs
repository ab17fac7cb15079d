//! End-to-end behaviour of a tracking session driven through its event API.

use ride_core::{
    Channel, ConnectionStatus, GeoPoint, ManualClock, PullPayload, RidePhase, SessionCommand,
    SessionEvent, TrackingConfig, TrackingSession,
};
use ride_protocol::{parse_ride_details, StatusResponse};
use std::cell::RefCell;
use std::rc::Rc;

const PICKUP: GeoPoint = GeoPoint {
    lat: 25.60,
    lng: 85.10,
};

fn session_at(clock: &ManualClock) -> TrackingSession {
    TrackingSession::new(
        "ride-42",
        PICKUP,
        TrackingConfig::default(),
        Box::new(clock.clone()),
    )
    .expect("session")
}

fn push(session: &mut TrackingSession, text: &str) -> Vec<SessionCommand> {
    session.handle(SessionEvent::PushMessage {
        text: text.to_string(),
    })
}

fn count_opens(commands: &[SessionCommand]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, SessionCommand::OpenPush { .. }))
        .count()
}

fn issued_pull(commands: &[SessionCommand]) -> Option<u64> {
    commands.iter().find_map(|command| match command {
        SessionCommand::IssuePull { request_id, .. } => Some(*request_id),
        _ => None,
    })
}

#[test]
fn test_driver_approach_reaches_arrived_at_first_sample_within_threshold() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);

    push(
        &mut session,
        r#"{"driver":{"lat":25.6010,"lng":85.1010},"timestamp":0}"#,
    );
    assert_eq!(session.phase(), RidePhase::EnroutePickup);
    assert!(session.ride().proximity.near);
    assert!(!session.ride().proximity.arrived);

    clock.set(5_000);
    push(
        &mut session,
        r#"{"driver":{"lat":25.6005,"lng":85.1005},"timestamp":5000}"#,
    );
    assert_eq!(session.phase(), RidePhase::ArrivedPickup);
    assert!(session.ride().proximity.arrived);

    clock.set(12_000);
    push(
        &mut session,
        r#"{"driver":{"lat":25.6000,"lng":85.1000},"timestamp":12000}"#,
    );
    assert_eq!(session.phase(), RidePhase::ArrivedPickup);
    assert_eq!(
        session.ride().last_driver_location.map(|sample| sample.point),
        Some(GeoPoint::new(25.6000, 85.1000))
    );
}

#[test]
fn test_stale_pull_after_completion_does_not_regress_phase() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);

    clock.set(1);
    let commands = push(&mut session, r#"{"status":"completed","fare":120}"#);
    assert_eq!(
        commands,
        vec![
            SessionCommand::ClosePush { code: 1000 },
            SessionCommand::StopPolling
        ]
    );
    assert!(session.is_torn_down());

    clock.set(2);
    assert!(session.handle(SessionEvent::PollTick).is_empty());
    let stale = parse_ride_details(br#"{"status":"ongoing"}"#).expect("details");
    let commands = session.handle(SessionEvent::PollCompleted {
        request_id: 1,
        result: Ok(PullPayload::Details(stale)),
    });
    assert!(commands.is_empty());
    assert_eq!(session.phase(), RidePhase::Completed);
    assert_eq!(
        session.snapshot().extras.get("fare"),
        Some(&serde_json::Value::from(120))
    );
}

#[test]
fn test_out_of_order_push_does_not_overwrite_extras() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);

    push(
        &mut session,
        r#"{"driver":{"lat":25.61,"lng":85.11},"timestamp":10,"fare":120}"#,
    );
    push(
        &mut session,
        r#"{"driver":{"lat":25.70,"lng":85.20},"timestamp":5,"fare":90}"#,
    );

    let snapshot = session.snapshot();
    assert_eq!(
        snapshot.driver_location.map(|sample| sample.point),
        Some(GeoPoint::new(25.61, 85.11))
    );
    assert_eq!(
        snapshot.extras.get("fare"),
        Some(&serde_json::Value::from(120))
    );

    push(&mut session, r#"{"eta_minutes":4}"#);
    assert_eq!(
        session.snapshot().extras.get("eta_minutes"),
        Some(&serde_json::Value::from(4))
    );
}

#[test]
fn test_four_abnormal_closures_exhaust_push_without_fifth_open() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    let mut opens = count_opens(&session.start());

    for attempt in 1..=4 {
        let commands = session.handle(SessionEvent::PushClosed { code: Some(1006) });
        if attempt < 4 {
            assert_eq!(
                commands,
                vec![SessionCommand::ScheduleReconnect { delay_ms: 3_000 }]
            );
            clock.advance(3_000);
            opens += count_opens(&session.handle(SessionEvent::ReconnectTimerFired));
        } else {
            assert!(commands.is_empty());
        }
    }

    assert_eq!(opens, 4);
    assert_eq!(session.connection().status, ConnectionStatus::Exhausted);
    assert!(session
        .handle(SessionEvent::ReconnectTimerFired)
        .is_empty());
}

#[test]
fn test_error_then_close_counts_as_one_failure() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    let first = session.handle(SessionEvent::PushError {
        reason: "connection reset".to_string(),
    });
    let second = session.handle(SessionEvent::PushClosed { code: Some(1006) });
    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(session.connection().retry_count, 1);
}

#[test]
fn test_connected_push_suppresses_every_poll_tick() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);

    for _ in 0..20 {
        clock.advance(8_000);
        assert!(session.handle(SessionEvent::PollTick).is_empty());
    }

    session.handle(SessionEvent::PushClosed { code: Some(1006) });
    clock.advance(8_000);
    assert!(issued_pull(&session.handle(SessionEvent::PollTick)).is_some());
}

#[test]
fn test_poll_ticks_do_not_overlap_while_request_in_flight() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();

    clock.advance(8_000);
    let first = issued_pull(&session.handle(SessionEvent::PollTick)).expect("first pull");
    clock.advance(8_000);
    assert!(session.handle(SessionEvent::PollTick).is_empty());

    session.handle(SessionEvent::PollCompleted {
        request_id: first,
        result: Ok(PullPayload::Status(StatusResponse::default())),
    });
    clock.advance(8_000);
    let second = issued_pull(&session.handle(SessionEvent::PollTick)).expect("second pull");
    assert_ne!(first, second);
}

#[test]
fn test_terminal_phase_stops_all_channel_activity() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);
    push(&mut session, r#"{"status":"cancelled"}"#);
    assert_eq!(session.phase(), RidePhase::Cancelled);

    clock.advance(60_000);
    for event in [
        SessionEvent::PollTick,
        SessionEvent::ReconnectTimerFired,
        SessionEvent::PushClosed { code: Some(1006) },
        SessionEvent::VisibilityChanged { visible: false },
        SessionEvent::VisibilityChanged { visible: true },
        SessionEvent::PushMessage {
            text: r#"{"status":"ongoing","timestamp":999999}"#.to_string(),
        },
    ] {
        assert!(session.handle(event).is_empty());
    }
    assert!(session.start().is_empty());
    assert_eq!(session.phase(), RidePhase::Cancelled);
    assert!(!session.health().stale);
}

#[test]
fn test_visible_again_fires_one_out_of_band_pull() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();

    session.handle(SessionEvent::VisibilityChanged { visible: false });
    clock.advance(8_000);
    assert!(session.handle(SessionEvent::PollTick).is_empty());

    clock.advance(1_000);
    let commands = session.handle(SessionEvent::VisibilityChanged { visible: true });
    assert!(issued_pull(&commands).is_some());
    assert!(session
        .handle(SessionEvent::VisibilityChanged { visible: true })
        .is_empty());
}

#[test]
fn test_live_updates_paused_only_when_exhausted_and_stale() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    let paused = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&paused);
    let _sub = session.subscribe_health(move |health| sink.borrow_mut().push(health.live_updates_paused));

    session.start();
    for _ in 0..4 {
        session.handle(SessionEvent::PushClosed { code: None });
        session.handle(SessionEvent::ReconnectTimerFired);
    }
    assert_eq!(session.connection().status, ConnectionStatus::Exhausted);
    assert!(!session.health().live_updates_paused);

    clock.set(31_000);
    let request = issued_pull(&session.handle(SessionEvent::PollTick)).expect("pull");
    assert!(session.health().live_updates_paused);
    assert_eq!(paused.borrow().last(), Some(&true));

    session.handle(SessionEvent::PollCompleted {
        request_id: request,
        result: Ok(PullPayload::Status(StatusResponse {
            near: true,
            arrived: false,
        })),
    });
    let health = session.health();
    assert!(!health.stale);
    assert!(!health.live_updates_paused);
    assert_eq!(health.connection, ConnectionStatus::Exhausted);
}

#[test]
fn test_pull_fallback_tracks_driver_when_push_is_down() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushClosed { code: Some(1011) });

    clock.set(8_000);
    let request = issued_pull(&session.handle(SessionEvent::PollTick)).expect("pull");
    let details = parse_ride_details(
        br#"{"status":"confirmed","driver":{"name":"Ravi","location":{"lat":25.6010,"lng":85.1010}},"dropoff":{"lat":25.65,"lng":85.15}}"#,
    )
    .expect("details");
    session.handle(SessionEvent::PollCompleted {
        request_id: request,
        result: Ok(PullPayload::Details(details)),
    });

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase, RidePhase::EnroutePickup);
    assert_eq!(snapshot.dropoff, Some(GeoPoint::new(25.65, 85.15)));
    let location = snapshot.driver_location.expect("driver location");
    assert_eq!(location.channel, Channel::Pull);
    assert_eq!(location.received_at, 8_000);
}

#[test]
fn test_snapshot_serializes_for_presentation() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    let json = serde_json::to_value(session.snapshot()).expect("serialize");
    assert_eq!(json["ride_id"], "ride-42");
    assert_eq!(json["phase"], "searching");
    assert_eq!(json["connection"]["status"], "connecting");
    assert!(json.get("extras").is_none());
}

#[test]
fn test_dispose_is_idempotent_and_closes_open_socket() {
    let clock = ManualClock::new(0);
    let mut session = session_at(&clock);
    session.start();
    session.handle(SessionEvent::PushOpened);
    assert_eq!(
        session.dispose(),
        vec![
            SessionCommand::ClosePush { code: 1000 },
            SessionCommand::StopPolling
        ]
    );
    assert!(session.dispose().is_empty());
    assert_eq!(session.phase(), RidePhase::Searching);
}
