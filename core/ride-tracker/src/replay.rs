//! Offline replay of a recorded channel transcript.
//!
//! A transcript is JSON Lines, one `{at, channel, body}` record per line with
//! `at` in client milliseconds. Records drive a session on a manual clock, so
//! a replay reproduces exactly what a live session would have decided.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use ride_core::{
    Clock, GeoPoint, ManualClock, Millis, PhaseChange, PullPayload, SessionCommand, SessionEvent,
    SessionSnapshot, TrackingConfig, TrackingSession,
};
use ride_protocol::{Coordinates, RideDetails, StatusResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptChannel {
    /// Push socket finished its handshake.
    Open,
    /// Push frame. `body` is the message object or its raw text.
    Push,
    /// Push socket closed. `body` is the close code, or null.
    Close,
    /// Details endpoint response.
    Pull,
    /// Status endpoint response.
    Status,
    /// Page visibility. `body` is a bool.
    Visibility,
    Cancel,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptRecord {
    pub at: Millis,
    pub channel: TranscriptChannel,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub records: usize,
    /// Pull responses the scheduler would not have requested at that moment.
    pub pulls_skipped: usize,
    pub phase_changes: Vec<PhaseChange>,
    pub snapshot: SessionSnapshot,
}

/// Reads a transcript, skipping blank lines and `#` comments. Each record is
/// paired with its 1-based line number.
pub fn read_transcript(path: &Path) -> Result<Vec<(usize, TranscriptRecord)>, TrackerError> {
    let contents = fs_err::read_to_string(path).map_err(|source| TrackerError::TranscriptRead {
        path: path.to_path_buf(),
        source,
    })?;
    let mut records = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record = serde_json::from_str(trimmed).map_err(|err| TrackerError::TranscriptRecord {
            line: index + 1,
            details: err.to_string(),
        })?;
        records.push((index + 1, record));
    }
    Ok(records)
}

pub fn replay_file(
    path: &Path,
    pickup: GeoPoint,
    dropoff: Option<GeoPoint>,
    config: TrackingConfig,
) -> Result<ReplayReport, TrackerError> {
    let records = read_transcript(path)?;
    let ride_id = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("replay");
    replay(ride_id, &records, pickup, dropoff, config)
}

pub fn replay(
    ride_id: &str,
    records: &[(usize, TranscriptRecord)],
    pickup: GeoPoint,
    dropoff: Option<GeoPoint>,
    config: TrackingConfig,
) -> Result<ReplayReport, TrackerError> {
    let start = records.first().map(|(_, record)| record.at).unwrap_or(0);
    let clock = ManualClock::new(start);
    let session = TrackingSession::new(ride_id, pickup, config, Box::new(clock.clone()))?;
    let mut replayer = Replayer {
        session,
        clock,
        reconnect_due: None,
        pulls_skipped: 0,
    };

    let phase_changes = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&phase_changes);
    let subscription = replayer
        .session
        .subscribe_phase(move |change| sink.borrow_mut().push(*change));

    if let Some(dropoff) = dropoff {
        let details = RideDetails {
            dropoff: Some(Coordinates {
                lat: dropoff.lat,
                lng: dropoff.lng,
            }),
            ..RideDetails::default()
        };
        let commands = replayer.session.hydrate(&details);
        replayer.absorb(commands);
    }
    let commands = replayer.session.start();
    let issued = replayer.absorb(commands);
    replayer.release(issued);

    let mut last_at = start;
    for (line, record) in records {
        if record.at < last_at {
            return Err(TrackerError::TranscriptRecord {
                line: *line,
                details: format!("time goes backwards ({} < {})", record.at, last_at),
            });
        }
        last_at = record.at;
        replayer.fire_reconnect_until(record.at);
        replayer.clock.set(record.at);
        replayer.apply(*line, record)?;
    }

    let pulls_skipped = replayer.pulls_skipped;
    let snapshot = replayer.session.snapshot();
    drop(subscription);
    let phase_changes = phase_changes.borrow().clone();
    Ok(ReplayReport {
        records: records.len(),
        pulls_skipped,
        phase_changes,
        snapshot,
    })
}

struct Replayer {
    session: TrackingSession,
    clock: ManualClock,
    reconnect_due: Option<Millis>,
    pulls_skipped: usize,
}

impl Replayer {
    fn apply(&mut self, line: usize, record: &TranscriptRecord) -> Result<(), TrackerError> {
        let event = match record.channel {
            TranscriptChannel::Open => SessionEvent::PushOpened,
            TranscriptChannel::Push => SessionEvent::PushMessage {
                text: match &record.body {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                },
            },
            TranscriptChannel::Close => SessionEvent::PushClosed {
                code: record
                    .body
                    .as_u64()
                    .and_then(|code| u16::try_from(code).ok()),
            },
            TranscriptChannel::Visibility => SessionEvent::VisibilityChanged {
                visible: record.body.as_bool().unwrap_or(true),
            },
            TranscriptChannel::Cancel => SessionEvent::CancelRequested,
            TranscriptChannel::Pull | TranscriptChannel::Status => {
                let payload = decode_pull(line, record)?;
                self.pull(payload);
                return Ok(());
            }
        };
        let commands = self.session.handle(event);
        let issued = self.absorb(commands);
        self.release(issued);
        Ok(())
    }

    /// A recorded response only lands if the scheduler would have asked.
    fn pull(&mut self, payload: PullPayload) {
        let commands = self.session.handle(SessionEvent::PollTick);
        match self.absorb(commands) {
            Some(request_id) => {
                let commands = self.session.handle(SessionEvent::PollCompleted {
                    request_id,
                    result: Ok(payload),
                });
                let issued = self.absorb(commands);
                self.release(issued);
            }
            None => {
                tracing::debug!(at = self.clock.now_ms(), "Recorded pull skipped by scheduler");
                self.pulls_skipped += 1;
            }
        }
    }

    fn fire_reconnect_until(&mut self, at: Millis) {
        while let Some(due) = self.reconnect_due.filter(|due| *due <= at) {
            self.reconnect_due = None;
            self.clock.set(due);
            let commands = self.session.handle(SessionEvent::ReconnectTimerFired);
            let issued = self.absorb(commands);
            self.release(issued);
        }
    }

    /// Tracks timers and returns the id of any pull the session issued.
    fn absorb(&mut self, commands: Vec<SessionCommand>) -> Option<u64> {
        let mut issued = None;
        for command in commands {
            match command {
                SessionCommand::ScheduleReconnect { delay_ms } => {
                    self.reconnect_due = Some(self.clock.now_ms().saturating_add(delay_ms as Millis));
                }
                SessionCommand::CancelReconnect => self.reconnect_due = None,
                SessionCommand::IssuePull { request_id, .. } => issued = Some(request_id),
                SessionCommand::OpenPush { .. }
                | SessionCommand::ClosePush { .. }
                | SessionCommand::StopPolling => {}
            }
        }
        issued
    }

    /// Completes a pull nothing in the transcript answers, as a failure.
    fn release(&mut self, issued: Option<u64>) {
        if let Some(request_id) = issued {
            let commands = self.session.handle(SessionEvent::PollCompleted {
                request_id,
                result: Err("no response recorded".to_string()),
            });
            self.absorb(commands);
        }
    }
}

fn decode_pull(line: usize, record: &TranscriptRecord) -> Result<PullPayload, TrackerError> {
    let decoded = match record.channel {
        TranscriptChannel::Status => {
            serde_json::from_value::<StatusResponse>(record.body.clone()).map(PullPayload::Status)
        }
        _ => serde_json::from_value::<RideDetails>(record.body.clone()).map(PullPayload::Details),
    };
    decoded.map_err(|err| TrackerError::TranscriptRecord {
        line,
        details: err.to_string(),
    })
}
