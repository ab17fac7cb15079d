//! ride-tracker: live ride tracking over push and pull channels.
//!
//! ## Subcommands
//!
//! - `track`: follows one ride against the configured endpoints, printing a
//!   JSON snapshot line to stdout whenever the tracked state changes
//! - `replay`: feeds a recorded JSONL transcript through a session on a
//!   manual clock and prints the resulting report

mod error;
mod logging;
mod replay;
mod runtime;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ride_core::{load_config, GeoPoint, PullPayload, PullTarget, SystemClock, TrackingSession};
use ride_protocol::render_endpoint;

use crate::error::TrackerError;
use crate::runtime::Runtime;
use crate::transport::{HttpPullTransport, PullTransport, WsPushTransport};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "ride-tracker")]
#[command(about = "Live ride tracking over WebSocket push and HTTP polling")]
#[command(version)]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a ride until it completes or is cancelled
    Track {
        /// Ride (booking) identifier
        #[arg(value_name = "RIDE_ID")]
        ride_id: String,

        /// Config file (defaults to ~/.ride-tracker/config.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Pickup point, when the ride details do not carry one
        #[arg(long, value_name = "LAT,LNG", value_parser = parse_point)]
        pickup: Option<GeoPoint>,
    },

    /// Replay a recorded transcript of channel traffic
    Replay {
        /// JSONL transcript of {at, channel, body} records
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Pickup point
        #[arg(long, value_name = "LAT,LNG", value_parser = parse_point)]
        pickup: GeoPoint,

        /// Dropoff point
        #[arg(long, value_name = "LAT,LNG", value_parser = parse_point)]
        dropoff: Option<GeoPoint>,

        /// Config file (defaults to ~/.ride-tracker/config.toml)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = logging::init(cli.log_dir.as_deref());

    let result = match cli.command {
        Commands::Track {
            ride_id,
            config,
            pickup,
        } => track(&ride_id, config, pickup),
        Commands::Replay {
            file,
            pickup,
            dropoff,
            config,
        } => run_replay(&file, pickup, dropoff, config),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "ride-tracker failed");
        std::process::exit(1);
    }
}

fn track(
    ride_id: &str,
    config_path: Option<PathBuf>,
    pickup: Option<GeoPoint>,
) -> Result<(), TrackerError> {
    let config = load_config(config_path)?;
    let pull = HttpPullTransport::new(HTTP_TIMEOUT)?;

    let details_url = render_endpoint(&config.endpoints.details_url, ride_id)?;
    let details = match pull.fetch(&details_url, PullTarget::Details) {
        Ok(PullPayload::Details(details)) => Some(details),
        Ok(PullPayload::Status(_)) => None,
        Err(err) => {
            tracing::warn!(ride_id, error = %err, "Initial ride details unavailable");
            None
        }
    };

    let pickup = pickup
        .or_else(|| {
            details
                .as_ref()
                .and_then(|details| details.pickup)
                .map(GeoPoint::from)
        })
        .ok_or(TrackerError::MissingPickup)?;

    let session = TrackingSession::new(ride_id, pickup, config, Box::new(SystemClock))?;
    let mut runtime = Runtime::new(
        session,
        Box::new(WsPushTransport),
        Arc::new(pull),
        std::io::stdout().lock(),
    );
    if let Some(details) = details.as_ref() {
        runtime.hydrate(details);
    }
    let snapshot = runtime.run()?;
    tracing::info!(ride_id, phase = snapshot.phase.as_str(), "Ride finished");
    Ok(())
}

fn run_replay(
    file: &Path,
    pickup: GeoPoint,
    dropoff: Option<GeoPoint>,
    config_path: Option<PathBuf>,
) -> Result<(), TrackerError> {
    let config = load_config(config_path)?;
    let report = replay::replay_file(file, pickup, dropoff, config)?;
    let json = serde_json::to_string_pretty(&report).map_err(std::io::Error::from)?;
    println!("{}", json);
    Ok(())
}

fn parse_point(value: &str) -> Result<GeoPoint, String> {
    let (lat, lng) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LNG, got {:?}", value))?;
    let lat: f64 = lat
        .trim()
        .parse()
        .map_err(|err| format!("invalid latitude {:?}: {}", lat, err))?;
    let lng: f64 = lng
        .trim()
        .parse()
        .map_err(|err| format!("invalid longitude {:?}: {}", lng, err))?;
    let point = GeoPoint::new(lat, lng);
    if !point.is_valid() {
        return Err(format!("coordinates out of range: {}", value));
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_point_accepts_lat_lng_pairs() {
        assert_eq!(parse_point("25.6, 85.1"), Ok(GeoPoint::new(25.6, 85.1)));
    }

    #[test]
    fn parse_point_rejects_malformed_and_out_of_range() {
        assert!(parse_point("25.6").is_err());
        assert!(parse_point("north,85.1").is_err());
        assert!(parse_point("91.0,85.1").is_err());
    }

    #[test]
    fn cli_parses_replay_arguments() {
        let cli = Cli::try_parse_from([
            "ride-tracker",
            "replay",
            "ride.jsonl",
            "--pickup",
            "25.60,85.10",
            "--dropoff",
            "25.65,85.15",
        ])
        .unwrap();
        match cli.command {
            Commands::Replay {
                file,
                pickup,
                dropoff,
                config,
            } => {
                assert_eq!(file, PathBuf::from("ride.jsonl"));
                assert_eq!(pickup, GeoPoint::new(25.60, 85.10));
                assert_eq!(dropoff, Some(GeoPoint::new(25.65, 85.15)));
                assert!(config.is_none());
            }
            Commands::Track { .. } => panic!("expected replay"),
        }
    }
}
