//! Tracking configuration loading.
//!
//! Every field has a default, so a missing file (or a partial one) yields a
//! working configuration. Values encode deliberate product trade-offs
//! (bounded reconnection storms vs. freshness); change them here, not inline.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{RideError, Result};
use crate::proximity::{ProximityThresholds, ARRIVED_THRESHOLD_M, NEAR_THRESHOLD_M};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".ride-tracker/config.toml";

pub const DEFAULT_PUSH_URL: &str = "ws://localhost:8000/ws/rides/{ride_id}";
pub const DEFAULT_STATUS_URL: &str = "http://localhost:8000/api/rides/{ride_id}/status";
pub const DEFAULT_DETAILS_URL: &str = "http://localhost:8000/api/rides/{ride_id}";

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_RETRY_BUDGET: u32 = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 8_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 6_000;
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_STALE_AFTER_MS: u64 = 30_000;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default = "default_push_url")]
    pub push_url: String,
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default = "default_details_url")]
    pub details_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            push_url: default_push_url(),
            status_url: default_status_url(),
            details_url: default_details_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PushConfig {
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

/// Which pull endpoint the scheduler hits on each tick.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PullTarget {
    #[default]
    Details,
    Status,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default)]
    pub target: PullTarget,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            target: PullTarget::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProximityConfig {
    #[serde(default = "default_near_threshold_m")]
    pub near_threshold_m: f64,
    #[serde(default = "default_arrived_threshold_m")]
    pub arrived_threshold_m: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            near_threshold_m: NEAR_THRESHOLD_M,
            arrived_threshold_m: ARRIVED_THRESHOLD_M,
        }
    }
}

impl ProximityConfig {
    pub fn thresholds(&self) -> ProximityThresholds {
        ProximityThresholds {
            near_m: self.near_threshold_m,
            arrived_m: self.arrived_threshold_m,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct HealthConfig {
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: DEFAULT_STALE_AFTER_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct TrackingConfig {
    #[serde(default)]
    pub endpoints: EndpointConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub proximity: ProximityConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

impl TrackingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll.interval_ms) {
            return Err(invalid(
                "poll.interval_ms",
                format!(
                    "must be between {} and {} ms, got {}",
                    MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, self.poll.interval_ms
                ),
            ));
        }
        if self.push.retry_budget == 0 {
            return Err(invalid("push.retry_budget", "must be at least 1"));
        }
        if self.push.reconnect_delay_ms == 0 {
            return Err(invalid("push.reconnect_delay_ms", "must be positive"));
        }
        let proximity = &self.proximity;
        if !(proximity.arrived_threshold_m > 0.0) {
            return Err(invalid("proximity.arrived_threshold_m", "must be positive"));
        }
        if !(proximity.near_threshold_m >= proximity.arrived_threshold_m) {
            return Err(invalid(
                "proximity.near_threshold_m",
                "must be at least arrived_threshold_m",
            ));
        }
        if self.health.stale_after_ms == 0 {
            return Err(invalid("health.stale_after_ms", "must be positive"));
        }
        for (field, template) in [
            ("endpoints.push_url", &self.endpoints.push_url),
            ("endpoints.status_url", &self.endpoints.status_url),
            ("endpoints.details_url", &self.endpoints.details_url),
        ] {
            if !template.contains("{ride_id}") {
                return Err(invalid(field, "must contain {ride_id}"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RideError {
    RideError::ConfigInvalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Returns the default configuration path (~/.ride-tracker/config.toml).
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(RideError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

/// Loads and validates the configuration.
///
/// An explicit path must exist. Without one, the default location is used
/// and a missing file there yields the defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<TrackingConfig> {
    let config_path = match path {
        Some(path) => path,
        None => {
            let default_path = default_config_path()?;
            if !default_path.exists() {
                tracing::debug!(path = %default_path.display(), "No tracking config; using defaults");
                return Ok(TrackingConfig::default());
            }
            default_path
        }
    };

    let config = parse_config_file(&config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<TrackingConfig> {
    let content = fs_err::read_to_string(path).map_err(|source| RideError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<TrackingConfig>(&content).map_err(|err| RideError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

fn default_push_url() -> String {
    DEFAULT_PUSH_URL.to_string()
}

fn default_status_url() -> String {
    DEFAULT_STATUS_URL.to_string()
}

fn default_details_url() -> String {
    DEFAULT_DETAILS_URL.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_retry_budget() -> u32 {
    DEFAULT_RETRY_BUDGET
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_near_threshold_m() -> f64 {
    NEAR_THRESHOLD_M
}

fn default_arrived_threshold_m() -> f64 {
    ARRIVED_THRESHOLD_M
}

fn default_stale_after_ms() -> u64 {
    DEFAULT_STALE_AFTER_MS
}
