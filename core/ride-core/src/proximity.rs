//! Distance and proximity helpers.

use geo::{Distance, Haversine, Point};

use crate::types::{GeoPoint, ProximityFlags};

pub const NEAR_THRESHOLD_M: f64 = 800.0;
pub const ARRIVED_THRESHOLD_M: f64 = 100.0;

/// Great-circle distance between two points in meters.
pub fn haversine_distance(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let origin = Point::new(from.lng, from.lat);
    let destination = Point::new(to.lng, to.lat);
    Haversine::distance(origin, destination)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityThresholds {
    pub near_m: f64,
    pub arrived_m: f64,
}

impl Default for ProximityThresholds {
    fn default() -> Self {
        Self {
            near_m: NEAR_THRESHOLD_M,
            arrived_m: ARRIVED_THRESHOLD_M,
        }
    }
}

impl ProximityThresholds {
    pub fn classify(&self, driver: &GeoPoint, target: &GeoPoint) -> ProximityFlags {
        let distance = haversine_distance(driver, target);
        ProximityFlags {
            near: distance <= self.near_m,
            arrived: distance <= self.arrived_m,
        }
    }
}
