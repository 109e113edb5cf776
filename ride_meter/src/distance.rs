// Great-circle distance accumulation over successive GPS fixes.

use tracing::debug;

use crate::{PositionFix, TrackerError};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DistanceDelta {
    /// First fix of a session; stored as the reference point only.
    Calibration,
    Increment(f64),
}

/// Haversine distance in meters between two points given in degrees.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.clamp(0.0, 1.0).sqrt().asin()
}

#[derive(Clone, Debug, Default)]
pub struct DistanceAccumulator {
    previous: Option<(f64, f64)>,
    total_m: f64,
}

impl DistanceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_m(&self) -> f64 {
        self.total_m
    }

    pub fn is_calibrated(&self) -> bool {
        self.previous.is_some()
    }

    /// Consume one fix. Invalid fixes are rejected without touching state.
    pub fn on_fix(&mut self, fix: &PositionFix) -> Result<DistanceDelta, TrackerError> {
        validate_coordinates(fix.latitude, fix.longitude)?;

        let Some((prev_lat, prev_lon)) = self.previous else {
            self.previous = Some((fix.latitude, fix.longitude));
            debug!(
                "reference fix: lat {:.6}, lon {:.6}",
                fix.latitude, fix.longitude
            );
            return Ok(DistanceDelta::Calibration);
        };

        let delta = haversine_distance(prev_lat, prev_lon, fix.latitude, fix.longitude);
        if !delta.is_finite() {
            return Err(TrackerError::TransientSample(format!(
                "non-finite distance between ({prev_lat}, {prev_lon}) and ({}, {})",
                fix.latitude, fix.longitude
            )));
        }

        self.total_m += delta;
        self.previous = Some((fix.latitude, fix.longitude));
        debug!(
            "fix lat {:.6}, lon {:.6}, accuracy {:?}: +{:.2} m, total {:.2} m",
            fix.latitude, fix.longitude, fix.horizontal_accuracy_m, delta, self.total_m
        );
        Ok(DistanceDelta::Increment(delta))
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.total_m = 0.0;
    }
}

fn validate_coordinates(lat: f64, lon: f64) -> Result<(), TrackerError> {
    if !lat.is_finite() || !lon.is_finite() {
        return Err(TrackerError::TransientSample(format!(
            "non-finite coordinates ({lat}, {lon})"
        )));
    }
    if lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(TrackerError::TransientSample(format!(
            "coordinates out of range ({lat}, {lon})"
        )));
    }
    Ok(())
}
