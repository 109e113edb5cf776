//! Session tracking core for a ride/walk meter: GPS distance, step counting,
//! fare and calorie estimates, and session history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod display;
pub mod distance;
pub mod metrics;
pub mod replay;
pub mod session;
pub mod steps;
pub mod store;

pub use display::{format_calories, format_distance, format_fare, Readout, TextDisplay};
pub use distance::{haversine_distance, DistanceAccumulator, DistanceDelta};
pub use metrics::{compute_calories, compute_fare, elapsed_hours};
pub use replay::{
    parse_accelerometer_csv, parse_track, replay_session, Recording, ReplayClock, ReplaySource,
    SensorEvent, TimedAcceleration,
};
pub use session::{
    Clock, Persisted, SampleSource, SensorStatus, SessionObserver, SessionSummary,
    SessionTracker, StopOutcome, SystemClock,
};
pub use steps::StepDetector;
pub use store::{
    parse_weight, JsonFileStore, JsonPreferences, MemoryPreferences, MemoryStore, Preferences,
    SessionStore, UserProfile, DEFAULT_WEIGHT_KG, WEIGHT_KEY,
};

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(SensorKind),
    #[error("sample dropped: {0}")]
    TransientSample(String),
    #[error("session store failure: {0}")]
    Persistence(String),
    #[error("invalid weight: {0}")]
    InvalidWeight(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to parse FIT file: {0}")]
    FitParse(String),
    #[error("failed to parse GPX file: {0}")]
    GpxParse(String),
    #[error("failed to parse accelerometer log: {0}")]
    AccelParse(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Positioning,
    Accelerometer,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Positioning => f.write_str("positioning"),
            SensorKind::Accelerometer => f.write_str("accelerometer"),
        }
    }
}

/// Flat base fare plus a per-kilometer rate once the free distance is exceeded.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FareSchedule {
    pub base_fare: u32,
    pub per_km: u32,
    pub free_distance_m: f64,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: 10,
            per_km: 5,
            free_distance_m: 1000.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub step_threshold: f64,
    pub fare: FareSchedule,
    pub default_weight_kg: f64,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            step_threshold: 0.2,
            fare: FareSchedule::default(),
            default_weight_kg: DEFAULT_WEIGHT_KG,
        }
    }
}

impl Params {
    /// Reject values that would make the running totals negative or meaningless.
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !self.step_threshold.is_finite() || self.step_threshold < 0.0 {
            return Err(TrackerError::InvalidParameter(format!(
                "step_threshold must be a non-negative number, got {}",
                self.step_threshold
            )));
        }
        if !self.default_weight_kg.is_finite() || self.default_weight_kg <= 0.0 {
            return Err(TrackerError::InvalidParameter(format!(
                "default_weight_kg must be a positive number, got {}",
                self.default_weight_kg
            )));
        }
        if !self.fare.free_distance_m.is_finite() || self.fare.free_distance_m < 0.0 {
            return Err(TrackerError::InvalidParameter(format!(
                "fare.free_distance_m must be a non-negative number, got {}",
                self.fare.free_distance_m
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Reported by the positioning provider; logged, never used for filtering.
    pub horizontal_accuracy_m: Option<f64>,
}

impl PositionFix {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            timestamp,
            horizontal_accuracy_m: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Mean absolute value across the three axes (not the vector norm).
    pub fn magnitude(&self) -> f64 {
        (self.x.abs() + self.y.abs() + self.z.abs()) / 3.0
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub total_distance_m: f64,
    pub step_count: u64,
    pub fare_units: u32,
    pub calories: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub distance_m: f64,
    pub steps: u64,
    pub calories: f64,
    pub fare_units: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude_is_mean_absolute() {
        let sample = AccelerationSample::new(-3.0, 6.0, -9.0);
        assert!((sample.magnitude() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_params_json_overlay_keeps_defaults() {
        let params: Params = serde_json::from_str(r#"{"step_threshold": 0.35}"#).unwrap();
        assert!((params.step_threshold - 0.35).abs() < 1e-12);
        assert_eq!(params.fare, FareSchedule::default());
        assert!((params.default_weight_kg - 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_params_validate_rejects_bad_values() {
        assert!(Params::default().validate().is_ok());

        let params: Params = serde_json::from_str(r#"{"default_weight_kg": -70}"#).unwrap();
        assert!(matches!(
            params.validate(),
            Err(TrackerError::InvalidParameter(_))
        ));

        let params: Params =
            serde_json::from_str(r#"{"fare": {"free_distance_m": -500.0}}"#).unwrap();
        assert!(matches!(
            params.validate(),
            Err(TrackerError::InvalidParameter(_))
        ));

        let params = Params {
            step_threshold: f64::NAN,
            ..Params::default()
        };
        assert!(params.validate().is_err());
    }
}
