// Fare and calorie estimates derived from accumulated distance.

use chrono::{DateTime, Utc};

use crate::FareSchedule;

impl FareSchedule {
    /// Truncates after the full arithmetic, so 1.5 km at the default rates is 12.
    pub fn fare_for(&self, total_distance_m: f64) -> u32 {
        if total_distance_m > self.free_distance_m {
            let extra_km = total_distance_m / 1000.0 - self.free_distance_m / 1000.0;
            (self.base_fare as f64 + extra_km * self.per_km as f64) as u32
        } else {
            0
        }
    }
}

pub fn compute_fare(total_distance_m: f64) -> u32 {
    FareSchedule::default().fare_for(total_distance_m)
}

/// Heuristic burn: cubic in kilometers plus a weight × time term.
pub fn compute_calories(total_distance_m: f64, elapsed_hours: f64, weight_kg: f64) -> f64 {
    let d = total_distance_m / 1000.0;
    0.0215 * d.powi(3) - 0.1765 * d.powi(2) + 0.8710 * d + 1.4577 * weight_kg * elapsed_hours
}

pub fn elapsed_hours(start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - start).num_milliseconds().max(0);
    millis as f64 / 3_600_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_fare_thresholds() {
        assert_eq!(compute_fare(0.0), 0);
        assert_eq!(compute_fare(1000.0), 0);
        assert_eq!(compute_fare(1500.0), 12);
        assert_eq!(compute_fare(2000.0), 15);
        assert_eq!(compute_fare(1000.1), 10);
    }

    #[test]
    fn test_custom_fare_schedule() {
        let schedule = FareSchedule {
            base_fare: 20,
            per_km: 8,
            free_distance_m: 2000.0,
        };
        assert_eq!(schedule.fare_for(2000.0), 0);
        assert_eq!(schedule.fare_for(3500.0), 32);
    }

    #[test]
    fn test_calories_at_rest_is_zero() {
        assert_eq!(compute_calories(0.0, 0.0, 70.0), 0.0);
    }

    #[test]
    fn test_calories_formula() {
        let kcal = compute_calories(2000.0, 0.5, 80.0);
        let expected = 0.0215 * 8.0 - 0.1765 * 4.0 + 0.8710 * 2.0 + 1.4577 * 80.0 * 0.5;
        assert!((kcal - expected).abs() < 1e-9);
    }

    #[test]
    fn test_calories_increase_with_time() {
        let mut last = f64::MIN;
        for minutes in 0..120 {
            let kcal = compute_calories(3500.0, minutes as f64 / 60.0, 65.0);
            assert!(kcal > last);
            last = kcal;
        }
    }

    #[test]
    fn test_elapsed_hours_clamps_negative() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert!((elapsed_hours(start, start + Duration::minutes(90)) - 1.5).abs() < 1e-12);
        assert_eq!(elapsed_hours(start, start - Duration::seconds(5)), 0.0);
    }
}
