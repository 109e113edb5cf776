//! Footfall detection from accelerometer samples.
//!
//! The first sample after a reset fixes the baseline. A step is a reading that
//! drops more than `threshold` below the baseline right after a reading that
//! sat above it. The baseline does not adapt for the rest of the session.

use tracing::debug;

use crate::AccelerationSample;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Baseline {
    initial: f64,
    previous: f64,
}

#[derive(Clone, Debug)]
pub struct StepDetector {
    threshold: f64,
    baseline: Option<Baseline>,
}

impl StepDetector {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            baseline: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Returns true when this sample completes a step.
    pub fn on_acceleration(&mut self, sample: &AccelerationSample) -> bool {
        let current = sample.magnitude();
        let Some(baseline) = self.baseline.as_mut() else {
            self.baseline = Some(Baseline {
                initial: current,
                previous: current,
            });
            debug!("acceleration baseline set to {:.4}", current);
            return false;
        };

        let step =
            baseline.previous > baseline.initial && baseline.initial - current > self.threshold;
        baseline.previous = current;
        if step {
            debug!(
                "step: magnitude {:.4} dropped below baseline {:.4}",
                current, baseline.initial
            );
        }
        step
    }

    pub fn reset(&mut self) {
        self.baseline = None;
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(0.2)
    }
}
