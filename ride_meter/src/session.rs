//! Session lifecycle: owns the running totals, drives the detectors, and
//! notifies observers.
//!
//! All entry points take `&mut self`; the host delivers sensor callbacks and
//! start/stop commands one at a time on a single thread.

use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::distance::{DistanceAccumulator, DistanceDelta};
use crate::metrics::{compute_calories, elapsed_hours};
use crate::steps::StepDetector;
use crate::store::{Preferences, SessionStore, UserProfile};
use crate::{
    AccelerationSample, HistoryRecord, Params, PositionFix, SensorKind, SessionState,
    TrackerError,
};

/// Device sensors as seen by the tracker. Samples themselves are pushed in by
/// the host through `SessionTracker::on_fix` and `SessionTracker::on_acceleration`.
pub trait SampleSource {
    fn start(&mut self, kind: SensorKind) -> Result<(), TrackerError>;
    fn stop(&mut self, kind: SensorKind) -> Result<(), TrackerError>;
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Display/persistence hooks. Every channel defaults to a no-op.
pub trait SessionObserver {
    fn on_distance_changed(&mut self, _meters: f64) {}
    fn on_steps_changed(&mut self, _steps: u64) {}
    fn on_fare_changed(&mut self, _fare_units: u32) {}
    fn on_calories_changed(&mut self, _calories: f64) {}
}

impl<T: SessionObserver> SessionObserver for Rc<RefCell<T>> {
    fn on_distance_changed(&mut self, meters: f64) {
        self.borrow_mut().on_distance_changed(meters);
    }

    fn on_steps_changed(&mut self, steps: u64) {
        self.borrow_mut().on_steps_changed(steps);
    }

    fn on_fare_changed(&mut self, fare_units: u32) {
        self.borrow_mut().on_fare_changed(fare_units);
    }

    fn on_calories_changed(&mut self, calories: f64) {
        self.borrow_mut().on_calories_changed(calories);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SensorStatus {
    pub positioning: bool,
    pub accelerometer: bool,
}

impl SensorStatus {
    pub fn any(&self) -> bool {
        self.positioning || self.accelerometer
    }

    fn is_active(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Positioning => self.positioning,
            SensorKind::Accelerometer => self.accelerometer,
        }
    }

    fn set(&mut self, kind: SensorKind, active: bool) {
        match kind {
            SensorKind::Positioning => self.positioning = active,
            SensorKind::Accelerometer => self.accelerometer = active,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub distance_m: f64,
    pub steps: u64,
    pub calories: f64,
    pub fare_units: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum Persisted {
    Saved(i64),
    /// No steps or no distance; nothing worth keeping.
    Skipped,
    Failed(TrackerError),
}

#[derive(Debug)]
pub struct StopOutcome {
    pub summary: SessionSummary,
    pub persisted: Persisted,
}

const SENSORS: [SensorKind; 2] = [SensorKind::Positioning, SensorKind::Accelerometer];

pub struct SessionTracker<S, P> {
    params: Params,
    store: S,
    prefs: P,
    clock: Box<dyn Clock>,
    observers: Vec<Box<dyn SessionObserver>>,
    distance: DistanceAccumulator,
    steps: StepDetector,
    sensors: SensorStatus,
    state: SessionState,
}

impl<S: SessionStore, P: Preferences> SessionTracker<S, P> {
    pub fn new(params: Params, store: S, prefs: P) -> Self {
        Self::with_clock(params, store, prefs, Box::new(SystemClock))
    }

    pub fn with_clock(params: Params, store: S, prefs: P, clock: Box<dyn Clock>) -> Self {
        let steps = StepDetector::new(params.step_threshold);
        Self {
            params,
            store,
            prefs,
            clock,
            observers: Vec::new(),
            distance: DistanceAccumulator::new(),
            steps,
            sensors: SensorStatus::default(),
            state: SessionState::default(),
        }
    }

    /// Observers are notified in registration order.
    pub fn add_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn preferences(&self) -> &P {
        &self.prefs
    }

    pub fn is_running(&self) -> bool {
        self.state.running
    }

    pub fn sensors(&self) -> SensorStatus {
        self.sensors
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::load(&self.prefs, self.params.default_weight_kg)
    }

    pub fn set_weight(&mut self, weight_kg: f64) -> Result<(), TrackerError> {
        UserProfile { weight_kg }.save(&mut self.prefs)
    }

    /// Begin (or re-arm) a session. Sensors that fail to start are reported in
    /// the returned status and their samples are ignored.
    pub fn start(&mut self, source: &mut dyn SampleSource) -> SensorStatus {
        let first_start = !self.state.running;
        self.sensors = arm_sensors(source);
        if !self.sensors.any() {
            warn!("no sensors available; session will not accumulate");
        }

        if !first_start {
            debug!("start while running: sensors re-armed");
            return self.sensors;
        }

        let now = self.clock.now();
        self.state.running = true;
        self.state.start_time = Some(now);
        self.distance.reset();
        self.steps.reset();
        info!(
            "session started at {} (gps: {}, accelerometer: {})",
            now, self.sensors.positioning, self.sensors.accelerometer
        );

        if self.state.step_count == 0 {
            let steps = self.state.step_count;
            let distance = self.state.total_distance_m;
            self.notify(|o| o.on_steps_changed(steps));
            self.notify(|o| o.on_distance_changed(distance));
            self.notify(|o| o.on_fare_changed(0));
        }
        self.sensors
    }

    /// End the session, persisting it if anything was recorded. Returns `None`
    /// when no session was running.
    pub fn stop(&mut self, source: &mut dyn SampleSource) -> Option<StopOutcome> {
        if !self.state.running {
            debug!("stop while idle ignored");
            return None;
        }

        for kind in SENSORS {
            if self.sensors.is_active(kind) {
                if let Err(err) = source.stop(kind) {
                    warn!("failed to stop {}: {}", kind, err);
                }
            }
        }
        self.sensors = SensorStatus::default();
        self.steps.reset();

        let ended_at = self.clock.now();
        let fare_units = self.params.fare.fare_for(self.state.total_distance_m);
        let summary = SessionSummary {
            distance_m: self.state.total_distance_m,
            steps: self.state.step_count,
            calories: self.state.calories,
            fare_units,
            started_at: self.state.start_time,
            ended_at,
        };

        let persisted = if summary.steps > 0 && summary.distance_m > 0.0 {
            match self.store.insert(
                summary.distance_m,
                summary.steps,
                summary.calories,
                summary.fare_units,
            ) {
                Ok(id) => {
                    info!(
                        "saved session {}: {:.1} m, {} steps, {:.2} Cal, fare {}",
                        id, summary.distance_m, summary.steps, summary.calories, fare_units
                    );
                    Persisted::Saved(id)
                }
                Err(err) => {
                    warn!("failed to save session: {}", err);
                    Persisted::Failed(err)
                }
            }
        } else {
            info!(
                "session not saved: {} steps, {:.1} m",
                summary.steps, summary.distance_m
            );
            Persisted::Skipped
        };

        self.distance.reset();
        self.state.total_distance_m = 0.0;
        self.state.step_count = 0;
        self.state.fare_units = 0;
        self.state.calories = 0.0;
        self.state.running = false;

        Some(StopOutcome { summary, persisted })
    }

    /// Feed one GPS fix. Returns the accepted delta, or `None` when the fix was
    /// ignored or dropped.
    pub fn on_fix(&mut self, fix: &PositionFix) -> Option<DistanceDelta> {
        if !self.state.running || !self.sensors.positioning {
            return None;
        }
        let delta = match self.distance.on_fix(fix) {
            Ok(delta) => delta,
            Err(err) => {
                debug!("{}", err);
                return None;
            }
        };
        if let DistanceDelta::Increment(_) = delta {
            self.state.total_distance_m = self.distance.total_m();
            self.state.fare_units = self.params.fare.fare_for(self.state.total_distance_m);
            self.state.calories = self.current_calories();

            let distance = self.state.total_distance_m;
            let fare = self.state.fare_units;
            let calories = self.state.calories;
            self.notify(|o| o.on_distance_changed(distance));
            self.notify(|o| o.on_fare_changed(fare));
            self.notify(|o| o.on_calories_changed(calories));
        }
        Some(delta)
    }

    /// Feed one accelerometer sample. Returns true when it completed a step.
    pub fn on_acceleration(&mut self, sample: &AccelerationSample) -> bool {
        if !self.state.running || !self.sensors.accelerometer {
            return false;
        }
        if !self.steps.on_acceleration(sample) {
            return false;
        }
        self.state.step_count += 1;
        let steps = self.state.step_count;
        self.notify(|o| o.on_steps_changed(steps));
        true
    }

    pub fn history(&self) -> Result<Vec<HistoryRecord>, TrackerError> {
        let records = self.store.get_all()?;
        debug!("history: {} records", records.len());
        for r in &records {
            debug!(
                "id: {}, date: {}, distance: {:.1}, steps: {}, calories: {:.2}, fare: {}",
                r.id, r.date, r.distance_m, r.steps, r.calories, r.fare_units
            );
        }
        Ok(records)
    }

    fn current_calories(&self) -> f64 {
        let hours = self
            .state
            .start_time
            .map(|start| elapsed_hours(start, self.clock.now()))
            .unwrap_or(0.0);
        let weight = self.profile().weight_kg;
        debug!("elapsed {:.4} h, weight {:.1} kg", hours, weight);
        compute_calories(self.state.total_distance_m, hours, weight)
    }

    fn notify(&mut self, mut f: impl FnMut(&mut dyn SessionObserver)) {
        for observer in self.observers.iter_mut() {
            f(observer.as_mut());
        }
    }
}

fn arm_sensors(source: &mut dyn SampleSource) -> SensorStatus {
    let mut status = SensorStatus::default();
    for kind in SENSORS {
        match source.start(kind) {
            Ok(()) => status.set(kind, true),
            Err(err) => warn!("{} disabled: {}", kind, err),
        }
    }
    status
}
