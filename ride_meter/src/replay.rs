//! Recorded sensor data as a sample source.
//!
//! GPX and FIT tracks supply position fixes; a `t,x,y,z` CSV log supplies
//! accelerometer samples. Both are merged into one time-ordered event stream
//! and pushed through a `SessionTracker` with a clock that follows the
//! recording rather than the wall.

use std::cell::Cell;
use std::io::Read;
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::session::{Clock, SampleSource, SessionTracker, StopOutcome};
use crate::store::{Preferences, SessionStore};
use crate::{AccelerationSample, PositionFix, SensorKind, TrackerError};

const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedAcceleration {
    pub timestamp: DateTime<Utc>,
    pub sample: AccelerationSample,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SensorEvent {
    Fix(PositionFix),
    Acceleration(TimedAcceleration),
}

impl SensorEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SensorEvent::Fix(fix) => fix.timestamp,
            SensorEvent::Acceleration(acc) => acc.timestamp,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Recording {
    pub fixes: Vec<PositionFix>,
    pub accelerations: Vec<TimedAcceleration>,
}

impl Recording {
    pub fn new(fixes: Vec<PositionFix>, accelerations: Vec<TimedAcceleration>) -> Self {
        Self {
            fixes,
            accelerations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty() && self.accelerations.is_empty()
    }

    /// Earliest timestamp across both streams.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let first_fix = self.fixes.iter().map(|f| f.timestamp).min();
        let first_acc = self.accelerations.iter().map(|a| a.timestamp).min();
        match (first_fix, first_acc) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Both streams merged by time; fixes come first on equal timestamps.
    pub fn events(&self) -> Vec<SensorEvent> {
        let mut events: Vec<SensorEvent> = self
            .fixes
            .iter()
            .cloned()
            .map(SensorEvent::Fix)
            .chain(
                self.accelerations
                    .iter()
                    .copied()
                    .map(SensorEvent::Acceleration),
            )
            .collect();
        events.sort_by_key(|e| e.timestamp());
        events
    }
}

/// Parse GPX or FIT fixes from bytes using the provided format hint (extension).
pub fn parse_track(input: &[u8], format: &str) -> Result<Vec<PositionFix>, TrackerError> {
    let format_lc = format.to_ascii_lowercase();
    if format_lc.ends_with(".fit") || format_lc == "fit" {
        parse_fit_fixes(input)
    } else if format_lc.ends_with(".gpx") || format_lc == "gpx" {
        parse_gpx_fixes(input)
    } else {
        Err(TrackerError::UnsupportedFormat(format.to_string()))
    }
}

fn parse_fit_fixes(input: &[u8]) -> Result<Vec<PositionFix>, TrackerError> {
    use fitparser::de::from_bytes;
    use fitparser::profile::MesgNum;
    let records = from_bytes(input).map_err(|e| TrackerError::FitParse(e.to_string()))?;
    let mut out = Vec::new();

    for record in records.into_iter() {
        if record.kind() != MesgNum::Record {
            continue;
        }
        let mut timestamp: Option<DateTime<Utc>> = None;
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;
        let mut alt: Option<f64> = None;
        for field in record.fields() {
            match field.name() {
                "timestamp" => {
                    if let fitparser::Value::Timestamp(ts) = field.value() {
                        timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => lat = semicircles(field.value()),
                "position_long" => lon = semicircles(field.value()),
                "altitude" | "enhanced_altitude" => {
                    if let Some(val) = fit_value_to_f64(field.value()) {
                        alt = Some(val);
                    }
                }
                _ => {}
            }
        }
        if let (Some(timestamp), Some(lat), Some(lon)) = (timestamp, lat, lon) {
            out.push(PositionFix::new(lat, lon, alt.unwrap_or(0.0), timestamp));
        }
    }

    debug!("FIT track: {} fixes", out.len());
    Ok(out)
}

fn semicircles(value: &fitparser::Value) -> Option<f64> {
    fit_value_to_f64(value).map(|v| v * SEMICIRCLES_TO_DEGREES)
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        _ => None,
    }
}

fn parse_gpx_fixes(input: &[u8]) -> Result<Vec<PositionFix>, TrackerError> {
    use gpx::read;
    use std::io::Cursor;

    let mut cursor = Cursor::new(input);
    let gpx = read(&mut cursor).map_err(|e| TrackerError::GpxParse(e.to_string()))?;
    let mut out = Vec::new();

    for track in gpx.tracks {
        for segment in track.segments {
            for point in segment.points {
                let Some(time) = point.time.as_ref() else {
                    continue;
                };
                let iso = time
                    .format()
                    .map_err(|e| TrackerError::GpxParse(e.to_string()))?;
                let utc = DateTime::parse_from_rfc3339(&iso)
                    .map_err(|e| TrackerError::GpxParse(e.to_string()))?
                    .with_timezone(&Utc);
                let point_geo = point.point();
                out.push(PositionFix::new(
                    point_geo.y(),
                    point_geo.x(),
                    point.elevation.unwrap_or(0.0),
                    utc,
                ));
            }
        }
    }
    debug!("GPX track: {} fixes", out.len());
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct AccelRow {
    t: f64,
    x: f64,
    y: f64,
    z: f64,
}

/// Read a `t,x,y,z` CSV log where `t` is seconds since `base`.
pub fn parse_accelerometer_csv<R: Read>(
    reader: R,
    base: DateTime<Utc>,
) -> Result<Vec<TimedAcceleration>, TrackerError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut out = Vec::new();
    for (line, row) in csv_reader.deserialize::<AccelRow>().enumerate() {
        let row = row.map_err(|e| TrackerError::AccelParse(e.to_string()))?;
        if !row.t.is_finite() || row.t < 0.0 {
            return Err(TrackerError::AccelParse(format!(
                "row {}: offset {} must be a non-negative number of seconds",
                line + 1,
                row.t
            )));
        }
        let millis = (row.t * 1000.0).round();
        let timestamp = if millis < i64::MAX as f64 {
            Duration::try_milliseconds(millis as i64)
                .and_then(|offset| base.checked_add_signed(offset))
        } else {
            None
        };
        let Some(timestamp) = timestamp else {
            return Err(TrackerError::AccelParse(format!(
                "row {}: offset out of range",
                line + 1
            )));
        };
        out.push(TimedAcceleration {
            timestamp,
            sample: AccelerationSample::new(row.x, row.y, row.z),
        });
    }
    debug!("accelerometer log: {} samples", out.len());
    Ok(out)
}

/// Sensors backed by a recording; a modality with no data cannot start.
#[derive(Clone, Debug, Default)]
pub struct ReplaySource {
    has_positions: bool,
    has_accelerations: bool,
    positioning_active: bool,
    accelerometer_active: bool,
}

impl ReplaySource {
    pub fn for_recording(recording: &Recording) -> Self {
        Self {
            has_positions: !recording.fixes.is_empty(),
            has_accelerations: !recording.accelerations.is_empty(),
            ..Self::default()
        }
    }

    pub fn is_active(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Positioning => self.positioning_active,
            SensorKind::Accelerometer => self.accelerometer_active,
        }
    }
}

impl SampleSource for ReplaySource {
    fn start(&mut self, kind: SensorKind) -> Result<(), TrackerError> {
        match kind {
            SensorKind::Positioning if self.has_positions => self.positioning_active = true,
            SensorKind::Accelerometer if self.has_accelerations => {
                self.accelerometer_active = true
            }
            _ => return Err(TrackerError::SensorUnavailable(kind)),
        }
        Ok(())
    }

    fn stop(&mut self, kind: SensorKind) -> Result<(), TrackerError> {
        match kind {
            SensorKind::Positioning => self.positioning_active = false,
            SensorKind::Accelerometer => self.accelerometer_active = false,
        }
        Ok(())
    }
}

/// Clock pinned to the timestamp of the event being replayed.
#[derive(Clone, Debug)]
pub struct ReplayClock(Rc<Cell<DateTime<Utc>>>);

impl ReplayClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(Rc::new(Cell::new(at)))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.0.set(at);
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> DateTime<Utc> {
        self.0.get()
    }
}

/// Run one full session over `recording`. `clock` must be the clock the
/// tracker was built with.
pub fn replay_session<S: SessionStore, P: Preferences>(
    tracker: &mut SessionTracker<S, P>,
    recording: &Recording,
    clock: &ReplayClock,
) -> Option<StopOutcome> {
    let mut source = ReplaySource::for_recording(recording);
    if let Some(start) = recording.start_time() {
        clock.set(start);
    }
    tracker.start(&mut source);

    let events = recording.events();
    let mut fixes = 0usize;
    let mut steps = 0usize;
    for event in &events {
        clock.set(event.timestamp());
        match event {
            SensorEvent::Fix(fix) => {
                if tracker.on_fix(fix).is_some() {
                    fixes += 1;
                }
            }
            SensorEvent::Acceleration(acc) => {
                if tracker.on_acceleration(&acc.sample) {
                    steps += 1;
                }
            }
        }
    }
    info!(
        "replayed {} events ({} fixes accepted, {} steps)",
        events.len(),
        fixes,
        steps
    );
    tracker.stop(&mut source)
}
