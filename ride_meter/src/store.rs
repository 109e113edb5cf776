// Session history and preference storage.
//
// The tracker only sees the `SessionStore` and `Preferences` traits; the JSON
// file implementations back the CLI, the in-memory ones back tests and hosts
// that persist elsewhere.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{HistoryRecord, TrackerError};

pub const WEIGHT_KEY: &str = "weight";
pub const DEFAULT_WEIGHT_KG: f64 = 70.0;

pub trait SessionStore {
    fn insert(
        &mut self,
        distance_m: f64,
        steps: u64,
        calories: f64,
        fare_units: u32,
    ) -> Result<i64, TrackerError>;

    /// All records in insertion order.
    fn get_all(&self) -> Result<Vec<HistoryRecord>, TrackerError>;
}

pub trait Preferences {
    fn get_double(&self, key: &str) -> Option<f64>;
    fn set_double(&mut self, key: &str, value: f64) -> Result<(), TrackerError>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Vec<HistoryRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SessionStore for MemoryStore {
    fn insert(
        &mut self,
        distance_m: f64,
        steps: u64,
        calories: f64,
        fare_units: u32,
    ) -> Result<i64, TrackerError> {
        let record = new_record(&self.records, distance_m, steps, calories, fare_units);
        let id = record.id;
        self.records.push(record);
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<HistoryRecord>, TrackerError> {
        Ok(self.records.clone())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    records: Vec<HistoryRecord>,
}

/// History kept as a single JSON document, rewritten on every insert.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Vec<HistoryRecord>,
}

impl JsonFileStore {
    /// A missing file is an empty history.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read_to_string(&path) {
            Ok(text) => {
                let file: HistoryFile = serde_json::from_str(&text).map_err(|e| {
                    TrackerError::Persistence(format!("{}: {}", path.display(), e))
                })?;
                file.records
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(TrackerError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    err
                )))
            }
        };
        debug!("opened history {} ({} records)", path.display(), records.len());
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, records: &[HistoryRecord]) -> Result<(), TrackerError> {
        let doc = HistoryFile {
            records: records.to_vec(),
        };
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| TrackerError::Persistence(e.to_string()))?;
        fs::write(&self.path, text)
            .map_err(|e| TrackerError::Persistence(format!("{}: {}", self.path.display(), e)))
    }
}

impl SessionStore for JsonFileStore {
    fn insert(
        &mut self,
        distance_m: f64,
        steps: u64,
        calories: f64,
        fare_units: u32,
    ) -> Result<i64, TrackerError> {
        let record = new_record(&self.records, distance_m, steps, calories, fare_units);
        let id = record.id;
        let mut next = self.records.clone();
        next.push(record);
        // Memory only advances once the file write succeeded.
        self.flush(&next)?;
        self.records = next;
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<HistoryRecord>, TrackerError> {
        Ok(self.records.clone())
    }
}

fn new_record(
    existing: &[HistoryRecord],
    distance_m: f64,
    steps: u64,
    calories: f64,
    fare_units: u32,
) -> HistoryRecord {
    let id = existing.last().map(|r| r.id + 1).unwrap_or(1);
    HistoryRecord {
        id,
        date: Utc::now(),
        distance_m,
        steps,
        calories,
        fare_units,
    }
}

#[derive(Clone, Debug, Default)]
pub struct MemoryPreferences {
    values: HashMap<String, f64>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Preferences for MemoryPreferences {
    fn get_double(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    fn set_double(&mut self, key: &str, value: f64) -> Result<(), TrackerError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    values: BTreeMap<String, f64>,
}

impl JsonPreferences {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| TrackerError::Persistence(format!("{}: {}", path.display(), e)))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(TrackerError::Persistence(format!(
                    "{}: {}",
                    path.display(),
                    err
                )))
            }
        };
        Ok(Self { path, values })
    }
}

impl Preferences for JsonPreferences {
    fn get_double(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    fn set_double(&mut self, key: &str, value: f64) -> Result<(), TrackerError> {
        let mut next = self.values.clone();
        next.insert(key.to_string(), value);
        let text = serde_json::to_string_pretty(&next)
            .map_err(|e| TrackerError::Persistence(e.to_string()))?;
        fs::write(&self.path, text)
            .map_err(|e| TrackerError::Persistence(format!("{}: {}", self.path.display(), e)))?;
        self.values = next;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UserProfile {
    pub weight_kg: f64,
}

impl UserProfile {
    /// A stored weight that is not a positive number is treated as absent.
    pub fn load(prefs: &dyn Preferences, default_weight_kg: f64) -> Self {
        let weight_kg = prefs
            .get_double(WEIGHT_KEY)
            .filter(|w| w.is_finite() && *w > 0.0)
            .unwrap_or(default_weight_kg);
        Self { weight_kg }
    }

    pub fn save(&self, prefs: &mut dyn Preferences) -> Result<(), TrackerError> {
        prefs.set_double(WEIGHT_KEY, self.weight_kg)
    }
}

/// Parse a user-entered weight in kilograms.
pub fn parse_weight(text: &str) -> Result<f64, TrackerError> {
    let trimmed = text.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| TrackerError::InvalidWeight(format!("'{}' is not a number", trimmed)))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(TrackerError::InvalidWeight(format!(
            "{} must be a positive number of kilograms",
            trimmed
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_ids_follow_insertion() {
        let mut store = MemoryStore::new();
        assert_eq!(store.insert(1200.0, 1500, 90.5, 11).unwrap(), 1);
        assert_eq!(store.insert(300.0, 400, 20.0, 0).unwrap(), 2);
        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].steps, 1500);
        assert_eq!(all[1].id, 2);
    }

    #[test]
    fn test_json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.get_all().unwrap().is_empty());
        store.insert(2500.0, 3100, 150.0, 17).unwrap();
        store.insert(800.0, 900, 40.0, 0).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        let records = reopened.get_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fare_units, 17);
        assert_eq!(records[1].id, 2);
        assert!((records[1].distance_m - 800.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(TrackerError::Persistence(_))
        ));
    }

    #[test]
    fn test_json_store_write_failure_keeps_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("history.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(matches!(
            store.insert(100.0, 10, 1.0, 0),
            Err(TrackerError::Persistence(_))
        ));
        assert!(store.get_all().unwrap().is_empty());
    }

    #[test]
    fn test_profile_defaults_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let mut prefs = JsonPreferences::open(&path).unwrap();
        assert_eq!(UserProfile::load(&prefs, DEFAULT_WEIGHT_KG).weight_kg, 70.0);

        UserProfile { weight_kg: 82.5 }.save(&mut prefs).unwrap();
        let reopened = JsonPreferences::open(&path).unwrap();
        assert_eq!(UserProfile::load(&reopened, DEFAULT_WEIGHT_KG).weight_kg, 82.5);
    }

    #[test]
    fn test_profile_ignores_unusable_stored_weight() {
        let mut prefs = MemoryPreferences::new();
        prefs.set_double(WEIGHT_KEY, -5.0).unwrap();
        assert_eq!(UserProfile::load(&prefs, DEFAULT_WEIGHT_KG).weight_kg, 70.0);
        prefs.set_double(WEIGHT_KEY, f64::NAN).unwrap();
        assert_eq!(UserProfile::load(&prefs, DEFAULT_WEIGHT_KG).weight_kg, 70.0);
        prefs.set_double(WEIGHT_KEY, 0.0).unwrap();
        assert_eq!(UserProfile::load(&prefs, DEFAULT_WEIGHT_KG).weight_kg, 70.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        fs::write(&path, r#"{"weight": -5.0}"#).unwrap();
        let prefs = JsonPreferences::open(&path).unwrap();
        assert_eq!(UserProfile::load(&prefs, DEFAULT_WEIGHT_KG).weight_kg, 70.0);
    }

    #[test]
    fn test_parse_weight() {
        assert_eq!(parse_weight(" 64.5 ").unwrap(), 64.5);
        assert!(matches!(parse_weight("abc"), Err(TrackerError::InvalidWeight(_))));
        assert!(parse_weight("0").is_err());
        assert!(parse_weight("-3").is_err());
        assert!(parse_weight("inf").is_err());
    }
}
