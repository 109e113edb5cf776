use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use ride_meter::{
    format_calories, format_distance, format_fare, parse_accelerometer_csv, parse_track,
    parse_weight, replay_session, HistoryRecord, JsonFileStore, JsonPreferences, MemoryPreferences,
    Params, Persisted, Preferences, Recording, ReplayClock, SessionObserver, SessionTracker,
    StopOutcome, TextDisplay, UserProfile,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_STORE: &str = "ride_meter_history.json";
const DEFAULT_PREFS: &str = "ride_meter_prefs.json";

#[derive(Parser, Debug)]
#[command(author, version, about = "Ride meter session replay and history CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded GPS track and/or accelerometer log as one session
    Replay(ReplayArgs),
    /// List saved sessions as CSV
    History(HistoryArgs),
    /// Show or set the weight used for calorie estimates
    Weight(WeightArgs),
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    /// GPX or FIT track supplying position fixes
    #[arg(value_hint = ValueHint::FilePath)]
    track: Option<PathBuf>,

    /// Accelerometer CSV (`t,x,y,z`, t in seconds from the start of the track)
    #[arg(long, value_hint = ValueHint::FilePath)]
    accel: Option<PathBuf>,

    /// Session history file
    #[arg(long, default_value = DEFAULT_STORE, value_hint = ValueHint::FilePath)]
    store: PathBuf,

    /// Preferences file
    #[arg(long, default_value = DEFAULT_PREFS, value_hint = ValueHint::FilePath)]
    prefs: PathBuf,

    /// Optional tracker parameters JSON (step_threshold, fare, default_weight_kg)
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,

    /// Override the step detection drop threshold
    #[arg(long)]
    step_threshold: Option<f64>,

    /// Print the session summary as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct HistoryArgs {
    /// Session history file
    #[arg(long, default_value = DEFAULT_STORE, value_hint = ValueHint::FilePath)]
    store: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct WeightArgs {
    /// New weight in kilograms; omit to print the current value
    value: Option<String>,

    /// Preferences file
    #[arg(long, default_value = DEFAULT_PREFS, value_hint = ValueHint::FilePath)]
    prefs: PathBuf,
}

/// Mirrors every readout change into the debug log.
struct LiveLog;

impl SessionObserver for LiveLog {
    fn on_distance_changed(&mut self, meters: f64) {
        debug!("distance {}", format_distance(meters));
    }

    fn on_steps_changed(&mut self, steps: u64) {
        debug!("steps {}", steps);
    }

    fn on_fare_changed(&mut self, fare_units: u32) {
        debug!("fare {}", format_fare(fare_units));
    }

    fn on_calories_changed(&mut self, calories: f64) {
        debug!("calories {}", format_calories(calories));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Replay(args) => args.verbose,
        Command::History(args) => args.verbose,
        Command::Weight(_) => false,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Replay(args) => handle_replay(args),
        Command::History(args) => handle_history(args),
        Command::Weight(args) => handle_weight(args),
    }
}

fn handle_replay(args: ReplayArgs) -> Result<()> {
    if args.track.is_none() && args.accel.is_none() {
        return Err(anyhow!("nothing to replay: pass a track and/or --accel"));
    }

    let mut params = match args.params.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(threshold) = args.step_threshold {
        params.step_threshold = threshold;
        params.validate().context("invalid --step-threshold")?;
    }

    let fixes = match args.track.as_ref() {
        Some(path) => load_track(path)?,
        None => Vec::new(),
    };
    let base = fixes.first().map(|f| f.timestamp).unwrap_or_else(Utc::now);
    let accelerations = match args.accel.as_ref() {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            parse_accelerometer_csv(file, base)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => Vec::new(),
    };
    let recording = Recording::new(fixes, accelerations);
    if recording.is_empty() {
        warn!("recording has no samples; the session will be empty");
    }
    info!(
        "Loaded {} fixes and {} accelerometer samples",
        recording.fixes.len(),
        recording.accelerations.len()
    );

    let store = JsonFileStore::open(&args.store)
        .with_context(|| format!("failed to open history {}", args.store.display()))?;
    let prefs = JsonPreferences::open(&args.prefs)
        .with_context(|| format!("failed to open preferences {}", args.prefs.display()))?;

    let clock = ReplayClock::new(base);
    let mut tracker = SessionTracker::with_clock(params, store, prefs, Box::new(clock.clone()));
    let display = Rc::new(RefCell::new(TextDisplay::new()));
    tracker.add_observer(Box::new(display.clone()));
    tracker.add_observer(Box::new(LiveLog));
    info!("Weight: {:.1} kg", tracker.profile().weight_kg);

    let outcome = replay_session(&mut tracker, &recording, &clock)
        .ok_or_else(|| anyhow!("session did not start"))?;

    let readout = display.borrow().readout().clone();
    info!(
        "Final readout: {} | {} steps | {} | {}",
        readout.distance, readout.steps, readout.fare, readout.calories
    );
    print_summary(&outcome, args.json)
}

fn print_summary(outcome: &StopOutcome, json: bool) -> Result<()> {
    let summary = &outcome.summary;
    let status = match &outcome.persisted {
        Persisted::Saved(id) => format!("saved as #{}", id),
        Persisted::Skipped => "not saved (no steps or no distance)".to_string(),
        Persisted::Failed(err) => {
            warn!("History not updated: {}", err);
            format!("not saved ({})", err)
        }
    };

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if json {
        let value = serde_json::json!({
            "summary": summary,
            "status": status,
        });
        serde_json::to_writer_pretty(&mut handle, &value)?;
        writeln!(handle)?;
    } else {
        writeln!(
            handle,
            "{} | {} steps | {} | {} | {}",
            format_distance(summary.distance_m),
            summary.steps,
            format_fare(summary.fare_units),
            format_calories(summary.calories),
            status
        )?;
    }
    Ok(())
}

fn handle_history(args: HistoryArgs) -> Result<()> {
    let store = JsonFileStore::open(&args.store)
        .with_context(|| format!("failed to open history {}", args.store.display()))?;
    let tracker = SessionTracker::new(Params::default(), store, MemoryPreferences::new());
    let records = tracker.history()?;
    if records.is_empty() {
        info!("No saved sessions in {}", args.store.display());
    }

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let handle = stdout.lock();
        let mut writer = csv::Writer::from_writer(handle);
        write_history_rows(&records, &mut writer)
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_history_rows(&records, &mut writer)?;
        info!(
            "Wrote {} sessions: {}",
            records.len(),
            args.output.display()
        );
        Ok(())
    }
}

fn write_history_rows<W: Write>(
    records: &[HistoryRecord],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "id",
        "date",
        "distance_m",
        "steps",
        "calories",
        "fare_units",
    ])?;
    for record in records {
        writer.write_record([
            record.id.to_string(),
            format_date(&record.date),
            format!("{:.1}", record.distance_m),
            record.steps.to_string(),
            format!("{:.2}", record.calories),
            record.fare_units.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn handle_weight(args: WeightArgs) -> Result<()> {
    let mut prefs = JsonPreferences::open(&args.prefs)
        .with_context(|| format!("failed to open preferences {}", args.prefs.display()))?;
    match args.value.as_deref() {
        Some(text) => {
            let weight_kg = parse_weight(text)?;
            UserProfile { weight_kg }
                .save(&mut prefs)
                .with_context(|| format!("failed to write {}", args.prefs.display()))?;
            info!("Saved weight {:.1} kg", weight_kg);
        }
        None => {
            let stored = prefs.get_double(ride_meter::WEIGHT_KEY);
            let profile = UserProfile::load(&prefs, ride_meter::DEFAULT_WEIGHT_KG);
            if stored.is_none() {
                debug!("no stored weight, using default");
            }
            println!("{:.0}", profile.weight_kg);
        }
    }
    Ok(())
}

fn load_track(path: &Path) -> Result<Vec<ride_meter::PositionFix>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let hint = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("gpx");
    let fixes =
        parse_track(&data, hint).with_context(|| format!("failed to parse {}", path.display()))?;
    if fixes.is_empty() {
        warn!("{} contains no timed positions", path.display());
    }
    Ok(fixes)
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read params {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid params document", path.display()))?;
    params
        .validate()
        .with_context(|| format!("invalid params in {}", path.display()))?;
    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_history_rows_csv() {
        let records = vec![HistoryRecord {
            id: 3,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
            distance_m: 1523.456,
            steps: 2100,
            calories: 88.123,
            fare_units: 12,
        }];
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_history_rows(&records, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "id,date,distance_m,steps,calories,fare_units\n3,2024-05-01 08:30:00,1523.5,2100,88.12,12\n"
        );
    }

    #[test]
    fn test_cli_parses_replay_args() {
        let cli = Cli::parse_from([
            "ride_meter",
            "replay",
            "morning.gpx",
            "--accel",
            "morning.csv",
            "--step-threshold",
            "0.3",
        ]);
        match cli.command {
            Command::Replay(args) => {
                assert_eq!(args.track, Some(PathBuf::from("morning.gpx")));
                assert_eq!(args.step_threshold, Some(0.3));
                assert_eq!(args.store, PathBuf::from(DEFAULT_STORE));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
