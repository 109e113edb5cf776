// Readout text for the four tracker channels.

use crate::session::SessionObserver;

/// Distance as `"<%g> m"`: six significant digits, trailing zeros trimmed,
/// exponent form outside 1e-4..1e6.
pub fn format_distance(meters: f64) -> String {
    format!("{} m", format_general(meters))
}

pub fn format_fare(fare_units: u32) -> String {
    format!("Tk. {}", fare_units)
}

pub fn format_calories(calories: f64) -> String {
    format!("{:.2} Cal", calories)
}

fn format_general(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if !value.is_finite() {
        return value.to_string();
    }
    // Round to six significant digits first so the exponent reflects carries.
    let sci = format!("{:.5e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if !(-4..6).contains(&exp) {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_zeros(mantissa), sign, exp.abs())
    } else {
        let decimals = (5 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Readout {
    pub distance: String,
    pub steps: String,
    pub fare: String,
    pub calories: String,
}

impl Default for Readout {
    fn default() -> Self {
        Self {
            distance: format_distance(0.0),
            steps: "0".to_string(),
            fare: format_fare(0),
            calories: format_calories(0.0),
        }
    }
}

/// Observer that keeps the latest text for each channel.
#[derive(Clone, Debug, Default)]
pub struct TextDisplay {
    readout: Readout,
    updates: usize,
}

impl TextDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readout(&self) -> &Readout {
        &self.readout
    }

    pub fn updates(&self) -> usize {
        self.updates
    }
}

impl SessionObserver for TextDisplay {
    fn on_distance_changed(&mut self, meters: f64) {
        self.readout.distance = format_distance(meters);
        self.updates += 1;
    }

    fn on_steps_changed(&mut self, steps: u64) {
        self.readout.steps = steps.to_string();
        self.updates += 1;
    }

    fn on_fare_changed(&mut self, fare_units: u32) {
        self.readout.fare = format_fare(fare_units);
        self.updates += 1;
    }

    fn on_calories_changed(&mut self, calories: f64) {
        self.readout.calories = format_calories(calories);
        self.updates += 1;
    }
}
