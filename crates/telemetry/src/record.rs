use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, TelemetryError};

/// Number of leading non-beacon columns: x, y, z, timestamp.
pub const FIXED_COLUMNS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One positional + signal-strength observation as sent by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "coordinates", alias = "position")]
    pub position: Position,
    pub timestamp: f64,
    #[serde(rename = "measurement", alias = "measurements", default)]
    pub measurements: BTreeMap<String, f64>,
}

impl TelemetryRecord {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Flattens the record into the store layout for `num_beacons` beacons.
    /// Beacons without a measurement become NaN.
    pub fn to_row(&self, num_beacons: usize) -> Result<PersistedRow> {
        let Position { x, y, z } = self.position;
        for (name, v) in [("x", x), ("y", y), ("z", z), ("timestamp", self.timestamp)] {
            if !v.is_finite() {
                return Err(TelemetryError::MalformedRecord(format!("{name} is not finite")));
            }
        }

        let mut values = vec![f64::NAN; FIXED_COLUMNS + num_beacons];
        values[..FIXED_COLUMNS].copy_from_slice(&[x, y, z, self.timestamp]);

        for (id, &signal) in &self.measurements {
            let idx = beacon_index(id).ok_or_else(|| {
                TelemetryError::MalformedRecord(format!("unrecognised beacon id `{id}`"))
            })?;
            if idx == 0 || idx > num_beacons {
                return Err(TelemetryError::MalformedRecord(format!(
                    "beacon `{id}` outside 1..={num_beacons}"
                )));
            }
            let slot = &mut values[FIXED_COLUMNS + idx - 1];
            if !slot.is_nan() {
                return Err(TelemetryError::MalformedRecord(format!(
                    "beacon {idx} reported twice"
                )));
            }
            *slot = signal;
        }

        Ok(PersistedRow { values })
    }
}

/// A record flattened to `[x, y, z, timestamp, beacon_1..beacon_N]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedRow {
    values: Vec<f64>,
}

impl PersistedRow {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// CSV fields; missing measurements are written as empty cells.
    pub fn fields(&self) -> impl Iterator<Item = String> + '_ {
        self.values
            .iter()
            .map(|v| if v.is_nan() { String::new() } else { v.to_string() })
    }
}

/// Column names of a store holding `num_beacons` beacons.
pub fn schema(num_beacons: usize) -> Vec<String> {
    ["x", "y", "z", "timestamp"]
        .iter()
        .map(|s| s.to_string())
        .chain((1..=num_beacons).map(|i| format!("beacon_{i}")))
        .collect()
}

/// Parses `Beacon3`, `beacon_3` or `3` into the 1-based index 3.
pub fn beacon_index(id: &str) -> Option<usize> {
    let lower = id.trim().to_ascii_lowercase();
    let digits = lower
        .strip_prefix("beacon")
        .map(|rest| rest.trim_start_matches('_'))
        .unwrap_or(lower.as_str());
    digits.parse().ok()
}
