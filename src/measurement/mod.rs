//! Sweep samples and the series they form.
//!
//! A sweep produces one [`SamplePoint`] per commanded voltage. Points are
//! appended by a [`SeriesRecorder`] while the sweep runs and handed out as an
//! immutable [`SweepResult`] once the instruments are safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod recorder;

pub use recorder::SeriesRecorder;

/// Which engine produced a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepKind {
    /// Single instrument, current against voltage
    IvSweep,
    /// Primary sweep read back through a biased secondary
    PvSweep,
}

impl SweepKind {
    /// Tag written in the `#! Type = ...` preamble line
    pub fn tag(self) -> &'static str {
        match self {
            SweepKind::IvSweep => "iv-sweep",
            SweepKind::PvSweep => "pv-sweep",
        }
    }
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SweepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "iv-sweep" => Ok(SweepKind::IvSweep),
            "pv-sweep" => Ok(SweepKind::PvSweep),
            other => Err(format!("Unknown sweep type '{}'", other)),
        }
    }
}

/// Readings from the secondary instrument at one primary setpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondarySample {
    /// V1, measured on the secondary
    pub voltage: f64,
    /// I1, measured on the secondary
    pub current: f64,
    /// P1 = V1 * I1
    pub power: f64,
    /// P2 = V * I1
    pub cross_power: f64,
}

impl SecondarySample {
    /// Derive P1 and P2 from the secondary readings
    pub fn new(primary_voltage: f64, voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            power: voltage * current,
            cross_power: primary_voltage * current,
        }
    }
}

/// One row of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    /// Time since the sweep clock started
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Commanded primary voltage (V)
    pub voltage: f64,
    /// Primary current read back (A)
    pub current: f64,
    /// voltage * current (W)
    pub power: f64,
    /// Present for dual sweeps only
    pub secondary: Option<SecondarySample>,
}

impl SamplePoint {
    /// A point with P = V * I
    pub fn new(elapsed: Duration, voltage: f64, current: f64) -> Self {
        Self {
            elapsed,
            voltage,
            current,
            power: voltage * current,
            secondary: None,
        }
    }

    /// Attach the secondary readings
    pub fn with_secondary(mut self, secondary: SecondarySample) -> Self {
        self.secondary = Some(secondary);
        self
    }
}

/// Completed, read-only series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    kind: SweepKind,
    primary: String,
    secondary: Option<String>,
    started_at: DateTime<Utc>,
    points: Vec<SamplePoint>,
}

impl SweepResult {
    pub(crate) fn new(
        kind: SweepKind,
        primary: String,
        secondary: Option<String>,
        started_at: DateTime<Utc>,
        points: Vec<SamplePoint>,
    ) -> Self {
        Self {
            kind,
            primary,
            secondary,
            started_at,
            points,
        }
    }

    /// Rebuild a result from rows read back from disk
    pub fn from_points(kind: SweepKind, points: Vec<SamplePoint>) -> Self {
        Self::new(kind, String::new(), None, Utc::now(), points)
    }

    /// I-V or P-V
    pub fn kind(&self) -> SweepKind {
        self.kind
    }

    /// Resource address of the voltage source
    pub fn primary_address(&self) -> &str {
        &self.primary
    }

    /// Resource address of the current reader, dual sweeps only
    pub fn secondary_address(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    /// Wall-clock time the sweep clock started
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Points in acquisition order
    pub fn points(&self) -> &[SamplePoint] {
        &self.points
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// V column
    pub fn voltages(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.voltage).collect()
    }

    /// I column
    pub fn currents(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.current).collect()
    }

    /// I1 column; empty for single sweeps
    pub fn secondary_currents(&self) -> Vec<f64> {
        self.points
            .iter()
            .filter_map(|p| p.secondary.map(|s| s.current))
            .collect()
    }
}
