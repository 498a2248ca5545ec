//! Point buffer filled while a sweep runs.

use super::{SamplePoint, SweepKind, SweepResult};
use chrono::{DateTime, Utc};

/// Append-only buffer filled by a running sweep
///
/// Created empty when the sweep starts; exactly one point is recorded per
/// setpoint. [`SeriesRecorder::finish`] consumes the recorder so the series
/// cannot change after the run.
#[derive(Debug)]
pub struct SeriesRecorder {
    kind: SweepKind,
    primary: String,
    secondary: Option<String>,
    started_at: DateTime<Utc>,
    points: Vec<SamplePoint>,
}

impl SeriesRecorder {
    /// Start an empty series; `capacity` is the planned point count
    pub fn new(kind: SweepKind, primary: &str, secondary: Option<&str>, capacity: usize) -> Self {
        Self {
            kind,
            primary: primary.to_string(),
            secondary: secondary.map(str::to_string),
            started_at: Utc::now(),
            points: Vec::with_capacity(capacity),
        }
    }

    /// Stamp the wall-clock start; call when the sweep clock starts
    pub fn mark_start(&mut self) {
        self.started_at = Utc::now();
    }

    /// Append a point
    pub fn record(&mut self, point: SamplePoint) {
        self.points.push(point);
    }

    /// Points recorded so far
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True before the first point
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Seal the series
    pub fn finish(self) -> SweepResult {
        SweepResult::new(
            self.kind,
            self.primary,
            self.secondary,
            self.started_at,
            self.points,
        )
    }
}
