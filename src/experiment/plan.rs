//! Sweep plans
//!
//! A plan is the immutable description of one run: where the primary voltage
//! starts, how it steps, and what the instruments are allowed to source.
//! Validation happens here, before any instrument is commanded.

use crate::error::{AppResult, SweepError};
use std::time::Duration;

/// Delay between commanding a setpoint and reading it back
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(50);

/// Upper bound on the number of points in one sweep
pub const MAX_POINTS: usize = 1_000_000;

/// Voltage sweep on the primary instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepConfig {
    /// First setpoint (V)
    pub v_min: f64,
    /// Last setpoint bound (V)
    pub v_max: f64,
    /// Increment between setpoints (V); negative for descending sweeps
    pub step: f64,
    /// Primary compliance current (A)
    pub compliance: f64,
    /// Wait after each setpoint before reading
    pub settle: Duration,
}

impl SweepConfig {
    /// Sweep with the default settle delay
    pub fn new(v_min: f64, v_max: f64, step: f64, compliance: f64) -> Self {
        Self {
            v_min,
            v_max,
            step,
            compliance,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Replace the settle delay
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// `floor((v_max - v_min) / step) + 1`
    ///
    /// Meaningful only for a validated plan; returns 0 when the step points
    /// away from `v_max`.
    pub fn point_count(&self) -> usize {
        let span = (self.v_max - self.v_min) / self.step;
        if !span.is_finite() || span < 0.0 {
            return 0;
        }
        // Saturating cast, capped by validate()
        span.floor() as usize + 1
    }

    /// Setpoint `i`, computed as `v_min + i * step` so error does not accumulate
    pub fn voltage_at(&self, index: usize) -> f64 {
        self.v_min + index as f64 * self.step
    }

    /// All setpoints in order
    pub fn voltages(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.point_count()).map(move |i| self.voltage_at(i))
    }

    /// Reject plans that cannot be run
    pub fn validate(&self) -> AppResult<()> {
        for (name, value) in [
            ("v_min", self.v_min),
            ("v_max", self.v_max),
            ("step", self.step),
            ("compliance", self.compliance),
        ] {
            if !value.is_finite() {
                return Err(SweepError::Configuration(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }

        if self.step == 0.0 {
            return Err(SweepError::Configuration(
                "step must be non-zero".to_string(),
            ));
        }

        if (self.v_max - self.v_min) / self.step < 0.0 {
            return Err(SweepError::Configuration(format!(
                "step {} does not move from v_min {} towards v_max {}",
                self.step, self.v_min, self.v_max
            )));
        }

        if self.compliance <= 0.0 {
            return Err(SweepError::Configuration(format!(
                "compliance must be positive, got {}",
                self.compliance
            )));
        }

        let span = ((self.v_max - self.v_min) / self.step).floor();
        if span >= MAX_POINTS as f64 {
            return Err(SweepError::Configuration(format!(
                "sweep of {} points exceeds the limit of {}",
                span + 1.0,
                MAX_POINTS
            )));
        }

        Ok(())
    }
}

/// Primary sweep plus the static settings of the secondary instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DualSweepConfig {
    /// The primary's voltage ramp
    pub sweep: SweepConfig,
    /// Constant voltage held on the secondary (V)
    pub secondary_bias: f64,
    /// Secondary compliance current (A)
    pub secondary_compliance: f64,
}

impl DualSweepConfig {
    /// Pair a ramp with a fixed secondary bias
    pub fn new(sweep: SweepConfig, secondary_bias: f64, secondary_compliance: f64) -> Self {
        Self {
            sweep,
            secondary_bias,
            secondary_compliance,
        }
    }

    /// Check the ramp and the secondary compliance
    pub fn validate(&self) -> AppResult<()> {
        self.sweep.validate()?;

        if !self.secondary_bias.is_finite() {
            return Err(SweepError::Configuration(format!(
                "secondary_bias must be finite, got {}",
                self.secondary_bias
            )));
        }
        if !(self.secondary_compliance.is_finite() && self.secondary_compliance > 0.0) {
            return Err(SweepError::Configuration(format!(
                "secondary_compliance must be positive, got {}",
                self.secondary_compliance
            )));
        }
        Ok(())
    }
}
