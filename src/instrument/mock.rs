//! A simulated source-measure unit.
//!
//! Behaves like a Keithley 2400 driving a simple load: it tracks output state,
//! source voltage and compliance from the SCPI commands it receives and answers
//! `:READ?` with `voltage,current,resistance,timestamp,status`. Every command is
//! recorded so tests can verify sequencing, and failures can be injected on a
//! chosen command.

use super::Instrument;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Thermal voltage at room temperature (V)
const THERMAL_VOLTAGE: f64 = 0.025_85;
/// Compliance after `*RST` on a 2400 (A)
const RESET_COMPLIANCE: f64 = 105e-6;
/// Status word bit set while the reading is clamped at compliance
const STATUS_COMPLIANCE: u32 = 1 << 3;
/// Resistance field value when resistance is not measured
const NOT_A_NUMBER: f64 = 9.91e37;

/// Electrical model of the device under test
#[derive(Debug, Clone)]
pub enum LoadModel {
    /// Nothing connected
    Open,
    /// Ohmic load
    Resistor {
        /// Resistance (Ω)
        ohms: f64,
    },
    /// Shockley diode
    Diode {
        /// Reverse saturation current (A)
        saturation_current: f64,
        /// Ideality factor
        ideality: f64,
    },
    /// Current tracks another SMU's output current (e.g. a detector lit by the
    /// device the other SMU drives), plus the local bias across `shunt_ohms`
    Coupled {
        /// Source state of the driving SMU
        source: SharedState,
        /// Fraction of the driving current seen here
        gain: f64,
        /// Resistance the local bias drives into (Ω)
        shunt_ohms: f64,
    },
}

/// Source state of a simulated SMU, shareable with a coupled partner
pub type SharedState = Arc<Mutex<SourceState>>;

/// What the front panel would show
#[derive(Debug, Clone)]
pub struct SourceState {
    /// `:OUTP` state
    pub output_on: bool,
    /// Last `:SOUR:VOLT` setpoint (V)
    pub source_voltage: f64,
    /// Current limit (A)
    pub compliance: f64,
    /// `:SENS:CURR:RANG:AUTO ON` received
    pub auto_range: bool,
    /// Sourcing voltage rather than current
    pub source_function_voltage: bool,
    /// `:SENS:FUNC "CURR"` received
    pub sense_current: bool,
    /// Last current the unit delivered with output on
    pub last_current: f64,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            output_on: false,
            source_voltage: 0.0,
            compliance: RESET_COMPLIANCE,
            auto_range: false,
            source_function_voltage: true,
            sense_current: false,
            last_current: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct FailurePlan {
    matching: String,
    skip: usize,
}

/// In-process SMU implementing [`Instrument`]
pub struct SimulatedSourceMeter {
    address: String,
    state: SharedState,
    load: LoadModel,
    commands: Vec<String>,
    failures: Vec<FailurePlan>,
    latency: Duration,
    read_fields: usize,
    noise: Option<(f64, StdRng)>,
    started: Instant,
}

fn lock(state: &SharedState) -> MutexGuard<'_, SourceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedSourceMeter {
    /// Create a simulated SMU driving a 1 kΩ resistor
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: Arc::new(Mutex::new(SourceState::default())),
            load: LoadModel::Resistor { ohms: 1_000.0 },
            commands: Vec::new(),
            failures: Vec::new(),
            latency: Duration::ZERO,
            read_fields: 5,
            noise: None,
            started: Instant::now(),
        }
    }

    /// Build a primary/secondary pair where the secondary's current follows
    /// the primary's, scaled by `gain`
    pub fn coupled_pair(primary: &str, secondary: &str, load: LoadModel, gain: f64) -> (Self, Self) {
        let primary = Self::new(primary).with_load(load);
        let secondary = Self::new(secondary).with_load(LoadModel::Coupled {
            source: primary.shared_state(),
            gain,
            shunt_ohms: 10_000.0,
        });
        (primary, secondary)
    }

    /// Replace the load model
    pub fn with_load(mut self, load: LoadModel) -> Self {
        self.load = load;
        self
    }

    /// Simulated bus latency per command
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of values returned by `:READ?` (a real 2400 returns 5)
    pub fn with_read_fields(mut self, fields: usize) -> Self {
        self.read_fields = fields;
        self
    }

    /// Add uniform relative noise to the current reading
    pub fn with_noise(mut self, fraction: f64, seed: u64) -> Self {
        self.noise = Some((fraction, StdRng::seed_from_u64(seed)));
        self
    }

    /// Fail the command that starts with `matching`, after letting `skip`
    /// matching commands through. One-shot; several can be armed.
    pub fn fail_on(mut self, matching: &str, skip: usize) -> Self {
        self.inject_failure(matching, skip);
        self
    }

    /// Arm a failure on an instrument that is already in use
    pub fn inject_failure(&mut self, matching: &str, skip: usize) {
        self.failures.push(FailurePlan {
            matching: matching.to_string(),
            skip,
        });
    }

    /// Handle to the source state, for coupling or inspection
    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }

    /// Snapshot of the current source state
    pub fn state(&self) -> SourceState {
        lock(&self.state).clone()
    }

    /// Every command received, in order
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Commands received that are not queries
    pub fn writes(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter(|c| !c.trim_end().ends_with('?'))
            .map(String::as_str)
            .collect()
    }

    /// Clear the command log
    pub fn clear_log(&mut self) {
        self.commands.clear();
    }

    async fn begin(&mut self, cmd: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.commands.push(cmd.to_string());

        let mut fired = None;
        for (index, plan) in self.failures.iter_mut().enumerate() {
            if !cmd.starts_with(plan.matching.as_str()) {
                continue;
            }
            if plan.skip == 0 {
                fired = Some(index);
                break;
            }
            plan.skip -= 1;
        }
        if let Some(index) = fired {
            self.failures.remove(index);
            return Err(anyhow!("Injected failure on '{}' at {}", cmd, self.address));
        }
        Ok(())
    }

    fn apply(&mut self, cmd: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let upper = cmd.trim().to_ascii_uppercase();

        if upper.starts_with("*RST") {
            *state = SourceState::default();
        } else if upper == ":SOUR:FUNC VOLT" {
            state.source_function_voltage = true;
        } else if let Some(value) = upper.strip_prefix(":SOUR:VOLT ") {
            state.source_voltage = parse_number(value, cmd)?;
        } else if let Some(value) = upper.strip_prefix(":SENS:CURR:PROT ") {
            let compliance = parse_number(value, cmd)?;
            if compliance <= 0.0 {
                return Err(anyhow!("Parameter data out of range: '{}'", cmd));
            }
            state.compliance = compliance;
        } else if upper == ":SENS:CURR:RANG:AUTO ON" {
            state.auto_range = true;
        } else if upper == ":SENS:FUNC \"CURR\"" {
            state.sense_current = true;
        } else if upper == ":OUTP ON" {
            state.output_on = true;
        } else if upper == ":OUTP OFF" {
            state.output_on = false;
            state.last_current = 0.0;
        } else {
            return Err(anyhow!("Undefined header: '{}'", cmd));
        }
        Ok(())
    }

    fn load_current(&self, volts: f64) -> f64 {
        match &self.load {
            LoadModel::Open => 0.0,
            LoadModel::Resistor { ohms } => volts / ohms,
            LoadModel::Diode {
                saturation_current,
                ideality,
            } => saturation_current * ((volts / (ideality * THERMAL_VOLTAGE)).exp() - 1.0),
            LoadModel::Coupled {
                source,
                gain,
                shunt_ohms,
            } => {
                let upstream = lock(source).last_current;
                gain * upstream + volts / shunt_ohms
            }
        }
    }

    fn read(&mut self) -> String {
        let (output_on, volts, compliance) = {
            let state = lock(&self.state);
            (state.output_on, state.source_voltage, state.compliance)
        };

        let (voltage, mut current) = if output_on {
            (volts, self.load_current(volts))
        } else {
            (0.0, 0.0)
        };

        if let Some((fraction, rng)) = self.noise.as_mut() {
            current *= 1.0 + rng.gen_range(-*fraction..=*fraction);
        }

        let mut status = 0u32;
        if current.abs() > compliance {
            current = compliance.copysign(current);
            status |= STATUS_COMPLIANCE;
        }
        if output_on {
            lock(&self.state).last_current = current;
        }

        let timestamp = self.started.elapsed().as_secs_f64();
        let fields = [voltage, current, NOT_A_NUMBER, timestamp, f64::from(status)];
        let response = fields
            .iter()
            .take(self.read_fields)
            .map(|v| format!("{:+E}", v))
            .collect::<Vec<_>>()
            .join(",");
        trace!("{} :READ? -> {}", self.address, response);
        response
    }
}

fn parse_number(value: &str, cmd: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .with_context(|| format!("Numeric data error: '{}'", cmd))
}

#[async_trait]
impl Instrument for SimulatedSourceMeter {
    fn resource_address(&self) -> &str {
        &self.address
    }

    async fn write(&mut self, cmd: &str) -> Result<()> {
        self.begin(cmd).await?;
        debug!("{} <- {}", self.address, cmd);
        self.apply(cmd)
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        self.begin(cmd).await?;
        match cmd.trim().to_ascii_uppercase().as_str() {
            "*IDN?" => Ok(format!(
                "KEITHLEY INSTRUMENTS INC.,MODEL 2400,SIM{},C30 (simulated)",
                self.address.len()
            )),
            ":READ?" => Ok(self.read()),
            _ => Err(anyhow!("Query not supported by simulator: '{}'", cmd)),
        }
    }
}
