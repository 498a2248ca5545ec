//! Configuration System using Figment
//!
//! Strongly-typed settings for a measurement run. Configuration is loaded from:
//! 1. `config/sweep.toml` (base configuration)
//! 2. Environment variables (prefixed with `SMU_SWEEP_`, nested keys joined by `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SMU_SWEEP_APPLICATION__LOG_LEVEL=debug
//! SMU_SWEEP_INSTRUMENTS__PRIMARY__RESOURCE="GPIB0::12::INSTR"
//! SMU_SWEEP_IV__V_MAX=5.0
//! ```
//!
//! Instrument addresses come from here and are resolved once, when the run starts.
//!
//! # Example
//!
//! ```no_run
//! use smu_sweep::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Primary SMU: {}", settings.instruments.primary.resource);
//! println!("IV points: {}", settings.iv.to_sweep_config().point_count());
//! # Ok::<(), smu_sweep::config::ConfigError>(())
//! ```

use crate::experiment::{DualSweepConfig, SweepConfig, DEFAULT_SETTLE};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sweep.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Loaded values are unusable
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Where and how results are written
    #[serde(default)]
    pub storage: StorageConfig,
    /// Free-text fields copied into the file preamble
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Instrument addresses
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    /// Single-instrument (I-V) sweep parameters
    #[serde(default)]
    pub iv: IvSweepSettings,
    /// Dual-instrument (P-V) sweep parameters
    #[serde(default)]
    pub pv: PvSweepSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "smu_sweep".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for data files
    pub output_dir: PathBuf,
    /// Also export a CSV copy of the series
    #[serde(default)]
    pub write_csv: bool,
    /// Render the diagnostic plot next to the data file
    #[serde(default = "default_plot")]
    pub plot: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            write_csv: false,
            plot: true,
        }
    }
}

/// Preamble text for the persisted file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetadataConfig {
    /// `*! Project = ...`
    #[serde(default)]
    pub project: Option<String>,
    /// `#! Fluence / Dose / Condition = ...`
    #[serde(default)]
    pub condition: Option<String>,
}

/// The two source-measure units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsConfig {
    /// Voltage source and current reader (both sweep modes)
    pub primary: InstrumentSettings,
    /// Statically biased current reader (dual mode only)
    pub secondary: InstrumentSettings,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            primary: InstrumentSettings::new("GPIB0::16::INSTR"),
            secondary: InstrumentSettings::new("GPIB0::14::INSTR"),
        }
    }
}

/// Connection settings for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// VISA resource string (e.g., "GPIB0::16::INSTR")
    pub resource: String,
    /// Open/IO timeout in milliseconds
    #[serde(default = "default_open_timeout")]
    pub open_timeout_ms: u64,
    /// Terminator expected at the end of every response
    #[serde(default = "default_termination")]
    pub read_termination: String,
    /// Terminator appended to every command
    #[serde(default = "default_termination")]
    pub write_termination: String,
}

impl InstrumentSettings {
    /// Settings for `resource` with default timeout and `\n` terminators
    pub fn new(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            open_timeout_ms: default_open_timeout(),
            read_termination: default_termination(),
            write_termination: default_termination(),
        }
    }

    /// Timeout as a `Duration`
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Single-instrument sweep parameters as they appear in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvSweepSettings {
    /// Minimum voltage (V)
    pub v_min: f64,
    /// Maximum voltage (V)
    pub v_max: f64,
    /// Voltage step (V)
    pub step: f64,
    /// Compliance current (A)
    pub compliance: f64,
    /// Settle delay after each setpoint
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for IvSweepSettings {
    fn default() -> Self {
        Self {
            v_min: -2.0,
            v_max: 2.0,
            step: 0.1,
            compliance: 0.10,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl IvSweepSettings {
    /// Engine configuration for these settings
    pub fn to_sweep_config(&self) -> SweepConfig {
        SweepConfig::new(self.v_min, self.v_max, self.step, self.compliance)
            .with_settle(self.settle)
    }
}

/// Dual-instrument sweep parameters as they appear in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PvSweepSettings {
    /// Minimum primary voltage (V)
    pub v_min: f64,
    /// Maximum primary voltage (V)
    pub v_max: f64,
    /// Voltage step (V)
    pub step: f64,
    /// Primary compliance current (A)
    pub compliance: f64,
    /// Static secondary bias (V)
    pub secondary_bias: f64,
    /// Secondary compliance current (A)
    pub secondary_compliance: f64,
    /// Settle delay after each setpoint
    #[serde(default = "default_settle", with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for PvSweepSettings {
    fn default() -> Self {
        Self {
            v_min: 0.0,
            v_max: 12.0,
            step: 0.1,
            compliance: 0.35,
            secondary_bias: 0.0,
            secondary_compliance: 0.1,
            settle: DEFAULT_SETTLE,
        }
    }
}

impl PvSweepSettings {
    /// Engine configuration for these settings
    pub fn to_sweep_config(&self) -> DualSweepConfig {
        DualSweepConfig::new(
            SweepConfig::new(self.v_min, self.v_max, self.step, self.compliance)
                .with_settle(self.settle),
            self.secondary_bias,
            self.secondary_compliance,
        )
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_plot() -> bool {
    true
}

fn default_open_timeout() -> u64 {
    5000
}

fn default_termination() -> String {
    "\n".to_string()
}

fn default_settle() -> Duration {
    DEFAULT_SETTLE
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load configuration from `config/sweep.toml` and environment variables
    ///
    /// Precedence (highest to lowest):
    /// 1. Environment variables (`SMU_SWEEP_` prefix)
    /// 2. The TOML file
    /// 3. Built-in defaults
    ///
    /// A missing file is not an error; the defaults are used instead.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a file the caller named
    ///
    /// # Errors
    ///
    /// Returns a ConfigError if the file does not exist, is malformed, or the
    /// result is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::ValidationError(format!(
                "Configuration file '{}' not found",
                path.display()
            )));
        }
        Self::extract(path)
    }

    fn extract(path: &Path) -> Result<Self, ConfigError> {
        let settings: Self = Self::figment(path)
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SMU_SWEEP_").split("__"))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Resource strings are non-empty and distinct
    /// - Both sweep parameter blocks describe a runnable sweep
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        for (role, instrument) in [
            ("primary", &self.instruments.primary),
            ("secondary", &self.instruments.secondary),
        ] {
            if instrument.resource.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'resource' cannot be empty",
                    role
                )));
            }
        }

        if self.instruments.primary.resource == self.instruments.secondary.resource {
            return Err(ConfigError::ValidationError(format!(
                "Primary and secondary instruments share the address '{}'",
                self.instruments.primary.resource
            )));
        }

        self.iv
            .to_sweep_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[iv] {}", e)))?;
        self.pv
            .to_sweep_config()
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("[pv] {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_bench_setup() {
        let settings = Settings::default();
        assert_eq!(settings.iv.to_sweep_config().point_count(), 41);
        assert_eq!(settings.pv.to_sweep_config().sweep.point_count(), 121);
        assert_eq!(settings.instruments.primary.resource, "GPIB0::16::INSTR");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "bench"
log_level = "debug"

[instruments.primary]
resource = "GPIB0::12::INSTR"

[instruments.secondary]
resource = "GPIB0::14::INSTR"

[iv]
v_min = 0.0
v_max = 1.0
step = 0.25
compliance = 0.15
settle = "20ms"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.instruments.primary.resource, "GPIB0::12::INSTR");
        assert_eq!(settings.instruments.primary.read_termination, "\n");
        let iv = settings.iv.to_sweep_config();
        assert_eq!(iv.point_count(), 5);
        assert_eq!(iv.settle, Duration::from_millis(20));
        // untouched sections keep their defaults
        assert_eq!(settings.pv.v_max, 12.0);
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let settings = Settings::extract(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(settings.application.name, "smu_sweep");
    }

    #[test]
    fn test_missing_named_file_rejected() {
        let err = Settings::load_from("does/not/exist.toml").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("does/not/exist.toml"));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".to_string();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_shared_address_rejected() {
        let mut settings = Settings::default();
        settings.instruments.secondary.resource = settings.instruments.primary.resource.clone();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("share the address"));
    }

    #[test]
    fn test_inverted_sweep_rejected() {
        let mut settings = Settings::default();
        settings.iv.v_min = 2.0;
        settings.iv.v_max = -2.0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("[iv]"));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let settings = Settings::default();
        let text = settings.to_toml_string().unwrap();
        assert!(text.contains("GPIB0::16::INSTR"));
        assert!(text.contains("50ms"));
    }
}
