//! Measurement session: one configured run from initialisation to files on disk.
//!
//! A `MeasurementSession` owns the loaded [`Settings`] and the run
//! [`Metadata`]. It initialises the instruments it is handed, runs the engine,
//! and once the caller has released the instruments, persists and plots the
//! result. Persistence happens strictly after shutdown, so a failed write never
//! leaves a source energised.

use crate::config::{InstrumentSettings, Settings};
use crate::data::{render_plot, SweepWriter, TextSweepWriter};
use crate::error::{AppResult, SweepError};
use crate::experiment::{
    initialize_instrument, run_dual_sweep, run_single_sweep, CancelToken, ProgressSink,
};
use crate::instrument::Instrument;
use crate::measurement::SweepResult;
use crate::metadata::Metadata;
use std::path::PathBuf;
use tracing::info;

/// Files written for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutput {
    /// Tab-separated data file
    pub data_file: PathBuf,
    /// CSV copy, when enabled
    pub csv_file: Option<PathBuf>,
    /// SVG plot, when enabled
    pub plot_file: Option<PathBuf>,
}

/// Runs sweeps with one set of settings and metadata and saves the results
pub struct MeasurementSession {
    settings: Settings,
    metadata: Metadata,
}

impl MeasurementSession {
    /// Session with metadata from the settings
    pub fn new(settings: Settings) -> Self {
        let metadata = Metadata::from_config(&settings.metadata);
        Self { settings, metadata }
    }

    /// Replace the metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Loaded settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Metadata written into each file
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Initialise `instr` and run the single-instrument sweep from `[iv]`
    pub async fn run_iv(
        &self,
        instr: &mut dyn Instrument,
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> AppResult<SweepResult> {
        let config = self.settings.iv.to_sweep_config();
        config.validate()?;

        initialize_instrument(instr, config.compliance).await?;
        run_single_sweep(instr, &config, progress, cancel).await
    }

    /// Initialise both instruments and run the dual sweep from `[pv]`
    pub async fn run_pv(
        &self,
        primary: &mut dyn Instrument,
        secondary: &mut dyn Instrument,
        progress: &mut dyn ProgressSink,
        cancel: Option<&CancelToken>,
    ) -> AppResult<SweepResult> {
        let config = self.settings.pv.to_sweep_config();
        config.validate()?;

        initialize_instrument(primary, config.sweep.compliance).await?;
        initialize_instrument(secondary, config.secondary_compliance).await?;
        run_dual_sweep(primary, secondary, &config, progress, cancel).await
    }

    /// Write the data file, then the optional CSV copy and plot
    ///
    /// `base_name` is the file name without extension. Files land in
    /// `storage.output_dir`.
    pub fn persist(&self, result: &SweepResult, base_name: &str) -> AppResult<SessionOutput> {
        let base_name = base_name.trim();
        if base_name.is_empty() {
            return Err(SweepError::Configuration(
                "file name cannot be empty".to_string(),
            ));
        }

        let storage = &self.settings.storage;
        let dir = storage.output_dir.as_path();

        let data_file = TextSweepWriter.write_file(dir, base_name, result, &self.metadata)?;
        let csv_file = if storage.write_csv {
            self.write_csv(result, base_name)?
        } else {
            None
        };
        let plot_file = if storage.plot {
            let path = dir.join(format!("{}.svg", base_name));
            render_plot(result, &path)?;
            Some(path)
        } else {
            None
        };

        info!("Data saved successfully.");
        Ok(SessionOutput {
            data_file,
            csv_file,
            plot_file,
        })
    }

    #[cfg(feature = "storage_csv")]
    fn write_csv(&self, result: &SweepResult, base_name: &str) -> AppResult<Option<PathBuf>> {
        let path = crate::data::CsvSweepWriter.write_file(
            &self.settings.storage.output_dir,
            base_name,
            result,
            &self.metadata,
        )?;
        Ok(Some(path))
    }

    #[cfg(not(feature = "storage_csv"))]
    fn write_csv(&self, _result: &SweepResult, _base_name: &str) -> AppResult<Option<PathBuf>> {
        tracing::warn!("CSV export requested but the storage_csv feature is not enabled");
        Ok(None)
    }
}

/// Open a hardware instrument through VISA
#[cfg(feature = "instrument_visa")]
pub async fn open_instrument(settings: &InstrumentSettings) -> AppResult<Box<dyn Instrument>> {
    let instr = crate::instrument::VisaInstrument::open(settings).await?;
    Ok(Box::new(instr))
}

/// Open a hardware instrument through VISA
#[cfg(not(feature = "instrument_visa"))]
pub async fn open_instrument(settings: &InstrumentSettings) -> AppResult<Box<dyn Instrument>> {
    tracing::warn!("Cannot open '{}' without VISA support", settings.resource);
    Err(SweepError::Configuration(
        "VISA support not enabled. Rebuild with --features instrument_visa or use --simulate"
            .to_string(),
    ))
}

/// VISA resources matching `expr`, for finding instrument addresses
#[cfg(feature = "instrument_visa")]
pub async fn list_resources(expr: &str) -> AppResult<Vec<String>> {
    Ok(crate::instrument::list_resources(expr).await?)
}

/// VISA resources matching `expr`, for finding instrument addresses
#[cfg(not(feature = "instrument_visa"))]
pub async fn list_resources(expr: &str) -> AppResult<Vec<String>> {
    tracing::warn!("Cannot search for '{}' without VISA support", expr);
    Err(SweepError::Configuration(
        "VISA support not enabled. Rebuild with --features instrument_visa".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{LoadModel, SimulatedSourceMeter};
    use crate::measurement::SweepKind;
    use std::time::Duration;

    fn settings_in(dir: &std::path::Path) -> Settings {
        let mut settings = Settings::default();
        settings.storage.output_dir = dir.to_path_buf();
        settings.storage.plot = false;
        settings.iv.v_min = 0.0;
        settings.iv.v_max = 1.0;
        settings.iv.step = 0.5;
        settings.iv.settle = Duration::from_millis(1);
        settings
    }

    #[tokio::test(start_paused = true)]
    async fn test_iv_run_initialises_first() {
        let dir = tempfile::tempdir().unwrap();
        let session = MeasurementSession::new(settings_in(dir.path()));
        let mut smu = SimulatedSourceMeter::new("GPIB0::16::INSTR")
            .with_load(LoadModel::Resistor { ohms: 1_000.0 });

        let result = session.run_iv(&mut smu, &mut (), None).await.unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(smu.commands()[0], "*IDN?");
        assert_eq!(smu.commands()[1], "*rst; status:preset;");
        assert_eq!(smu.state().compliance, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pv_run_uses_both_compliances() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.pv.v_max = 0.2;
        settings.pv.settle = Duration::from_millis(1);
        let session = MeasurementSession::new(settings);
        let (mut primary, mut secondary) = SimulatedSourceMeter::coupled_pair(
            "GPIB0::16::INSTR",
            "GPIB0::14::INSTR",
            LoadModel::Resistor { ohms: 100.0 },
            0.5,
        );

        let result = session
            .run_pv(&mut primary, &mut secondary, &mut (), None)
            .await
            .unwrap();

        assert_eq!(result.kind(), SweepKind::PvSweep);
        assert_eq!(result.len(), 3);
        assert_eq!(primary.state().compliance, 0.35);
        assert_eq!(secondary.state().compliance, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_writes_enabled_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.storage.plot = true;
        let session = MeasurementSession::new(settings);
        let mut smu = SimulatedSourceMeter::new("GPIB0::16::INSTR");
        let result = session.run_iv(&mut smu, &mut (), None).await.unwrap();

        let output = session.persist(&result, "diode_01").unwrap();
        assert_eq!(output.data_file, dir.path().join("diode_01.txt"));
        assert_eq!(output.plot_file, Some(dir.path().join("diode_01.svg")));
        assert!(output.csv_file.is_none());
        assert!(output.data_file.exists());
    }

    #[test]
    fn test_empty_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let session = MeasurementSession::new(settings_in(dir.path()));
        let result = SweepResult::from_points(SweepKind::IvSweep, Vec::new());
        assert!(matches!(
            session.persist(&result, "  "),
            Err(SweepError::Configuration(_))
        ));
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn test_resource_listing_needs_visa() {
        let err = list_resources("?*INSTR").await.unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)));
        assert!(err.to_string().contains("instrument_visa"));
    }
}
