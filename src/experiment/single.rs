//! Single-instrument sweep: one SMU sources the voltage and reads the current.

use super::shutdown::{conclude, shutdown_sequence};
use super::{is_cancelled, read_field, send, CancelToken, Progress, ProgressSink, SweepConfig};
use crate::error::{AppResult, SweepError};
use crate::instrument::{Instrument, ReadField, ScpiCommand};
use crate::measurement::{SamplePoint, SeriesRecorder, SweepKind, SweepResult};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Run an I-V sweep on an initialised instrument
///
/// Per point: `:SOUR:VOLT v`, wait `settle`, stamp the time, `:READ?` and keep
/// the current field. Progress is reported at whole-number voltages. The
/// instrument is left at 0 V with output off on every return path.
pub async fn run_single_sweep(
    instr: &mut dyn Instrument,
    config: &SweepConfig,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> AppResult<SweepResult> {
    config.validate()?;

    let total = config.point_count();
    let mut recorder = SeriesRecorder::new(SweepKind::IvSweep, instr.resource_address(), None, total);
    info!(
        "Starting I-V sweep on {}: {} -> {} V, step {} V, {} points",
        instr.resource_address(),
        config.v_min,
        config.v_max,
        config.step,
        total
    );

    let outcome = step_through(&mut *instr, config, &mut recorder, progress, cancel).await;
    let shutdown_errors = shutdown_sequence(&mut [instr]).await;
    conclude(outcome, shutdown_errors)?;

    info!("I-V sweep complete: {} points recorded", recorder.len());
    Ok(recorder.finish())
}

async fn step_through(
    instr: &mut dyn Instrument,
    config: &SweepConfig,
    recorder: &mut SeriesRecorder,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> AppResult<()> {
    let total = config.point_count();
    send(instr, ScpiCommand::Output(true)).await?;

    let clock = Instant::now();
    recorder.mark_start();

    for index in 0..total {
        if is_cancelled(cancel) {
            info!("Sweep cancelled at point {} of {}", index, total);
            return Err(SweepError::Cancelled {
                completed: index,
                total,
            });
        }

        let voltage = config.voltage_at(index);
        send(instr, ScpiCommand::SourceVoltage(voltage)).await?;
        sleep(config.settle).await;
        let elapsed = clock.elapsed();

        let current = read_field(instr, ReadField::Current).await?;
        let point = SamplePoint::new(elapsed, voltage, current);
        debug!("{:.2} V -> {:e} A, {:e} W", voltage, current, point.power);
        recorder.record(point);

        if Progress::is_reportable(voltage) {
            progress.observe(Progress { voltage, current });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::initialize_instrument;
    use crate::instrument::{LoadModel, SimulatedSourceMeter};

    fn resistor() -> SimulatedSourceMeter {
        SimulatedSourceMeter::new("GPIB0::16::INSTR").with_load(LoadModel::Resistor { ohms: 1_000.0 })
    }

    #[tokio::test(start_paused = true)]
    async fn test_bench_sweep_shape() {
        let mut smu = resistor();
        let config = SweepConfig::new(-2.0, 2.0, 0.1, 0.1);
        let mut seen: Vec<Progress> = Vec::new();

        let result = run_single_sweep(&mut smu, &config, &mut seen, None).await.unwrap();

        assert_eq!(result.len(), 41);
        assert_eq!(result.kind(), SweepKind::IvSweep);
        assert_eq!(result.points()[0].voltage, -2.0);
        assert!((result.points()[40].voltage - 2.0).abs() < 1e-9);

        let reported: Vec<f64> = seen.iter().map(|p| p.voltage).collect();
        assert_eq!(reported, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_and_time_columns() {
        let mut smu = resistor();
        let config = SweepConfig::new(0.0, 1.0, 0.25, 0.1);
        // lift the post-reset compliance so 1 mA passes unclamped
        initialize_instrument(&mut smu, config.compliance).await.unwrap();
        let result = run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap();

        let mut last = std::time::Duration::ZERO;
        for point in result.points() {
            assert_eq!(point.power, point.voltage * point.current);
            assert!((point.current - point.voltage / 1_000.0).abs() < 1e-15);
            assert!(point.elapsed >= last);
            assert!(point.secondary.is_none());
            last = point.elapsed;
        }
        // one settle delay per point
        assert!(last >= config.settle * 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_compliance_clamps_until_initialised() {
        let mut smu = resistor();
        let config = SweepConfig::new(0.0, 1.0, 0.5, 0.1);
        let result = run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap();

        // 1 V across 1 kOhm wants 1 mA; *RST compliance is 105 uA
        let last = result.points()[2];
        assert!((last.current - 105e-6).abs() < 1e-15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_sequence() {
        let mut smu = resistor();
        let config = SweepConfig::new(0.0, 0.2, 0.1, 0.1);
        run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap();

        assert_eq!(
            smu.commands(),
            [
                ":OUTP ON",
                ":SOUR:VOLT 0",
                ":READ?",
                ":SOUR:VOLT 0.1",
                ":READ?",
                ":SOUR:VOLT 0.2",
                ":READ?",
                ":SOUR:VOLT 0",
                ":OUTP OFF",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_plan_sends_nothing() {
        let mut smu = resistor();
        let config = SweepConfig::new(0.0, 1.0, 0.0, 0.1);
        let err = run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap_err();

        assert!(matches!(err, SweepError::Configuration(_)));
        assert!(smu.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_still_shuts_down() {
        let mut smu = resistor().fail_on(":READ?", 4);
        let config = SweepConfig::new(0.0, 1.0, 0.1, 0.1);
        let err = run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap_err();

        assert!(matches!(err, SweepError::Transport(_)));
        let tail: Vec<&str> = smu.commands().iter().rev().take(2).map(String::as_str).collect();
        assert_eq!(tail, vec![":OUTP OFF", ":SOUR:VOLT 0"]);
        assert!(!smu.state().output_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_read_is_transport_error() {
        let mut smu = resistor().with_read_fields(1);
        let config = SweepConfig::new(0.0, 1.0, 0.5, 0.1);
        let err = run_single_sweep(&mut smu, &config, &mut (), None).await.unwrap_err();

        assert!(matches!(err, SweepError::Transport(_)));
        assert!(err.to_string().contains("expected current"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_point() {
        let mut smu = resistor();
        let token = CancelToken::new();
        token.cancel();
        let config = SweepConfig::new(0.0, 1.0, 0.1, 0.1);
        let err = run_single_sweep(&mut smu, &config, &mut (), Some(&token))
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::Cancelled { completed: 0, total: 11 }));
        assert_eq!(smu.commands(), [":OUTP ON", ":SOUR:VOLT 0", ":OUTP OFF"]);
    }
}
