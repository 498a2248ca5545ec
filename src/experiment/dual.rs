//! Dual-instrument sweep: the primary sources the voltage sweep while the
//! secondary holds a static bias and reads the resulting current.

use super::shutdown::{conclude, shutdown_sequence};
use super::{is_cancelled, read_field, send, CancelToken, DualSweepConfig, Progress, ProgressSink};
use crate::error::{AppResult, SweepError};
use crate::instrument::{Instrument, ReadField, ScpiCommand};
use crate::measurement::{SamplePoint, SecondarySample, SeriesRecorder, SweepKind, SweepResult};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Run a P-V sweep on two initialised instruments
///
/// Before stepping, both outputs are enabled and the secondary is set to its
/// bias and compliance. Per point the primary is set and read, then the
/// secondary is read twice: once for its voltage, once for its current.
/// Progress carries the secondary current. Both instruments are left at 0 V
/// with output off on every return path.
pub async fn run_dual_sweep<'a>(
    primary: &'a mut dyn Instrument,
    secondary: &'a mut dyn Instrument,
    config: &DualSweepConfig,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> AppResult<SweepResult> {
    config.validate()?;

    let total = config.sweep.point_count();
    let mut recorder = SeriesRecorder::new(
        SweepKind::PvSweep,
        primary.resource_address(),
        Some(secondary.resource_address()),
        total,
    );
    info!(
        "Starting P-V sweep: {} sweeps {} -> {} V (step {} V, {} points), {} biased at {} V",
        primary.resource_address(),
        config.sweep.v_min,
        config.sweep.v_max,
        config.sweep.step,
        total,
        secondary.resource_address(),
        config.secondary_bias
    );

    let outcome = step_through(
        &mut *primary,
        &mut *secondary,
        config,
        &mut recorder,
        progress,
        cancel,
    )
    .await;
    let shutdown_errors = shutdown_sequence(&mut [primary, secondary]).await;
    conclude(outcome, shutdown_errors)?;

    info!("P-V sweep complete: {} points recorded", recorder.len());
    Ok(recorder.finish())
}

async fn step_through(
    primary: &mut dyn Instrument,
    secondary: &mut dyn Instrument,
    config: &DualSweepConfig,
    recorder: &mut SeriesRecorder,
    progress: &mut dyn ProgressSink,
    cancel: Option<&CancelToken>,
) -> AppResult<()> {
    let sweep = &config.sweep;
    let total = sweep.point_count();

    send(primary, ScpiCommand::Output(true)).await?;
    send(secondary, ScpiCommand::Output(true)).await?;
    send(secondary, ScpiCommand::SourceVoltage(config.secondary_bias)).await?;
    send(secondary, ScpiCommand::CurrentCompliance(config.secondary_compliance)).await?;

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

        let voltage = sweep.voltage_at(index);
        send(primary, ScpiCommand::SourceVoltage(voltage)).await?;
        sleep(sweep.settle).await;
        let elapsed = clock.elapsed();

        let current = read_field(primary, ReadField::Current).await?;
        // Two separate triggers; V1 and I1 come from different readings
        let secondary_voltage = read_field(secondary, ReadField::Voltage).await?;
        let secondary_current = read_field(secondary, ReadField::Current).await?;

        let point = SamplePoint::new(elapsed, voltage, current).with_secondary(
            SecondarySample::new(voltage, secondary_voltage, secondary_current),
        );
        debug!(
            "{:.2} V -> I {:e} A, V1 {:.2} V, I1 {:e} A",
            voltage, current, secondary_voltage, secondary_current
        );
        recorder.record(point);

        if Progress::is_reportable(voltage) {
            progress.observe(Progress {
                voltage,
                current: secondary_current,
            });
        }
    }

    Ok(())
}
