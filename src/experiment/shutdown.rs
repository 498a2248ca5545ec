//! Zero-volt / output-off sequence shared by both engines

use super::send;
use crate::error::{AppResult, SweepError};
use crate::instrument::{Instrument, ScpiCommand};
use tracing::{error, info, warn};

/// Drive every instrument to 0 V, then switch every output off
///
/// Order is all `:SOUR:VOLT 0` commands first, then all `:OUTP OFF`, each in
/// the order given. Every command is attempted even when an earlier one
/// failed; the failures are returned.
pub async fn shutdown_sequence(instruments: &mut [&mut dyn Instrument]) -> Vec<SweepError> {
    let mut errors = Vec::new();

    for cmd in [ScpiCommand::SourceVoltage(0.0), ScpiCommand::Output(false)] {
        for instr in instruments.iter_mut() {
            if let Err(e) = send(&mut **instr, cmd).await {
                warn!("Shutdown step failed: {}", e);
                errors.push(e);
            }
        }
    }

    if errors.is_empty() {
        info!("Outputs disabled on {} instrument(s)", instruments.len());
    }
    errors
}

/// Combine the outcome of the stepping loop with the shutdown failures
pub(crate) fn conclude<T>(outcome: AppResult<T>, shutdown_errors: Vec<SweepError>) -> AppResult<T> {
    if shutdown_errors.is_empty() {
        return outcome;
    }

    let cause = match outcome {
        Ok(_) => None,
        Err(e) => Some(Box::new(e)),
    };
    error!(
        "Instruments may still be energised: {} shutdown command(s) failed",
        shutdown_errors.len()
    );
    Err(SweepError::ShutdownFailed {
        cause,
        errors: shutdown_errors,
    })
}
