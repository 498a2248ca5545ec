//! Sweep engines
//!
//! Each engine borrows its instruments exclusively for the run, steps the
//! primary source through the plan and returns the recorded series.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> OutputEnabled -> Stepping (xN) -> OutputDisabled -> Done
//!                 \______________|______________/
//!                   any failure or cancellation still
//!                   passes through OutputDisabled
//! ```
//!
//! The zero-volt/output-off sequence in [`shutdown`] runs on every exit path
//! once output has been requested. Instruments are never closed here.

pub mod dual;
pub mod initializer;
pub mod plan;
pub mod progress;
pub mod shutdown;
pub mod single;

pub use dual::run_dual_sweep;
pub use initializer::initialize_instrument;
pub use plan::{DualSweepConfig, SweepConfig, DEFAULT_SETTLE, MAX_POINTS};
pub use progress::{CancelToken, LogProgress, Progress, ProgressSink};
pub use shutdown::shutdown_sequence;
pub use single::run_single_sweep;

use crate::error::AppResult;
use crate::instrument::{Instrument, ReadField, ScpiCommand};
use anyhow::Context;

/// Write one command, tagging failures with the address and command
pub(crate) async fn send(instr: &mut dyn Instrument, cmd: ScpiCommand) -> AppResult<()> {
    let address = instr.resource_address().to_string();
    instr
        .write(&cmd.to_string())
        .await
        .with_context(|| format!("{} <- {}", address, cmd))?;
    Ok(())
}

/// Trigger a reading and pick one field out of it
pub(crate) async fn read_field(instr: &mut dyn Instrument, field: ReadField) -> AppResult<f64> {
    let address = instr.resource_address().to_string();
    let value = instr
        .query_field(&ScpiCommand::Read.to_string(), field)
        .await
        .with_context(|| format!("{} {} ({})", address, ScpiCommand::Read, field))?;
    Ok(value)
}

fn is_cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(CancelToken::is_cancelled)
}
