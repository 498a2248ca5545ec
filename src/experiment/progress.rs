//! Per-point telemetry and cooperative cancellation for running sweeps.

use crate::data::format_scientific;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

/// Reading reported while a sweep runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Commanded primary voltage (V)
    pub voltage: f64,
    /// Current of interest at that setpoint (A): the primary's in a single
    /// sweep, the secondary's in a dual sweep
    pub current: f64,
}

impl Progress {
    /// Progress is emitted only at whole-number setpoints
    pub fn is_reportable(voltage: f64) -> bool {
        voltage.trunc() == voltage
    }
}

/// Receiver of progress reports
pub trait ProgressSink: Send {
    /// Called once per reportable point
    fn observe(&mut self, progress: Progress);
}

/// Reports progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn observe(&mut self, progress: Progress) {
        info!(
            "Voltage: {:.2} V, Current: {} A",
            progress.voltage,
            format_scientific(progress.current)
        );
    }
}

impl ProgressSink for Vec<Progress> {
    fn observe(&mut self, progress: Progress) {
        self.push(progress);
    }
}

impl ProgressSink for UnboundedSender<Progress> {
    fn observe(&mut self, progress: Progress) {
        // A dropped receiver only means nobody is watching
        let _ = self.send(progress);
    }
}

impl ProgressSink for () {
    fn observe(&mut self, _progress: Progress) {}
}

/// Shared flag asking a running sweep to stop
///
/// Checked once per point, before the next setpoint is commanded. The engine
/// still runs the shutdown sequence before returning.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next point
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_whole_number_rule() {
        assert!(Progress::is_reportable(-2.0));
        assert!(Progress::is_reportable(0.0));
        assert!(Progress::is_reportable(-2.0 + 10.0 * 0.1));
        assert!(!Progress::is_reportable(-2.0 + 3.0 * 0.1));
        assert!(!Progress::is_reportable(0.5));
    }

    #[traced_test]
    #[test]
    fn test_log_progress_format() {
        LogProgress.observe(Progress {
            voltage: 1.0,
            current: 1.5e-3,
        });
        assert!(logs_contain("Voltage: 1.00 V, Current: 1.500000e-03 A"));
    }

    #[tokio::test]
    async fn test_channel_sink_survives_dropped_receiver() {
        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        tx.observe(Progress {
            voltage: 0.0,
            current: 0.0,
        });
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
