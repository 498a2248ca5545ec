//! Custom error types for the application.
//!
//! This module defines the primary error type, `SweepError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different ways a measurement run can fail.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: Invalid sweep bounds or settings. Always raised before any
//!   instrument is commanded.
//! - **`Transport`**: Wraps the `anyhow::Error` returned by an [`Instrument`] write or
//!   query. These are never caught locally; they abort the sweep (after the shutdown
//!   sequence has been attempted).
//! - **`Persistence`**: File write failures. Surfaced to the caller, the instrument
//!   state is not rolled back.
//! - **`Plot`**: The diagnostic plot could not be rendered.
//! - **`Cancelled`**: The caller's cancel token fired. Shutdown has already run.
//! - **`ShutdownFailed`**: One or more commands of the zero-volt/output-off sequence
//!   failed. `cause` holds the error that ended the stepping loop, if any.
//!
//! [`Instrument`]: crate::instrument::Instrument

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Everything that can end a sweep or a session
#[derive(Error, Debug)]
pub enum SweepError {
    /// Rejected settings, caught before any instrument command
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A write or query failed on the bus
    #[error("Instrument transport error: {0:#}")]
    Transport(#[from] anyhow::Error),

    /// Writing or reading a data file failed
    #[error("Persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// The plot could not be drawn
    #[error("Plot rendering error: {0}")]
    Plot(String),

    /// Stopped by a cancel request
    #[error("Sweep cancelled after {completed} of {total} points")]
    Cancelled {
        /// Points recorded before the stop
        completed: usize,
        /// Points planned
        total: usize,
    },

    /// The outputs could not all be returned to 0 V and switched off
    #[error("Shutdown failed with {} error(s){}", .errors.len(), cause_suffix(.cause))]
    ShutdownFailed {
        /// What ended the sweep, when it did not complete
        cause: Option<Box<SweepError>>,
        /// Every shutdown command that failed
        errors: Vec<SweepError>,
    },
}

fn cause_suffix(cause: &Option<Box<SweepError>>) -> String {
    cause
        .as_ref()
        .map(|c| format!(" after: {c}"))
        .unwrap_or_default()
}

impl SweepError {
    /// The error that ended the sweep, looking through a shutdown failure.
    pub fn root_cause(&self) -> &SweepError {
        match self {
            SweepError::ShutdownFailed {
                cause: Some(cause), ..
            } => cause.root_cause(),
            other => other,
        }
    }

    /// True when the instruments may have been left energised.
    pub fn shutdown_incomplete(&self) -> bool {
        matches!(self, SweepError::ShutdownFailed { .. })
    }
}

impl From<crate::config::ConfigError> for SweepError {
    fn from(err: crate::config::ConfigError) -> Self {
        SweepError::Configuration(err.to_string())
    }
}
