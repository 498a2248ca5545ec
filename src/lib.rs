//! Core library for the smu_sweep application.
//!
//! Voltage sweeps on SCPI source-measure units (Keithley 2400 class) over
//! GPIB/VISA: a single instrument sourcing and measuring (I-V), or a primary
//! sweeping while a statically biased secondary reads the response (P-V).
//! Results are written as tab-separated text with a `*!`/`#!` preamble and
//! plotted to SVG.
//!
//! - [`instrument`]: the `Instrument` capability, SCPI vocabulary, simulator
//!   and VISA backend
//! - [`experiment`]: initialiser, sweep engines, shutdown sequence
//! - [`measurement`]: sample points and recorded series
//! - [`data`]: file writers, reader and plot
//! - [`session`]: a configured run from initialisation to files on disk

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod logging;
pub mod measurement;
pub mod metadata;
pub mod session;

pub use error::{AppResult, SweepError};
