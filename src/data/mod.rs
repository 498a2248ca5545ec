//! Persistence and visualisation of finished sweeps.

pub mod plot;
pub mod storage;

pub use plot::render_plot;
#[cfg(feature = "storage_csv")]
pub use storage::CsvSweepWriter;
pub use storage::{format_scientific, read_sweep_file, SweepFile, SweepWriter, TextSweepWriter};
