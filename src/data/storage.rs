//! Sweep file writers with clean feature flag handling.
//!
//! The tab-separated text format is the primary output and is always
//! available. CSV export sits behind the `storage_csv` feature.

use crate::error::{AppResult, SweepError};
use crate::measurement::{SamplePoint, SecondarySample, SweepKind, SweepResult};
use crate::metadata::{Metadata, MetadataBuilder};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const PROJECT_PREFIX: &str = "*! Project = ";
const CONDITION_PREFIX: &str = "#! Fluence / Dose / Condition = ";
const TYPE_PREFIX: &str = "#! Type = ";

/// Format like C's `%.6e`: six decimals and a signed exponent of at least two
/// digits (`1.500000e-03`)
pub fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let rendered = format!("{:.6e}", value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => rendered,
    }
}

/// Writes a finished sweep to disk
pub trait SweepWriter {
    /// File extension, without the dot
    fn extension(&self) -> &'static str;

    /// Serialise `result` to `writer`
    fn write_to(&self, writer: &mut dyn Write, result: &SweepResult, metadata: &Metadata) -> io::Result<()>;

    /// Write `<dir>/<base_name>.<ext>`, creating `dir` when missing
    fn write_file(
        &self,
        dir: &Path,
        base_name: &str,
        result: &SweepResult,
        metadata: &Metadata,
    ) -> AppResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.{}", base_name, self.extension()));

        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_to(&mut writer, result, metadata)?;
        writer.flush()?;

        info!("Saved {} points to '{}'", result.len(), path.display());
        Ok(path)
    }
}

/// Tab-separated text with a `*!`/`#!` preamble
#[derive(Debug, Default, Clone, Copy)]
pub struct TextSweepWriter;

impl TextSweepWriter {
    /// Create the writer
    pub fn new() -> Self {
        Self
    }
}

impl SweepWriter for TextSweepWriter {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn write_to(&self, w: &mut dyn Write, result: &SweepResult, metadata: &Metadata) -> io::Result<()> {
        writeln!(w, "*! {}", metadata.banner)?;
        writeln!(w, "{}{}", PROJECT_PREFIX, metadata.project)?;
        writeln!(w, "{}{}", CONDITION_PREFIX, metadata.condition)?;
        writeln!(w, "{}{}", TYPE_PREFIX, result.kind())?;
        writeln!(w)?;

        match result.kind() {
            SweepKind::IvSweep => writeln!(w, "t\t\tV\t\tI\t\tP")?,
            SweepKind::PvSweep => writeln!(w, "t\t\tV\t\tI\t\tP\t\tV1\t\tI1\t\tP1\t\tP2")?,
        }

        for point in result.points() {
            write!(
                w,
                "{:.6}\t{:.2}\t{}\t{}",
                point.elapsed.as_secs_f64(),
                point.voltage,
                format_scientific(point.current),
                format_scientific(point.power)
            )?;
            if result.kind() == SweepKind::PvSweep {
                let s = point.secondary.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "pv-sweep point without secondary readings")
                })?;
                write!(
                    w,
                    "\t{:.2}\t{}\t{}\t{}",
                    s.voltage,
                    format_scientific(s.current),
                    format_scientific(s.power),
                    format_scientific(s.cross_power)
                )?;
            }
            writeln!(w)?;
        }
        Ok(())
    }
}

/// A sweep file read back from disk
#[derive(Debug, Clone)]
pub struct SweepFile {
    /// Preamble fields
    pub metadata: Metadata,
    /// The recorded series
    pub result: SweepResult,
}

fn invalid(line: usize, msg: impl std::fmt::Display) -> SweepError {
    SweepError::Persistence(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line {}: {}", line, msg),
    ))
}

/// Parse a file produced by [`TextSweepWriter`]
pub fn read_sweep_file(path: impl AsRef<Path>) -> AppResult<SweepFile> {
    let reader = BufReader::new(File::open(path.as_ref())?);

    let mut builder = MetadataBuilder::new();
    let mut kind = None;
    let mut header_seen = false;
    let mut points = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let number = index + 1;

        if let Some(project) = line.strip_prefix(PROJECT_PREFIX) {
            builder = builder.project(project);
        } else if let Some(condition) = line.strip_prefix(CONDITION_PREFIX) {
            builder = builder.condition(condition);
        } else if let Some(tag) = line.strip_prefix(TYPE_PREFIX) {
            kind = Some(tag.parse::<SweepKind>().map_err(|e| invalid(number, e))?);
        } else if let Some(banner) = line.strip_prefix("*! ") {
            builder = builder.banner(banner);
        } else if line.trim().is_empty() || line.starts_with("*!") || line.starts_with("#!") {
            continue;
        } else if !header_seen {
            if !line.starts_with('t') {
                return Err(invalid(number, format!("expected column header, found '{}'", line)));
            }
            header_seen = true;
        } else {
            let kind = kind.ok_or_else(|| invalid(number, "data before '#! Type' line"))?;
            points.push(parse_row(&line, kind).map_err(|e| invalid(number, e))?);
        }
    }

    let kind = kind.ok_or_else(|| invalid(0, "missing '#! Type' line"))?;
    Ok(SweepFile {
        metadata: builder.build(),
        result: SweepResult::from_points(kind, points),
    })
}

fn parse_row(line: &str, kind: SweepKind) -> Result<SamplePoint, String> {
    let values = line
        .split('\t')
        .filter(|field| !field.is_empty())
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("bad value '{}': {}", field, e))
        })
        .collect::<Result<Vec<f64>, String>>()?;

    let expected = match kind {
        SweepKind::IvSweep => 4,
        SweepKind::PvSweep => 8,
    };
    if values.len() != expected {
        return Err(format!("expected {} columns, found {}", expected, values.len()));
    }
    if !(values[0].is_finite() && values[0] >= 0.0) {
        return Err(format!("bad time value {}", values[0]));
    }

    let mut point = SamplePoint {
        elapsed: Duration::from_secs_f64(values[0]),
        voltage: values[1],
        current: values[2],
        power: values[3],
        secondary: None,
    };
    if kind == SweepKind::PvSweep {
        point.secondary = Some(SecondarySample {
            voltage: values[4],
            current: values[5],
            power: values[6],
            cross_power: values[7],
        });
    }
    Ok(point)
}

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;

    /// CSV export with the metadata embedded as `# `-prefixed JSON
    #[derive(Debug, Default, Clone, Copy)]
    pub struct CsvSweepWriter;

    impl CsvSweepWriter {
        /// Create the writer
        pub fn new() -> Self {
            Self
        }
    }

    fn to_io(e: impl std::error::Error + Send + Sync + 'static) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }

    impl SweepWriter for CsvSweepWriter {
        fn extension(&self) -> &'static str {
            "csv"
        }

        fn write_to(&self, w: &mut dyn Write, result: &SweepResult, metadata: &Metadata) -> io::Result<()> {
            let json_string = serde_json::to_string_pretty(metadata).map_err(to_io)?;
            for line in json_string.lines() {
                writeln!(w, "# {}", line)?;
            }

            let dual = result.kind() == SweepKind::PvSweep;
            let mut writer = csv::Writer::from_writer(w);
            let mut header = vec!["t_s", "voltage_v", "current_a", "power_w"];
            if dual {
                header.extend(["secondary_voltage_v", "secondary_current_a", "secondary_power_w", "cross_power_w"]);
            }
            writer.write_record(&header).map_err(to_io)?;

            for point in result.points() {
                let mut record = vec![
                    point.elapsed.as_secs_f64().to_string(),
                    point.voltage.to_string(),
                    point.current.to_string(),
                    point.power.to_string(),
                ];
                if let Some(s) = point.secondary.filter(|_| dual) {
                    record.extend([
                        s.voltage.to_string(),
                        s.current.to_string(),
                        s.power.to_string(),
                        s.cross_power.to_string(),
                    ]);
                }
                writer.write_record(&record).map_err(to_io)?;
            }
            writer.flush()
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvSweepWriter;
