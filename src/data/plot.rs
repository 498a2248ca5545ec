//! Diagnostic plot of a finished sweep, rendered to SVG.

use crate::error::{AppResult, SweepError};
use crate::measurement::{SweepKind, SweepResult};
use plotters::prelude::*;
use std::path::Path;
use tracing::info;

/// Lower edge of the log current axis (A)
pub const LOG_FLOOR: f64 = 1e-10;
/// Upper edge of the log current axis (A)
pub const LOG_CEILING: f64 = 1e-1;

const SIZE: (u32, u32) = (800, 600);
const TITLE: &str = "Voltage Sweep (Log Scale)";

fn plot_error(e: impl std::fmt::Display) -> SweepError {
    SweepError::Plot(e.to_string())
}

fn voltage_range(voltages: &[f64]) -> std::ops::Range<f64> {
    let (lo, hi) = voltages
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return 0.0..1.0;
    }
    if lo == hi {
        return (lo - 1.0)..(hi + 1.0);
    }
    lo..hi
}

/// Render |I| against V to `path` as SVG
///
/// I-V sweeps plot the primary current on a log axis clamped to
/// [`LOG_FLOOR`]..[`LOG_CEILING`]. P-V sweeps plot the secondary current on a
/// linear axis, with both resource addresses in the axis labels.
pub fn render_plot(result: &SweepResult, path: &Path) -> AppResult<()> {
    if result.is_empty() {
        return Err(SweepError::Plot("nothing to plot: sweep has no points".to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match result.kind() {
        SweepKind::IvSweep => render_iv(result, path)?,
        SweepKind::PvSweep => render_pv(result, path)?,
    }
    info!("Plot written to '{}'", path.display());
    Ok(())
}

fn render_iv(result: &SweepResult, path: &Path) -> AppResult<()> {
    let voltages = result.voltages();
    let series: Vec<(f64, f64)> = result
        .points()
        .iter()
        .map(|p| (p.voltage, p.current.abs().clamp(LOG_FLOOR, LOG_CEILING)))
        .collect();

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(TITLE, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(voltage_range(&voltages), (LOG_FLOOR..LOG_CEILING).log_scale())
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc("Voltage (V)")
        .y_desc("Current (A)")
        .y_label_formatter(&|y| format!("{:.0e}", y))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(series, &BLUE))
        .map_err(plot_error)?
        .label("I-V Curve")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

fn render_pv(result: &SweepResult, path: &Path) -> AppResult<()> {
    let voltages = result.voltages();
    let series: Vec<(f64, f64)> = result
        .points()
        .iter()
        .filter_map(|p| p.secondary.map(|s| (p.voltage, s.current.abs())))
        .collect();
    let y_max = series
        .iter()
        .map(|&(_, i)| i)
        .fold(0.0_f64, f64::max)
        .max(1e-12);

    let primary = result.primary_address();
    let secondary = result.secondary_address().unwrap_or("secondary");

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(TITLE, ("sans-serif", 20))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(voltage_range(&voltages), 0.0..(y_max * 1.1))
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc(format!("Voltage (V) ({})", primary))
        .y_desc(format!("Current (A) ({})", secondary))
        .y_label_formatter(&|y| format!("{:.1e}", y))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(series, &BLUE))
        .map_err(plot_error)?
        .label(format!("V-I Curve ({} vs. {})", primary, secondary))
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}
