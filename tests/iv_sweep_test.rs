//! End-to-end I-V sweep against the simulated SMU.

use smu_sweep::config::Settings;
use smu_sweep::data::{read_sweep_file, SweepWriter, TextSweepWriter};
use smu_sweep::experiment::{initialize_instrument, run_single_sweep, Progress, SweepConfig};
use smu_sweep::instrument::{LoadModel, SimulatedSourceMeter};
use smu_sweep::measurement::SweepKind;
use smu_sweep::metadata::Metadata;
use smu_sweep::session::MeasurementSession;

fn bench_smu() -> SimulatedSourceMeter {
    SimulatedSourceMeter::new("GPIB0::16::INSTR").with_load(LoadModel::Diode {
        saturation_current: 1e-12,
        ideality: 1.5,
    })
}

#[tokio::test(start_paused = true)]
async fn test_bench_iv_sweep() {
    let mut smu = bench_smu();
    let config = SweepConfig::new(-2.0, 2.0, 0.1, 0.1);
    initialize_instrument(&mut smu, config.compliance).await.unwrap();
    smu.clear_log();

    let mut progress: Vec<Progress> = Vec::new();
    let result = run_single_sweep(&mut smu, &config, &mut progress, None)
        .await
        .unwrap();

    assert_eq!(result.len(), 41);
    assert_eq!(result.points()[0].voltage, -2.0);
    assert!((result.points()[40].voltage - 2.0).abs() < 1e-9);
    for pair in result.points().windows(2) {
        assert!(pair[1].elapsed >= pair[0].elapsed);
    }
    for point in result.points() {
        assert_eq!(point.power, point.voltage * point.current);
        assert!(point.current.abs() <= config.compliance);
    }

    let voltages: Vec<f64> = progress.iter().map(|p| p.voltage).collect();
    assert_eq!(voltages, vec![-2.0, -1.0, 0.0, 1.0, 2.0]);

    let commands = smu.commands();
    assert_eq!(commands.first().map(String::as_str), Some(":OUTP ON"));
    assert_eq!(&commands[commands.len() - 2..], [":SOUR:VOLT 0", ":OUTP OFF"]);
    // one setpoint and one reading per point
    assert_eq!(commands.iter().filter(|c| *c == ":READ?").count(), 41);
    assert!(!smu.state().output_on);
}

#[tokio::test(start_paused = true)]
async fn test_persisted_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut smu = bench_smu();
    let config = SweepConfig::new(-2.0, 2.0, 0.1, 0.1);
    let result = run_single_sweep(&mut smu, &config, &mut (), None)
        .await
        .unwrap();

    let path = TextSweepWriter
        .write_file(dir.path(), "diode", &result, &Metadata::default())
        .unwrap();
    let saved = read_sweep_file(&path).unwrap();

    assert_eq!(saved.result.kind(), SweepKind::IvSweep);
    assert_eq!(saved.result.len(), result.len());
    for (read, original) in saved.result.points().iter().zip(result.points()) {
        assert!((read.voltage - original.voltage).abs() <= 0.005 + 1e-12);
        assert!((read.elapsed.as_secs_f64() - original.elapsed.as_secs_f64()).abs() < 1e-6);
        for (a, b) in [(read.current, original.current), (read.power, original.power)] {
            assert!((a - b).abs() <= b.abs() * 1e-6, "{} vs {}", a, b);
        }
    }
}

/// `product` matches `power` once both sides carry the file's rounding:
/// seven significant digits on currents and powers, two decimals on voltages.
fn assert_power_consistent(power: f64, voltage: f64, current: f64) {
    let tolerance = power.abs() * 2e-6 + current.abs() * 0.005 + 1e-300;
    assert!(
        (power - voltage * current).abs() <= tolerance,
        "P = {:e} but V * I = {} * {:e}",
        power,
        voltage,
        current
    );
}

#[tokio::test(start_paused = true)]
async fn test_file_power_matches_file_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut smu = bench_smu();
    let config = SweepConfig::new(-2.0, 2.0, 0.1, 0.1);
    initialize_instrument(&mut smu, config.compliance).await.unwrap();
    let result = run_single_sweep(&mut smu, &config, &mut (), None)
        .await
        .unwrap();

    let path = TextSweepWriter
        .write_file(dir.path(), "diode_power", &result, &Metadata::default())
        .unwrap();

    // straight from the text, without going through the reader
    let text = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<Vec<f64>> = text
        .lines()
        .skip(6)
        .map(|row| row.split('\t').map(|field| field.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 41);
    for row in &rows {
        assert_eq!(row.len(), 4);
        assert_power_consistent(row[3], row[1], row[2]);
    }
    assert!(rows.iter().any(|row| row[3] != 0.0));

    let saved = read_sweep_file(&path).unwrap();
    for point in saved.result.points() {
        assert_power_consistent(point.power, point.voltage, point.current);
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_writes_data_and_plot() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.output_dir = dir.path().join("runs");

    let session = MeasurementSession::new(settings);
    let mut smu = bench_smu();
    let result = session.run_iv(&mut smu, &mut (), None).await.unwrap();
    let output = session.persist(&result, "diode").unwrap();

    let text = std::fs::read_to_string(&output.data_file).unwrap();
    assert!(text.contains("#! Type = iv-sweep"));
    assert_eq!(text.lines().count(), 6 + 41);
    assert!(output.plot_file.unwrap().exists());
}
