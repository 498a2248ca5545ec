//! End-to-end P-V sweep with a coupled pair of simulated SMUs.

use smu_sweep::data::{read_sweep_file, SweepWriter, TextSweepWriter};
use smu_sweep::experiment::{
    initialize_instrument, run_dual_sweep, DualSweepConfig, Progress, SweepConfig,
};
use smu_sweep::instrument::{LoadModel, SimulatedSourceMeter};
use smu_sweep::measurement::SweepKind;
use smu_sweep::metadata::MetadataBuilder;
use tokio::sync::mpsc;

fn bench_pair() -> (SimulatedSourceMeter, SimulatedSourceMeter) {
    SimulatedSourceMeter::coupled_pair(
        "GPIB0::16::INSTR",
        "GPIB0::14::INSTR",
        LoadModel::Resistor { ohms: 50.0 },
        0.8,
    )
}

#[tokio::test(start_paused = true)]
async fn test_bench_pv_sweep() {
    let (mut primary, mut secondary) = bench_pair();
    let config = DualSweepConfig::new(SweepConfig::new(0.0, 12.0, 0.1, 0.35), 0.0, 0.1);
    initialize_instrument(&mut primary, config.sweep.compliance).await.unwrap();
    initialize_instrument(&mut secondary, config.secondary_compliance).await.unwrap();

    let (mut tx, mut rx) = mpsc::unbounded_channel::<Progress>();
    let result = run_dual_sweep(&mut primary, &mut secondary, &config, &mut tx, None)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(result.len(), 121);
    assert_eq!(result.kind(), SweepKind::PvSweep);
    for point in result.points() {
        let s = point.secondary.unwrap();
        // static bias on the secondary
        assert_eq!(s.voltage, 0.0);
        assert_eq!(s.cross_power, point.voltage * s.current);
        assert!(s.current.abs() <= config.secondary_compliance);
    }

    let mut reported = Vec::new();
    while let Some(progress) = rx.recv().await {
        reported.push(progress.voltage);
    }
    assert_eq!(reported.len(), 13);
    assert_eq!(reported.first(), Some(&0.0));

    for smu in [&primary, &secondary] {
        let commands = smu.commands();
        assert_eq!(&commands[commands.len() - 2..], [":SOUR:VOLT 0", ":OUTP OFF"]);
        assert!(!smu.state().output_on);
    }
}

#[tokio::test(start_paused = true)]
async fn test_pv_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let (mut primary, mut secondary) = bench_pair();
    let config = DualSweepConfig::new(SweepConfig::new(0.0, 1.0, 0.1, 0.35), 0.0, 0.1);
    let result = run_dual_sweep(&mut primary, &mut secondary, &config, &mut (), None)
        .await
        .unwrap();

    let metadata = MetadataBuilder::new()
        .project("Photodiode response")
        .condition("dark, 295 K")
        .build();
    let path = TextSweepWriter
        .write_file(dir.path(), "pv", &result, &metadata)
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[1], "*! Project = Photodiode response");
    assert_eq!(lines[2], "#! Fluence / Dose / Condition = dark, 295 K");
    assert_eq!(lines[3], "#! Type = pv-sweep");
    assert_eq!(lines[5], "t\t\tV\t\tI\t\tP\t\tV1\t\tI1\t\tP1\t\tP2");
    assert_eq!(lines.len(), 6 + 11);
    assert!(lines[6..].iter().all(|row| row.split('\t').count() == 8));

    let saved = read_sweep_file(&path).unwrap();
    assert_eq!(saved.metadata.condition, "dark, 295 K");
    assert_eq!(saved.result.secondary_currents().len(), 11);
}

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
async fn test_pv_file_powers_match_file_columns() {
    let dir = tempfile::tempdir().unwrap();
    let (mut primary, mut secondary) = bench_pair();
    // a non-zero bias so P1 is not trivially zero
    let config = DualSweepConfig::new(SweepConfig::new(0.0, 2.0, 0.1, 0.35), 0.5, 0.1);
    initialize_instrument(&mut primary, config.sweep.compliance).await.unwrap();
    initialize_instrument(&mut secondary, config.secondary_compliance).await.unwrap();
    let result = run_dual_sweep(&mut primary, &mut secondary, &config, &mut (), None)
        .await
        .unwrap();

    let path = TextSweepWriter
        .write_file(dir.path(), "pv_power", &result, &MetadataBuilder::new().build())
        .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<Vec<f64>> = text
        .lines()
        .skip(6)
        .map(|row| row.split('\t').map(|field| field.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), 21);
    for row in &rows {
        let (v, i, p, v1, i1, p1, p2) = (row[1], row[2], row[3], row[4], row[5], row[6], row[7]);
        assert_power_consistent(p, v, i);
        assert_power_consistent(p1, v1, i1);
        assert_power_consistent(p2, v, i1);
    }
    assert!(rows.iter().all(|row| row[6] != 0.0));
}
