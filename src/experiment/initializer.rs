//! Instrument initialisation
//!
//! Brings one SMU into a known state: identified, reset, sourcing 0 V in
//! voltage mode, sensing current only with auto-range and the given
//! compliance. Output is left off.

use super::send;
use crate::error::AppResult;
use crate::instrument::{Instrument, ScpiCommand};
use anyhow::Context;
use tracing::info;

/// Identify and configure `instr`; returns the `*IDN?` response
///
/// Command order: `*IDN?`, reset, `:SOUR:FUNC VOLT`, `:SOUR:VOLT 0`,
/// `:SENS:CURR:PROT <compliance>`, `:SENS:CURR:RANG:AUTO ON`,
/// `:SENS:FUNC "CURR"`. Transport errors are returned unchanged.
pub async fn initialize_instrument(instr: &mut dyn Instrument, compliance: f64) -> AppResult<String> {
    let address = instr.resource_address().to_string();

    let idn = instr
        .identify()
        .await
        .with_context(|| format!("{} {}", address, ScpiCommand::Identify))?;
    info!("Instrument at {}: {}", address, idn);

    instr
        .configure(&ScpiCommand::Reset.to_string())
        .await
        .with_context(|| format!("{} <- {}", address, ScpiCommand::Reset))?;

    for cmd in [
        ScpiCommand::SourceFunctionVoltage,
        ScpiCommand::SourceVoltage(0.0),
        ScpiCommand::CurrentCompliance(compliance),
        ScpiCommand::CurrentAutoRange,
        ScpiCommand::SenseFunctionCurrent,
    ] {
        send(instr, cmd).await?;
    }

    info!(
        "Initialized {} with {} A compliance",
        address, compliance
    );
    Ok(idn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SweepError;
    use crate::instrument::SimulatedSourceMeter;

    #[tokio::test]
    async fn test_initialization_sequence() {
        let mut smu = SimulatedSourceMeter::new("GPIB0::16::INSTR");
        let idn = initialize_instrument(&mut smu, 0.35).await.unwrap();

        assert!(idn.contains("MODEL 2400"));
        assert_eq!(
            smu.commands(),
            [
                "*IDN?",
                "*rst; status:preset;",
                ":SOUR:FUNC VOLT",
                ":SOUR:VOLT 0",
                ":SENS:CURR:PROT 0.35",
                ":SENS:CURR:RANG:AUTO ON",
                ":SENS:FUNC \"CURR\"",
            ]
        );
        let state = smu.state();
        assert!(!state.output_on);
        assert_eq!(state.compliance, 0.35);
        assert!(state.auto_range && state.sense_current);
    }

    #[tokio::test]
    async fn test_transport_error_stops_initialization() {
        let mut smu = SimulatedSourceMeter::new("GPIB0::16::INSTR").fail_on(":SENS:CURR:PROT", 0);
        let err = initialize_instrument(&mut smu, 0.1).await.unwrap_err();

        assert!(matches!(err, SweepError::Transport(_)));
        assert!(err.to_string().contains("GPIB0::16::INSTR <- :SENS:CURR:PROT 0.1"));
        assert_eq!(smu.commands().last().map(String::as_str), Some(":SENS:CURR:PROT 0.1"));
    }
}
