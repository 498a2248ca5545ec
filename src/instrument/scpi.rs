//! SCPI command set used by the sweep engines
//!
//! The strings are what a Keithley 2400-series SMU expects; they are reproduced
//! exactly for compatibility with real hardware.

use std::fmt;

/// Commands the engines send to a 2400-series SMU
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScpiCommand {
    /// Restore GPIB defaults and preset the status subsystem
    ///
    /// Command: `*rst; status:preset;`
    Reset,
    /// Source function = voltage
    ///
    /// Command: `:SOUR:FUNC VOLT`
    SourceFunctionVoltage,
    /// Source voltage level in volts
    ///
    /// Command: `:SOUR:VOLT <v>`
    SourceVoltage(f64),
    /// Current compliance limit in amperes
    ///
    /// Command: `:SENS:CURR:PROT <i>`
    CurrentCompliance(f64),
    /// Command: `:SENS:CURR:RANG:AUTO ON`
    CurrentAutoRange,
    /// Measurement function = current only
    ///
    /// Command: `:SENS:FUNC "CURR"`
    SenseFunctionCurrent,
    /// Command: `:OUTP ON` / `:OUTP OFF`
    Output(bool),
    /// Trigger and return one reading
    ///
    /// Command: `:READ?`
    Read,
    /// Command: `*IDN?`
    Identify,
}

impl ScpiCommand {
    /// True for commands that produce a response
    pub fn is_query(&self) -> bool {
        matches!(self, ScpiCommand::Read | ScpiCommand::Identify)
    }
}

impl fmt::Display for ScpiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScpiCommand::Reset => write!(f, "*rst; status:preset;"),
            ScpiCommand::SourceFunctionVoltage => write!(f, ":SOUR:FUNC VOLT"),
            ScpiCommand::SourceVoltage(volts) => write!(f, ":SOUR:VOLT {}", volts),
            ScpiCommand::CurrentCompliance(amps) => write!(f, ":SENS:CURR:PROT {}", amps),
            ScpiCommand::CurrentAutoRange => write!(f, ":SENS:CURR:RANG:AUTO ON"),
            ScpiCommand::SenseFunctionCurrent => write!(f, ":SENS:FUNC \"CURR\""),
            ScpiCommand::Output(on) => write!(f, ":OUTP {}", if *on { "ON" } else { "OFF" }),
            ScpiCommand::Read => write!(f, ":READ?"),
            ScpiCommand::Identify => write!(f, "*IDN?"),
        }
    }
}

/// Position of a value in the `:READ?` response
///
/// A 2400 answers `voltage,current,resistance,timestamp,status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadField {
    /// Measured voltage (V)
    Voltage,
    /// Measured current (A)
    Current,
}

impl ReadField {
    /// Zero-based position in the response
    pub fn index(self) -> usize {
        match self {
            ReadField::Voltage => 0,
            ReadField::Current => 1,
        }
    }
}

impl fmt::Display for ReadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadField::Voltage => f.write_str("voltage"),
            ReadField::Current => f.write_str("current"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_strings() {
        assert_eq!(ScpiCommand::Reset.to_string(), "*rst; status:preset;");
        assert_eq!(ScpiCommand::SourceFunctionVoltage.to_string(), ":SOUR:FUNC VOLT");
        assert_eq!(ScpiCommand::SourceVoltage(0.0).to_string(), ":SOUR:VOLT 0");
        assert_eq!(ScpiCommand::SourceVoltage(-1.9).to_string(), ":SOUR:VOLT -1.9");
        assert_eq!(
            ScpiCommand::CurrentCompliance(0.15).to_string(),
            ":SENS:CURR:PROT 0.15"
        );
        assert_eq!(
            ScpiCommand::CurrentAutoRange.to_string(),
            ":SENS:CURR:RANG:AUTO ON"
        );
        assert_eq!(
            ScpiCommand::SenseFunctionCurrent.to_string(),
            ":SENS:FUNC \"CURR\""
        );
        assert_eq!(ScpiCommand::Output(true).to_string(), ":OUTP ON");
        assert_eq!(ScpiCommand::Output(false).to_string(), ":OUTP OFF");
        assert_eq!(ScpiCommand::Read.to_string(), ":READ?");
    }

    #[test]
    fn test_setpoint_uses_shortest_round_trip() {
        // -2 + 3 * 0.1 is not exactly -1.7
        let v = -2.0 + 3.0 * 0.1;
        let rendered = ScpiCommand::SourceVoltage(v).to_string();
        let parsed: f64 = rendered.trim_start_matches(":SOUR:VOLT ").parse().unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn test_query_classification() {
        assert!(ScpiCommand::Read.is_query());
        assert!(ScpiCommand::Identify.is_query());
        assert!(!ScpiCommand::Output(true).is_query());
    }
}
