//! Instrument capability consumed by the sweep engines.
//!
//! The engines never open or close a bus session themselves. They borrow an
//! [`Instrument`] exclusively for the duration of a sweep and hand it back to the
//! caller afterwards; closing the session is the caller's job.
//!
//! Implementations:
//! - [`SimulatedSourceMeter`] - in-process SMU model with a command log
//! - `VisaInstrument` - GPIB/USB/LAN via `visa-rs` (feature `instrument_visa`)

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

pub mod mock;
pub mod scpi;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use mock::{LoadModel, SimulatedSourceMeter};
pub use scpi::{ReadField, ScpiCommand};
#[cfg(feature = "instrument_visa")]
pub use visa::{list_resources, VisaInstrument, ALL_INSTRUMENTS};

/// An addressable SCPI device exposing command-write and query operations.
///
/// Errors returned here are transport errors: they are propagated unchanged by
/// the engines and terminate the sweep.
#[async_trait]
pub trait Instrument: Send {
    /// Resource address this handle was opened on (e.g. `GPIB0::16::INSTR`)
    fn resource_address(&self) -> &str;

    /// Send a command without reading a response
    async fn write(&mut self, cmd: &str) -> Result<()>;

    /// Send a command and return the raw response, terminator stripped
    async fn query(&mut self, cmd: &str) -> Result<String>;

    /// Send a query and parse the comma-separated ASCII response as numbers
    async fn query_values(&mut self, cmd: &str) -> Result<Vec<f64>> {
        let response = self.query(cmd).await?;
        parse_ascii_values(&response)
            .with_context(|| format!("Malformed response to '{}': '{}'", cmd, response.trim()))
    }

    /// Query a single field of a multi-value response
    async fn query_field(&mut self, cmd: &str, field: ReadField) -> Result<f64> {
        let values = self.query_values(cmd).await?;
        values.get(field.index()).copied().ok_or_else(|| {
            anyhow!(
                "Response to '{}' has {} value(s), expected {} at index {}",
                cmd,
                values.len(),
                field,
                field.index()
            )
        })
    }

    /// Query instrument identity (`*IDN?`)
    async fn identify(&mut self) -> Result<String> {
        let idn = self.query(&ScpiCommand::Identify.to_string()).await?;
        Ok(idn.trim().to_string())
    }

    /// Issue a reset command string
    async fn configure(&mut self, reset_command: &str) -> Result<()> {
        self.write(reset_command).await
    }
}

#[async_trait]
impl<T: Instrument + ?Sized> Instrument for Box<T> {
    fn resource_address(&self) -> &str {
        (**self).resource_address()
    }

    async fn write(&mut self, cmd: &str) -> Result<()> {
        (**self).write(cmd).await
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        (**self).query(cmd).await
    }
}

/// Parse `"1.0E+00,-2.5E-03,..."` into numbers.
pub fn parse_ascii_values(response: &str) -> Result<Vec<f64>> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Empty response"));
    }

    trimmed
        .split(',')
        .map(|token| {
            let token = token.trim();
            token
                .parse::<f64>()
                .with_context(|| format!("Failed to parse value '{}'", token))
        })
        .collect()
}
