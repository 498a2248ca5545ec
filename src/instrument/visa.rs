//! VISA-backed instrument for GPIB/USB/Ethernet SMUs
//!
//! VISA I/O is synchronous, so every transaction runs on Tokio's blocking pool
//! with the session behind an `Arc<Mutex<_>>`.

use super::Instrument;
use crate::config::InstrumentSettings;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::CString;
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use visa_rs::prelude::{AccessMode, AsResourceManager, DefaultRM};

struct Session {
    // Closing the resource manager closes its sessions; keep it alive alongside.
    _rm: DefaultRM,
    instr: visa_rs::Instrument,
}

/// SCPI instrument reached through the system VISA library
///
/// Supports resource strings like:
/// - "GPIB0::16::INSTR" (GPIB interface)
/// - "USB0::0x05E6::0x2450::SERIAL::INSTR" (USB)
/// - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
pub struct VisaInstrument {
    resource: String,
    write_termination: String,
    read_termination: u8,
    session: Arc<Mutex<Session>>,
}

impl VisaInstrument {
    /// Open a session on `settings.resource`
    pub async fn open(settings: &InstrumentSettings) -> Result<Self> {
        let resource = settings.resource.clone();
        let timeout = settings.open_timeout();
        let read_termination = settings
            .read_termination
            .as_bytes()
            .last()
            .copied()
            .unwrap_or(b'\n');

        let address = resource.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&address, timeout))
            .await
            .context("VISA open task panicked")??;

        info!("Opened VISA resource '{}'", resource);
        Ok(Self {
            resource,
            write_termination: settings.write_termination.clone(),
            read_termination,
            session: Arc::new(Mutex::new(session)),
        })
    }

    async fn transact(&self, cmd: &str, expect_response: bool) -> Result<String> {
        let payload = format!("{}{}", cmd, self.write_termination);
        let command = cmd.to_string();
        let terminator = self.read_termination;
        let session = self.session.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = session.blocking_lock();
            guard
                .instr
                .write_all(payload.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command))?;

            if !expect_response {
                return Ok(String::new());
            }

            let mut raw = Vec::new();
            BufReader::new(&guard.instr)
                .read_until(terminator, &mut raw)
                .with_context(|| format!("VISA read failed for: {}", command))?;
            if raw.is_empty() {
                return Err(anyhow!("No response to '{}'", command));
            }
            Ok(String::from_utf8_lossy(&raw).trim().to_string())
        })
        .await
        .context("VISA I/O task panicked")?
    }
}

/// VISA expression matching every device resource
pub const ALL_INSTRUMENTS: &str = "?*INSTR";

/// Resource strings the VISA library can see that match `expr`
///
/// Use it to find the GPIB addresses to put in the configuration file.
pub async fn list_resources(expr: &str) -> Result<Vec<String>> {
    let expr = expr.to_string();
    tokio::task::spawn_blocking(move || {
        let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
        find_resources(&rm, &expr)
    })
    .await
    .context("VISA discovery task panicked")?
}

fn find_resources(rm: &DefaultRM, expr: &str) -> Result<Vec<String>> {
    let query =
        CString::new(expr).with_context(|| format!("Invalid VISA search expression: {}", expr))?;
    let mut list = rm
        .find_res_list(&query.into())
        .with_context(|| format!("VISA resource search failed for: {}", expr))?;

    let mut found = Vec::new();
    while let Some(res) = list.find_next().context("VISA resource search failed")? {
        found.push(res.to_string_lossy().into_owned());
    }
    Ok(found)
}

fn open_session(resource: &str, timeout: Duration) -> Result<Session> {
    let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
    match find_resources(&rm, ALL_INSTRUMENTS) {
        Ok(found) => debug!("VISA resources visible: {:?}", found),
        Err(e) => debug!("Could not list VISA resources: {:#}", e),
    }
    let name = CString::new(resource)
        .with_context(|| format!("Invalid VISA resource string: {}", resource))?;
    let instr = rm
        .open(&name.into(), AccessMode::NO_LOCK, timeout)
        .with_context(|| format!("Failed to open VISA resource: {}", resource))?;
    Ok(Session { _rm: rm, instr })
}

#[async_trait]
impl Instrument for VisaInstrument {
    fn resource_address(&self) -> &str {
        &self.resource
    }

    async fn write(&mut self, cmd: &str) -> Result<()> {
        self.transact(cmd, false).await?;
        debug!("VISA write {} <- {}", self.resource, cmd);
        Ok(())
    }

    async fn query(&mut self, cmd: &str) -> Result<String> {
        let response = self.transact(cmd, true).await?;
        debug!("VISA query {} '{}' -> '{}'", self.resource, cmd, response);
        Ok(response)
    }
}
