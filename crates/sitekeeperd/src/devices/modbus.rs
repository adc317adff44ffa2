//! Modbus TCP device.
//!
//! The device row's `settings` column carries the register map:
//! `<sequence>:<address>[:holding|:input]` entries separated by `;`,
//! e.g. `soc:100:holding;temp:101:input`. Each poll connects to the
//! controller, reads every mapped register and publishes each value to
//! `<server_path>/<sequence>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::debug;

use sitekeeper_core::{DeviceKind, DevicePath};
use sitekeeper_transport::{Controller, SequenceValue};

use crate::config::ConfigError;

use super::{Device, PollError, UpdateStamp, IO_TIMEOUT};

/// Which register bank an entry reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// Holding register (function 3); the default
    Holding,

    /// Input register (function 4)
    Input,
}

/// One mapped register: where to read and what sequence to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSpec {
    /// Sequence name published under the device path
    pub sequence: String,

    /// Register address
    pub address: u16,

    /// Register bank
    pub kind: RegisterKind,
}

/// Modbus TCP controller (register bank).
pub struct ModbusDevice {
    controller: Arc<dyn Controller>,
    path: DevicePath,
    host: String,
    port: u16,
    registers: Vec<RegisterSpec>,
    polling_interval: Duration,
    diagnostic_mode: bool,
    stamp: UpdateStamp,
}

impl std::fmt::Debug for ModbusDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusDevice")
            .field("path", &self.path)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("registers", &self.registers)
            .field("polling_interval", &self.polling_interval)
            .field("diagnostic_mode", &self.diagnostic_mode)
            .field("stamp", &self.stamp)
            .finish_non_exhaustive()
    }
}

impl ModbusDevice {
    /// Creates a Modbus device, parsing the register map from the
    /// row's settings string.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRow` when the register map is
    /// malformed; the loader skips the row.
    pub fn new(
        controller: Arc<dyn Controller>,
        path: DevicePath,
        host: String,
        port: u16,
        settings: &str,
        polling_interval: Duration,
        diagnostic_mode: bool,
    ) -> Result<Self, ConfigError> {
        let registers =
            parse_register_map(settings).map_err(|reason| ConfigError::InvalidRow {
                server_path: path.to_string(),
                reason,
            })?;

        Ok(Self {
            controller,
            path,
            host,
            port,
            registers,
            polling_interval,
            diagnostic_mode,
            stamp: UpdateStamp::new(),
        })
    }

    async fn resolve(&self) -> Result<std::net::SocketAddr, PollError> {
        let lookup = lookup_host((self.host.as_str(), self.port));
        match timeout(IO_TIMEOUT, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().ok_or_else(|| {
                PollError::Io(format!("no address found for {}", self.host))
            }),
            Ok(Err(e)) => Err(PollError::Io(e.to_string())),
            Err(_) => Err(PollError::Timeout),
        }
    }
}

#[async_trait]
impl Device for ModbusDevice {
    fn server_path(&self) -> &DevicePath {
        &self.path
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Modbus
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    fn update_stamp(&self) -> &UpdateStamp {
        &self.stamp
    }

    async fn poll(&self) -> Result<(), PollError> {
        let addr = self.resolve().await?;
        let mut ctx = match timeout(IO_TIMEOUT, tcp::connect(addr)).await {
            Ok(Ok(ctx)) => ctx,
            Ok(Err(e)) => return Err(PollError::Io(e.to_string())),
            Err(_) => return Err(PollError::Timeout),
        };

        for register in &self.registers {
            let read = async {
                match register.kind {
                    RegisterKind::Holding => {
                        ctx.read_holding_registers(register.address, 1).await
                    }
                    RegisterKind::Input => ctx.read_input_registers(register.address, 1).await,
                }
            };

            let words = match timeout(IO_TIMEOUT, read).await {
                Ok(Ok(Ok(words))) => words,
                // Modbus exception response (illegal address etc.)
                Ok(Ok(Err(exception))) => {
                    return Err(PollError::Protocol(exception.to_string()))
                }
                Ok(Err(e)) => return Err(PollError::Io(e.to_string())),
                Err(_) => return Err(PollError::Timeout),
            };

            let value = words
                .first()
                .copied()
                .ok_or_else(|| PollError::Protocol("empty register response".to_string()))?;

            if self.diagnostic_mode {
                debug!(
                    path = %self.path,
                    sequence = %register.sequence,
                    address = register.address,
                    value,
                    "Modbus register read"
                );
            }

            self.controller
                .update_sequence(
                    &self.path.sequence(&register.sequence),
                    SequenceValue::Number(value as f64),
                )
                .await?;
        }

        let _ = ctx.disconnect().await;
        Ok(())
    }
}

/// Parses the settings column into a register map.
pub fn parse_register_map(settings: &str) -> Result<Vec<RegisterSpec>, String> {
    let mut specs = Vec::new();

    for entry in settings.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = entry.split(':').map(str::trim);

        let sequence = match parts.next() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(format!("missing sequence name in {entry:?}")),
        };

        let address = parts
            .next()
            .ok_or_else(|| format!("missing register address in {entry:?}"))?;
        let address: u16 = address
            .parse()
            .map_err(|_| format!("invalid register address {address:?}"))?;

        let kind = match parts.next() {
            None | Some("holding") => RegisterKind::Holding,
            Some("input") => RegisterKind::Input,
            Some(other) => return Err(format!("unknown register kind {other:?}")),
        };

        if parts.next().is_some() {
            return Err(format!("too many fields in {entry:?}"));
        }

        specs.push(RegisterSpec {
            sequence,
            address,
            kind,
        });
    }

    if specs.is_empty() {
        return Err("no registers configured".to_string());
    }
    Ok(specs)
}
