//! Relay device.
//!
//! The relay board speaks a small line protocol over TCP: `status`
//! answers with the contact state (`0` or `1`), `set <0|1>` switches
//! the contact. Each poll reads the contact state and publishes it to
//! `<server_path>/relay-1`; `set_state` writes the endpoint and
//! publishes the new state immediately rather than waiting for the
//! next poll.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use sitekeeper_core::{DeviceKind, DevicePath};
use sitekeeper_transport::{Controller, SequenceValue};

use super::{Device, PollError, UpdateStamp, IO_TIMEOUT};

/// Sequence name the contact state is published under.
const RELAY_SEQUENCE: &str = "relay-1";

/// Switchable relay contact (generator start relay).
pub struct RelayDevice {
    controller: Arc<dyn Controller>,
    path: DevicePath,
    host: String,
    port: u16,
    polling_interval: Duration,
    diagnostic_mode: bool,
    stamp: UpdateStamp,
}

impl RelayDevice {
    /// Creates a relay device; no connection is made until the first
    /// poll or actuation.
    pub fn new(
        controller: Arc<dyn Controller>,
        path: DevicePath,
        host: String,
        port: u16,
        polling_interval: Duration,
        diagnostic_mode: bool,
    ) -> Self {
        Self {
            controller,
            path,
            host,
            port,
            polling_interval,
            diagnostic_mode,
            stamp: UpdateStamp::new(),
        }
    }

    /// Sends one command line and returns the trimmed reply line.
    async fn query(&self, command: &str) -> Result<String, PollError> {
        let exchange = async {
            let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
            stream.write_all(command.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            Ok::<String, std::io::Error>(line)
        };

        match timeout(IO_TIMEOUT, exchange).await {
            Ok(Ok(line)) => Ok(line.trim().to_string()),
            Ok(Err(e)) => Err(PollError::Io(e.to_string())),
            Err(_) => Err(PollError::Timeout),
        }
    }
}

#[async_trait]
impl Device for RelayDevice {
    fn server_path(&self) -> &DevicePath {
        &self.path
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Relay
    }

    fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    fn update_stamp(&self) -> &UpdateStamp {
        &self.stamp
    }

    async fn poll(&self) -> Result<(), PollError> {
        let reply = self.query("status").await?;
        let state = parse_contact_state(&reply)?;

        if self.diagnostic_mode {
            debug!(path = %self.path, state, "Relay poll");
        }

        self.controller
            .update_sequence(
                &self.path.sequence(RELAY_SEQUENCE),
                SequenceValue::Number(state as f64),
            )
            .await?;
        Ok(())
    }

    async fn set_state(&self, value: u16) -> Result<(), PollError> {
        if value > 1 {
            return Err(PollError::Protocol(format!(
                "relay state must be 0 or 1, got {value}"
            )));
        }

        self.query(&format!("set {value}")).await?;
        info!(path = %self.path, state = value, "Relay state set");

        self.controller
            .update_sequence(
                &self.path.sequence(RELAY_SEQUENCE),
                SequenceValue::Number(value as f64),
            )
            .await?;
        Ok(())
    }
}

/// Parses a status reply into a contact state.
fn parse_contact_state(reply: &str) -> Result<u16, PollError> {
    match reply.trim().parse::<u16>() {
        Ok(state @ (0 | 1)) => Ok(state),
        _ => Err(PollError::Protocol(format!(
            "unexpected relay status reply: {reply:?}"
        ))),
    }
}
