//! Device capability interface and polling tasks.
//!
//! Each physical endpoint is one [`Device`]: it knows how to run a
//! single poll cycle and, for actuators, how to change state. The
//! polling loop itself lives here in [`spawn_polling_task`], shared by
//! all variants: poll, stamp the update time on success, sleep the
//! configured interval, repeat until the cancellation token fires.
//!
//! A poll failure is logged and retried next cycle; it never escapes
//! the polling task. Restart decisions belong to the watchdog (and are
//! currently policy-disabled, see [`crate::manager`]).

pub mod modbus;
pub mod relay;

pub use modbus::ModbusDevice;
pub use relay::RelayDevice;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sitekeeper_core::{DeviceKind, DevicePath};
use sitekeeper_transport::TransportError;

/// Upper bound on any single device I/O operation.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised by one poll cycle or actuation request.
#[derive(Debug, Error)]
pub enum PollError {
    /// Connect/read/write to the endpoint failed
    #[error("i/o failure: {0}")]
    Io(String),

    /// The endpoint did not answer within [`IO_TIMEOUT`]
    #[error("i/o timeout")]
    Timeout,

    /// The endpoint answered with something unusable
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Publishing the reading to the server failed
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// State change requested on a device that cannot actuate
    #[error("device is not an actuator")]
    NotAnActuator,
}

/// Last-successful-poll timestamp.
///
/// Single writer (the device's own polling task), multiple readers
/// (the watchdog sweep). `None` until the first successful cycle.
#[derive(Debug, Default)]
pub struct UpdateStamp(RwLock<Option<DateTime<Utc>>>);

impl UpdateStamp {
    /// Creates an unmarked stamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful poll at `now`.
    pub fn mark(&self, now: DateTime<Utc>) {
        if let Ok(mut stamp) = self.0.write() {
            *stamp = Some(now);
        }
    }

    /// Returns the last recorded poll time, if any.
    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.0.read().ok().and_then(|stamp| *stamp)
    }

    /// Returns true if the stamp is unset or older than `horizon`.
    pub fn is_stale(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> bool {
        match self.get() {
            None => true,
            Some(last) => now - last > horizon,
        }
    }
}

/// Capability interface for one physical endpoint.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identifier; never empty.
    fn server_path(&self) -> &DevicePath;

    /// Which variant this device is.
    fn kind(&self) -> DeviceKind;

    /// Seconds between poll cycles.
    fn polling_interval(&self) -> Duration;

    /// Last-successful-poll timestamp, written only by the device's
    /// own polling task.
    fn update_stamp(&self) -> &UpdateStamp;

    /// Runs one poll cycle: connect/read from the endpoint and publish
    /// the readings. Success means no I/O error occurred.
    async fn poll(&self) -> Result<(), PollError>;

    /// Requests the endpoint move to a discrete state (relay 0/1).
    ///
    /// Takes effect asynchronously relative to the poll cycle. Errors
    /// are recoverable I/O failures, never process-fatal.
    async fn set_state(&self, value: u16) -> Result<(), PollError> {
        let _ = value;
        Err(PollError::NotAnActuator)
    }
}

/// Spawns the unbounded polling loop for one device.
///
/// The first poll runs immediately after spawn. The loop only exits
/// via the cancellation token, which the task checks between cycles;
/// a replacement task may only be spawned after this one's confirmed
/// exit, never speculatively.
pub fn spawn_polling_task(
    device: Arc<dyn Device>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let interval = device.polling_interval();

        info!(
            path = %device.server_path(),
            kind = %device.kind(),
            interval_secs = interval.as_secs(),
            "Device polling started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!(path = %device.server_path(), "Device polling shutting down");
                    break;
                }

                result = device.poll() => {
                    match result {
                        Ok(()) => device.update_stamp().mark(Utc::now()),
                        Err(e) => {
                            // Retried next cycle; the task stays alive
                            warn!(
                                path = %device.server_path(),
                                error = %e,
                                "Poll cycle failed"
                            );
                        }
                    }
                }
            }

            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!(path = %device.server_path(), "Device polling shutting down");
                    break;
                }

                _ = tokio::time::sleep(interval) => {}
            }
        }

        debug!(path = %device.server_path(), "Device polling task completed");
    })
}
