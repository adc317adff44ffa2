//! Device registry, polling-task launcher and watchdog sweep.
//!
//! The registry is populated once from the configuration table and is
//! read-only afterwards; each device's update stamp is the only state
//! its polling task writes. The watchdog sweep reads those stamps and
//! emits the daemon's sole liveness signal (a `watchdog` message) only
//! when every device has updated recently.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sitekeeper_core::{DeviceKind, DevicePath};
use sitekeeper_transport::{Controller, TransportResult};

use crate::config::{ConfigError, DeviceRow};
use crate::devices::{spawn_polling_task, Device, ModbusDevice, RelayDevice};

/// Seconds after `run()` before staleness checks begin; gives devices
/// time to complete a first poll.
pub const STARTUP_GRACE_SECS: i64 = 30;

/// A device is stale when its last update is older than this.
pub const STALENESS_HORIZON_SECS: i64 = 600;

/// Registry of devices plus their polling tasks.
pub struct DeviceManager {
    controller: Arc<dyn Controller>,
    devices: Vec<Arc<dyn Device>>,
    diagnostic_mode: bool,
    start_time: RwLock<Option<DateTime<Utc>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl DeviceManager {
    /// Creates an empty registry writing through `controller`.
    pub fn new(controller: Arc<dyn Controller>, diagnostic_mode: bool) -> Self {
        Self {
            controller,
            devices: Vec::new(),
            diagnostic_mode,
            start_time: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Populates the registry from the configuration table.
    ///
    /// Disabled rows are skipped silently. Rows that fail to construct
    /// (unrecognized type, bad register map, duplicate path) are logged
    /// and skipped; they never leave a partially-built device in the
    /// registry. Registry order is the row order of the rows that
    /// construct successfully.
    pub fn load(&mut self, rows: &[DeviceRow]) {
        for row in rows {
            if !row.enabled {
                continue;
            }
            match self.build_device(row) {
                Ok(device) => self.register(device),
                Err(e) => error!(server_path = %row.server_path, error = %e, "Skipping device row"),
            }
        }
    }

    /// Appends a device, enforcing server-path uniqueness.
    pub fn register(&mut self, device: Arc<dyn Device>) {
        if self.find(device.server_path().as_str()).is_some() {
            error!(
                path = %device.server_path(),
                "Duplicate server path; device row skipped"
            );
            return;
        }
        self.devices.push(device);
    }

    fn build_device(&self, row: &DeviceRow) -> Result<Arc<dyn Device>, ConfigError> {
        if row.server_path.is_empty() {
            return Err(ConfigError::InvalidRow {
                server_path: row.server_path.clone(),
                reason: "empty server path".to_string(),
            });
        }
        if row.polling_interval == 0 {
            return Err(ConfigError::InvalidRow {
                server_path: row.server_path.clone(),
                reason: "polling interval must be positive".to_string(),
            });
        }

        let kind: DeviceKind =
            row.device_type
                .parse()
                .map_err(|e: sitekeeper_core::CoreError| ConfigError::InvalidRow {
                    server_path: row.server_path.clone(),
                    reason: e.to_string(),
                })?;

        let path = DevicePath::new(&row.server_path);
        let interval = Duration::from_secs(row.polling_interval);

        let device: Arc<dyn Device> = match kind {
            DeviceKind::Relay => Arc::new(RelayDevice::new(
                Arc::clone(&self.controller),
                path,
                row.host.clone(),
                row.port,
                interval,
                self.diagnostic_mode,
            )),
            DeviceKind::Modbus => Arc::new(ModbusDevice::new(
                Arc::clone(&self.controller),
                path,
                row.host.clone(),
                row.port,
                &row.settings,
                interval,
                self.diagnostic_mode,
            )?),
        };
        Ok(device)
    }

    /// Launches one polling task per registered device and records the
    /// start time. Call exactly once; a second call would spawn
    /// duplicate pollers.
    pub fn run(&self, cancel_token: &CancellationToken) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for device in &self.devices {
                tasks.push(spawn_polling_task(
                    Arc::clone(device),
                    cancel_token.child_token(),
                ));
            }
        }
        if let Ok(mut start) = self.start_time.write() {
            *start = Some(Utc::now());
        }
        info!(devices = self.devices.len(), "Device polling launched");
    }

    /// Finds the first device with a matching server path.
    pub fn find(&self, server_path: &str) -> Option<Arc<dyn Device>> {
        self.devices
            .iter()
            .find(|device| device.server_path().as_str() == server_path)
            .cloned()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns true when the registry holds no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Sweeps device update stamps and emits the liveness heartbeat.
    ///
    /// No-op during the startup grace period (or before `run()`). Past
    /// the grace period, every device whose stamp is unset or older
    /// than the staleness horizon gets a warning and marks the sweep
    /// unhealthy; a healthy sweep sends one `watchdog` message.
    ///
    /// Restart-on-staleness is deliberately disabled: killing and
    /// respawning a poller was observed to leave duplicates running
    /// against the same device. A replacement may only be spawned
    /// after the prior task's confirmed exit; until that is built, the
    /// watchdog only reports.
    pub async fn watchdog_update(&self, now: DateTime<Utc>) -> TransportResult<()> {
        let start_time = self.start_time.read().ok().and_then(|start| *start);
        let Some(start_time) = start_time else {
            return Ok(());
        };
        if now - start_time <= chrono::Duration::seconds(STARTUP_GRACE_SECS) {
            return Ok(());
        }

        let horizon = chrono::Duration::seconds(STALENESS_HORIZON_SECS);
        let mut devices_ok = true;
        for device in &self.devices {
            if device.update_stamp().is_stale(now, horizon) {
                warn!(
                    path = %device.server_path(),
                    last_update = ?device.update_stamp().get(),
                    "No recent update for device"
                );
                devices_ok = false;
            }
        }

        if devices_ok {
            self.controller.send_message("watchdog", json!({})).await?;
        }
        Ok(())
    }

    /// Awaits the exit of every polling task. Call after cancelling
    /// the token passed to `run()`.
    pub async fn shutdown(&self) {
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Polling task did not exit cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitekeeper_transport::MemoryController;

    fn row(enabled: bool, device_type: &str, server_path: &str) -> DeviceRow {
        DeviceRow {
            enabled,
            device_type: device_type.to_string(),
            settings: if device_type == "modbus" {
                "soc:100".to_string()
            } else {
                String::new()
            },
            server_path: server_path.to_string(),
            host: "127.0.0.1".to_string(),
            port: 502,
            polling_interval: 10,
        }
    }

    fn manager() -> DeviceManager {
        DeviceManager::new(Arc::new(MemoryController::new("sites/test")), false)
    }

    #[tokio::test]
    async fn test_load_skips_disabled_and_unrecognized_rows() {
        let mut manager = manager();
        manager.load(&[
            row(false, "relay", "ohana/generator-relay"),
            row(true, "zigbee", "garage/unknown"),
        ]);

        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_load_builds_devices_in_row_order() {
        let mut manager = manager();
        manager.load(&[
            row(true, "relay", "ohana/generator-relay"),
            row(false, "modbus", "garage/BMU-9"),
            row(true, "modbus", "garage/BMU-1"),
        ]);

        assert_eq!(manager.len(), 2);
        assert!(manager.find("ohana/generator-relay").is_some());
        assert!(manager.find("garage/BMU-1").is_some());
        assert!(manager.find("garage/BMU-9").is_none());
    }

    #[tokio::test]
    async fn test_load_skips_duplicate_server_paths() {
        let mut manager = manager();
        manager.load(&[
            row(true, "relay", "ohana/generator-relay"),
            row(true, "relay", "ohana/generator-relay"),
        ]);

        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_load_skips_zero_polling_interval() {
        let mut manager = manager();
        let mut bad = row(true, "relay", "ohana/generator-relay");
        bad.polling_interval = 0;
        manager.load(&[bad]);

        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_load_skips_bad_modbus_settings() {
        let mut manager = manager();
        let mut bad = row(true, "modbus", "garage/BMU-1");
        bad.settings = "soc:notanumber".to_string();
        manager.load(&[bad]);

        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_find_missing_path_is_none() {
        let manager = manager();
        assert!(manager.find("nowhere/at-all").is_none());
    }

    #[tokio::test]
    async fn test_watchdog_is_noop_before_run() {
        let controller = Arc::new(MemoryController::new("sites/test"));
        let manager = DeviceManager::new(controller.clone(), false);

        manager
            .watchdog_update(Utc::now() + chrono::Duration::hours(1))
            .await
            .expect("watchdog");
        assert_eq!(controller.message_count("watchdog").await, 0);
    }
}
