//! Watchdog sweep integration tests.
//!
//! Covers the startup grace period, the staleness horizon and the
//! heartbeat gating: the `watchdog` message goes out only when every
//! device has updated recently.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use sitekeeper_core::{DeviceKind, DevicePath};
use sitekeeper_transport::{Controller, MemoryController};
use sitekeeperd::devices::{Device, PollError, UpdateStamp};
use sitekeeperd::manager::DeviceManager;

// ============================================================================
// Test Helpers
// ============================================================================

const STAMP_WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const STAMP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Device whose poll always succeeds immediately.
struct HealthyDevice {
    path: DevicePath,
    stamp: UpdateStamp,
}

impl HealthyDevice {
    fn new(path: &str) -> Self {
        Self {
            path: DevicePath::new(path),
            stamp: UpdateStamp::new(),
        }
    }
}

#[async_trait]
impl Device for HealthyDevice {
    fn server_path(&self) -> &DevicePath {
        &self.path
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Modbus
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn update_stamp(&self) -> &UpdateStamp {
        &self.stamp
    }

    async fn poll(&self) -> Result<(), PollError> {
        Ok(())
    }
}

/// Device whose poll never completes, so its stamp stays unset.
struct SilentDevice {
    path: DevicePath,
    stamp: UpdateStamp,
}

impl SilentDevice {
    fn new(path: &str) -> Self {
        Self {
            path: DevicePath::new(path),
            stamp: UpdateStamp::new(),
        }
    }
}

#[async_trait]
impl Device for SilentDevice {
    fn server_path(&self) -> &DevicePath {
        &self.path
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Modbus
    }

    fn polling_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn update_stamp(&self) -> &UpdateStamp {
        &self.stamp
    }

    async fn poll(&self) -> Result<(), PollError> {
        std::future::pending().await
    }
}

async fn wait_for_stamp(device: &dyn Device) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < STAMP_WAIT_TIMEOUT {
        if device.update_stamp().get().is_some() {
            return;
        }
        sleep(STAMP_POLL_INTERVAL).await;
    }
    panic!("device {} never stamped an update", device.server_path());
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_heartbeat_withheld_during_startup_grace() {
    let controller = Arc::new(MemoryController::new("sites/test"));
    let device = Arc::new(HealthyDevice::new("garage/BMU-1"));

    let mut manager =
        DeviceManager::new(Arc::clone(&controller) as Arc<dyn Controller>, false);
    manager.register(Arc::clone(&device) as Arc<dyn Device>);
    let manager = Arc::new(manager);

    let cancel = CancellationToken::new();
    manager.run(&cancel);
    wait_for_stamp(device.as_ref()).await;

    // Device is instantly fresh, but the grace period still gates
    manager
        .watchdog_update(Utc::now() + chrono::Duration::seconds(10))
        .await
        .expect("watchdog");
    assert_eq!(controller.message_count("watchdog").await, 0);

    cancel.cancel();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_heartbeat_sent_when_all_devices_fresh() {
    let controller = Arc::new(MemoryController::new("sites/test"));
    let device = Arc::new(HealthyDevice::new("garage/BMU-1"));

    let mut manager =
        DeviceManager::new(Arc::clone(&controller) as Arc<dyn Controller>, false);
    manager.register(Arc::clone(&device) as Arc<dyn Device>);
    let manager = Arc::new(manager);

    let cancel = CancellationToken::new();
    manager.run(&cancel);
    wait_for_stamp(device.as_ref()).await;

    manager
        .watchdog_update(Utc::now() + chrono::Duration::seconds(60))
        .await
        .expect("watchdog");
    assert_eq!(controller.message_count("watchdog").await, 1);

    cancel.cancel();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_stale_device_withholds_heartbeat() {
    let controller = Arc::new(MemoryController::new("sites/test"));
    let device = Arc::new(HealthyDevice::new("garage/BMU-1"));

    let mut manager =
        DeviceManager::new(Arc::clone(&controller) as Arc<dyn Controller>, false);
    manager.register(Arc::clone(&device) as Arc<dyn Device>);
    let manager = Arc::new(manager);

    let cancel = CancellationToken::new();
    manager.run(&cancel);
    wait_for_stamp(device.as_ref()).await;

    // Twenty minutes later the last update is past the 10-minute horizon
    manager
        .watchdog_update(Utc::now() + chrono::Duration::minutes(20))
        .await
        .expect("watchdog");
    assert_eq!(controller.message_count("watchdog").await, 0);

    cancel.cancel();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_never_polled_device_withholds_heartbeat() {
    let controller = Arc::new(MemoryController::new("sites/test"));
    let healthy = Arc::new(HealthyDevice::new("garage/BMU-1"));
    let silent = Arc::new(SilentDevice::new("garage/BMU-2"));

    let mut manager =
        DeviceManager::new(Arc::clone(&controller) as Arc<dyn Controller>, false);
    manager.register(Arc::clone(&healthy) as Arc<dyn Device>);
    manager.register(Arc::clone(&silent) as Arc<dyn Device>);
    let manager = Arc::new(manager);

    let cancel = CancellationToken::new();
    manager.run(&cancel);
    wait_for_stamp(healthy.as_ref()).await;

    // One device healthy, one never heard from: no heartbeat
    manager
        .watchdog_update(Utc::now() + chrono::Duration::seconds(60))
        .await
        .expect("watchdog");
    assert_eq!(controller.message_count("watchdog").await, 0);
    assert!(silent.update_stamp().get().is_none());

    cancel.cancel();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_empty_registry_heartbeats_after_grace() {
    let controller = Arc::new(MemoryController::new("sites/test"));
    let manager = Arc::new(DeviceManager::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        false,
    ));

    let cancel = CancellationToken::new();
    manager.run(&cancel);

    manager
        .watchdog_update(Utc::now() + chrono::Duration::seconds(60))
        .await
        .expect("watchdog");
    assert_eq!(controller.message_count("watchdog").await, 1);

    cancel.cancel();
    manager.shutdown().await;
}
