//! Supervisor restart tests.
//!
//! A transport fault inside one tick must crash the control loop, wait
//! out the restart backoff, and bring the loop back with fresh
//! cross-cycle memory - so a still-active alarm notifies again.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use sitekeeper_core::HysteresisBand;
use sitekeeper_transport::{
    Controller, InboundMessage, MemoryController, SequenceValue, TransportError, TransportResult,
};
use sitekeeperd::manager::DeviceManager;
use sitekeeperd::supervisor::{Supervisor, RESTART_DELAY};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Transport fake whose reads can be made to fail on demand.
struct FlakyController {
    inner: MemoryController,
    failing: AtomicBool,
    failures: AtomicU32,
}

impl FlakyController {
    fn new(site_path: &str) -> Self {
        Self {
            inner: MemoryController::new(site_path),
            failing: AtomicBool::new(false),
            failures: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Controller for FlakyController {
    fn site_path(&self) -> &str {
        self.inner.site_path()
    }

    async fn sequence_value(&self, path: &str) -> TransportResult<Option<f64>> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(TransportError::NotConnected);
        }
        self.inner.sequence_value(path).await
    }

    async fn update_sequence(&self, path: &str, value: SequenceValue) -> TransportResult<()> {
        self.inner.update_sequence(path, value).await
    }

    async fn update_multiple(
        &self,
        values: HashMap<String, SequenceValue>,
    ) -> TransportResult<()> {
        self.inner.update_multiple(values).await
    }

    async fn send_message(
        &self,
        message_type: &str,
        params: serde_json::Value,
    ) -> TransportResult<()> {
        self.inner.send_message(message_type, params).await
    }

    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> TransportResult<()> {
        self.inner.send_email(recipient, subject, body).await
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.subscribe()
    }
}

fn supervisor_for(controller: Arc<FlakyController>) -> Supervisor {
    let manager = Arc::new(DeviceManager::new(
        Arc::clone(&controller) as Arc<dyn Controller>,
        false,
    ));
    Supervisor::new(
        controller as Arc<dyn Controller>,
        manager,
        HysteresisBand::new(30.0, 90.0),
        vec!["ops@example.org".to_string()],
    )
}

async fn wait_for_emails(controller: &FlakyController, count: usize) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if controller.inner.recorded_emails().await.len() >= count {
            return;
        }
        sleep(WAIT_POLL_INTERVAL).await;
    }
    panic!("never saw {count} email(s)");
}

async fn wait_for_failures(controller: &FlakyController, count: u32) {
    let start = tokio::time::Instant::now();
    while start.elapsed() < WAIT_TIMEOUT {
        if controller.failures.load(Ordering::SeqCst) >= count {
            return;
        }
        sleep(WAIT_POLL_INTERVAL).await;
    }
    panic!("never saw {count} forced failure(s)");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fault_restarts_loop_with_fresh_alarm_memory() {
    let controller = Arc::new(FlakyController::new("sites/test"));
    controller
        .inner
        .seed_value("garage/RO/Array 1 Red Alarm", 1.0)
        .await;

    let supervisor = supervisor_for(Arc::clone(&controller));
    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let handle = tokio::spawn(async move { supervisor.run(run_token).await });

    // First tick: sustained alarm notifies exactly once
    wait_for_emails(&controller, 1).await;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(controller.inner.recorded_emails().await.len(), 1);

    // Force a tick fault; the loop must crash and restart
    let before_fault = tokio::time::Instant::now();
    controller.failing.store(true, Ordering::SeqCst);
    wait_for_failures(&controller, 1).await;
    controller.failing.store(false, Ordering::SeqCst);

    // Fresh memory: the still-active alarm notifies again
    wait_for_emails(&controller, 2).await;
    assert!(
        before_fault.elapsed() >= RESTART_DELAY,
        "restart happened before the backoff elapsed"
    );

    cancel.cancel();
    handle.await.expect("supervisor join");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_exits_cleanly_without_restart() {
    let controller = Arc::new(FlakyController::new("sites/test"));
    let supervisor = supervisor_for(Arc::clone(&controller));

    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let handle = tokio::spawn(async move { supervisor.run(run_token).await });

    sleep(Duration::from_secs(25)).await;
    cancel.cancel();

    timeout(Duration::from_secs(5), handle)
        .await
        .expect("supervisor exited on cancel")
        .expect("supervisor join");
}

#[tokio::test(start_paused = true)]
async fn test_repeated_faults_keep_restarting() {
    let controller = Arc::new(FlakyController::new("sites/test"));
    let supervisor = supervisor_for(Arc::clone(&controller));

    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let handle = tokio::spawn(async move { supervisor.run(run_token).await });

    controller.failing.store(true, Ordering::SeqCst);
    // Three consecutive crashed loops, each restarted after the backoff
    wait_for_failures(&controller, 3).await;
    controller.failing.store(false, Ordering::SeqCst);

    // The loop recovers and runs normal ticks again
    controller
        .inner
        .seed_value("garage/RO/Array 2 Red Alarm", 1.0)
        .await;
    wait_for_emails(&controller, 1).await;

    cancel.cancel();
    handle.await.expect("supervisor join");
}
