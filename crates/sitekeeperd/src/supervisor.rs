//! Restart-on-failure shell around the control loop.
//!
//! Operator shutdown (the cancellation token) exits cleanly. Any other
//! failure out of the loop is logged, waited out for a fixed backoff,
//! and the loop is rebuilt from initial state. Rebuilding resets the
//! cross-cycle memory, so an alarm that is still active may notify
//! again after a restart; that is the accepted cost of crash recovery.

use std::sync::Arc;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sitekeeper_core::HysteresisBand;
use sitekeeper_transport::Controller;

use crate::control::ControlLoop;
use crate::manager::DeviceManager;

/// Pause between a control-loop fault and the restart.
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// Crash-resilient driver for the control loop.
pub struct Supervisor {
    controller: Arc<dyn Controller>,
    manager: Arc<DeviceManager>,
    band: HysteresisBand,
    alarm_recipients: Vec<String>,
}

impl Supervisor {
    /// Creates a supervisor; each (re)start builds a fresh control loop
    /// from these parts.
    pub fn new(
        controller: Arc<dyn Controller>,
        manager: Arc<DeviceManager>,
        band: HysteresisBand,
        alarm_recipients: Vec<String>,
    ) -> Self {
        Self {
            controller,
            manager,
            band,
            alarm_recipients,
        }
    }

    /// Runs the control loop until the token fires, restarting it
    /// after every fault.
    pub async fn run(&self, cancel_token: CancellationToken) {
        loop {
            let mut control_loop = ControlLoop::new(
                Arc::clone(&self.controller),
                Arc::clone(&self.manager),
                self.band,
                self.alarm_recipients.clone(),
            );

            match control_loop.run(cancel_token.clone()).await {
                Ok(()) => {
                    info!("Control loop stopped");
                    return;
                }
                Err(e) => {
                    // Seconds of lost coverage; heartbeats pause too
                    warn!(error = %e, "Control loop failed; restarting");
                }
            }

            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Supervisor shutting down");
                    return;
                }

                _ = tokio::time::sleep(RESTART_DELAY) => {
                    debug!("Restarting control loop");
                }
            }
        }
    }
}
