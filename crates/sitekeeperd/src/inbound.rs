//! Server-to-daemon command dispatch.
//!
//! The server sends a small set of typed messages: a generator
//! override and a test alarm. Everything else is ignored. One task
//! consumes the transport's broadcast stream; bad or incomplete
//! messages are logged and dropped, never fatal.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sitekeeper_transport::{Controller, InboundMessage};

use crate::control::{send_alarm_fanout, GENERATOR_RELAY_PATH};
use crate::manager::DeviceManager;

/// Spawns the task that consumes inbound control messages.
pub fn spawn_inbound_task(
    controller: Arc<dyn Controller>,
    manager: Arc<DeviceManager>,
    alarm_recipients: Vec<String>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut receiver = controller.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Inbound message task shutting down");
                    break;
                }

                message = receiver.recv() => {
                    match message {
                        Ok(message) => {
                            dispatch(&*controller, &manager, &alarm_recipients, message).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Inbound message stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Inbound message stream closed");
                            break;
                        }
                    }
                }
            }
        }
    })
}

/// Routes one inbound message; unknown types are ignored silently.
pub async fn dispatch(
    controller: &dyn Controller,
    manager: &DeviceManager,
    alarm_recipients: &[String],
    message: InboundMessage,
) {
    match message.message_type.as_str() {
        "generator_override" => {
            let Some(new_state) = message.param_i64("new_state") else {
                warn!("Generator override missing new_state parameter");
                return;
            };
            handle_generator_override(manager, new_state != 0).await;
        }
        "test_alarm" => {
            if let Err(e) = send_alarm_fanout(controller, alarm_recipients, "Test Alarm").await {
                warn!(error = %e, "Test alarm fan-out failed");
            }
        }
        other => {
            debug!(message_type = other, "Ignoring inbound message");
        }
    }
}

async fn handle_generator_override(manager: &DeviceManager, on: bool) {
    let Some(device) = manager.find(GENERATOR_RELAY_PATH) else {
        warn!(path = GENERATOR_RELAY_PATH, "Generator relay not in registry");
        return;
    };

    if on {
        info!("Turning on ohana generator");
    } else {
        info!("Turning off ohana generator");
    }

    if let Err(e) = device.set_state(if on { 1 } else { 0 }).await {
        warn!(path = GENERATOR_RELAY_PATH, error = %e, "Generator override failed");
    }
}
