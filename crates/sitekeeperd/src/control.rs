//! The periodic decision cycle.
//!
//! Every tick, in order: aggregate battery state-of-charge telemetry,
//! run generator hysteresis, project purifier status codes to text,
//! edge-detect purifier alarms, and gate the watchdog sweep. Computed
//! averages batch into one `update_multiple` write.
//!
//! Cross-cycle memory (previous statuses, alarm latch, last watchdog
//! time) lives in [`ControlState`]; it resets when the supervisor
//! rebuilds the loop after a fault.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sitekeeper_core::{
    alarm_active, mean_of_present, AlarmLatch, HysteresisBand, PurifierStatus, StatusTracker,
};
use sitekeeper_transport::{Controller, SequenceValue, TransportError};

use crate::manager::DeviceManager;

/// Period of the decision cycle.
pub const TICK_PERIOD: Duration = Duration::from_secs(10);

/// Minimum spacing between watchdog sweeps.
pub const WATCHDOG_WINDOW: Duration = Duration::from_secs(55);

/// Server path of the generator relay device.
pub const GENERATOR_RELAY_PATH: &str = "ohana/generator-relay";

/// Telemetry sequence carrying the relay's current contact state.
const RELAY_STATE_PATH: &str = "ohana/generator-relay/relay-1";

/// House battery pair feeding the generator decision.
const HOUSE_SOC_INPUTS: [&str; 2] = [
    "ohana/BMU-L/relative_state_of_charge",
    "ohana/BMU-R/relative_state_of_charge",
];

/// Garage main battery bank.
const GARAGE_SOC_INPUTS: [&str; 5] = [
    "garage/BMU-1/relative_state_of_charge",
    "garage/BMU-2/relative_state_of_charge",
    "garage/BMU-3/relative_state_of_charge",
    "garage/BMU-4/relative_state_of_charge",
    "garage/BMU-5/relative_state_of_charge",
];

/// Garage UPS/backup pair.
const UPS_SOC_INPUTS: [&str; 2] = [
    "garage/UPS-BMU-1/relative_state_of_charge",
    "garage/UPS-BMU-2/relative_state_of_charge",
];

/// Purifier status-code sequences and the text sequences they project to.
const STATUS_SOURCES: [(&str, &str); 2] = [
    ("garage/RO/Array 1 Status Code", "garage/RO/Array 1 Status"),
    ("garage/RO/Array 2 Status Code", "garage/RO/Array 2 Status"),
];

/// Monitored purifier alarm names, read under `garage/RO/`.
const ALARM_NAMES: [&str; 4] = [
    "Array 1 Red Alarm",
    "Array 2 Red Alarm",
    "Array 1 Blue Alarm",
    "Array 2 Blue Alarm",
];

/// Errors that abort a tick and reach the supervisor.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Transport failure during a telemetry read or write
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// Cross-cycle memory owned by the control loop.
#[derive(Debug, Default)]
pub struct ControlState {
    statuses: StatusTracker,
    alarms: AlarmLatch,
    last_watchdog: Option<Instant>,
}

impl ControlState {
    /// Returns true when a watchdog sweep is due at `now`.
    fn watchdog_due(&self, now: Instant) -> bool {
        match self.last_watchdog {
            None => true,
            Some(last) => now.duration_since(last) > WATCHDOG_WINDOW,
        }
    }
}

/// The 10-second decision cycle.
pub struct ControlLoop {
    controller: Arc<dyn Controller>,
    manager: Arc<DeviceManager>,
    band: HysteresisBand,
    alarm_recipients: Vec<String>,
    state: ControlState,
}

impl ControlLoop {
    /// Creates a loop with fresh cross-cycle memory.
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
            state: ControlState::default(),
        }
    }

    /// Ticks until cancelled; the first tick runs immediately.
    ///
    /// Any tick error propagates out for the supervisor to handle.
    pub async fn run(&mut self, cancel_token: CancellationToken) -> Result<(), ControlError> {
        let mut tick = interval(TICK_PERIOD);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = TICK_PERIOD.as_secs(), "Control loop started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Control loop shutting down");
                    return Ok(());
                }

                _ = tick.tick() => {
                    self.tick().await?;
                }
            }
        }
    }

    /// Runs one decision cycle.
    pub async fn tick(&mut self) -> Result<(), ControlError> {
        let mut computed: HashMap<String, SequenceValue> = HashMap::new();
        let site_path = self.controller.site_path().to_string();

        // House average drives the generator
        if let Some(avg) = self.fetch_mean(&HOUSE_SOC_INPUTS).await? {
            computed.insert(
                format!("{site_path}/ohana/average_soc"),
                SequenceValue::Text(format!("{avg:.2}")),
            );
            self.apply_hysteresis(avg).await?;
        }

        if let Some(avg) = self.fetch_mean(&GARAGE_SOC_INPUTS).await? {
            computed.insert(
                format!("{site_path}/garage/average_soc"),
                SequenceValue::Text(format!("{avg:.2}")),
            );
        }

        if let Some(avg) = self.fetch_mean(&UPS_SOC_INPUTS).await? {
            computed.insert(
                format!("{site_path}/garage/ups_average_soc"),
                SequenceValue::Text(format!("{avg:.2}")),
            );
        }

        if !computed.is_empty() {
            self.controller.update_multiple(computed).await?;
        }

        self.project_statuses().await?;
        self.check_alarms().await?;

        if self.state.watchdog_due(Instant::now()) {
            self.manager.watchdog_update(chrono::Utc::now()).await?;
            self.state.last_watchdog = Some(Instant::now());
        }

        Ok(())
    }

    /// Mean of the non-null readings in a group; `None` when every
    /// reading is missing.
    async fn fetch_mean(&self, paths: &[&str]) -> Result<Option<f64>, ControlError> {
        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            values.push(self.controller.sequence_value(path).await?);
        }
        Ok(mean_of_present(&values))
    }

    /// Generator hysteresis against the relay's current telemetry state.
    ///
    /// A missing relay-state reading suppresses any action this tick;
    /// doing nothing beats guessing which way the contact sits.
    async fn apply_hysteresis(&self, average: f64) -> Result<(), ControlError> {
        let Some(relay_state) = self.controller.sequence_value(RELAY_STATE_PATH).await? else {
            return Ok(());
        };
        let relay_on = relay_state as i64 == 1;

        let Some(command) = self.band.decide(average, relay_on) else {
            return Ok(());
        };

        info!(
            average = format!("{average:.1}"),
            lower = self.band.lower,
            upper = self.band.upper,
            command = %command,
            "House SOC crossed threshold; commanding generator"
        );

        match self.manager.find(GENERATOR_RELAY_PATH) {
            Some(device) => {
                // Actuation failures are recoverable I/O, not tick faults
                if let Err(e) = device.set_state(command.as_value()).await {
                    warn!(path = GENERATOR_RELAY_PATH, error = %e, "Generator command failed");
                }
            }
            None => warn!(path = GENERATOR_RELAY_PATH, "Generator relay not in registry"),
        }
        Ok(())
    }

    /// Writes purifier status text only when it changed.
    async fn project_statuses(&mut self) -> Result<(), ControlError> {
        for (code_path, status_path) in STATUS_SOURCES {
            let code = self.controller.sequence_value(code_path).await?;
            let status = PurifierStatus::from_code(code);
            if self.state.statuses.changed(status_path, status) {
                self.controller
                    .update_sequence(status_path, SequenceValue::Text(status.as_str().to_string()))
                    .await?;
            }
        }
        Ok(())
    }

    /// Edge-detects purifier alarms and fans out notifications.
    async fn check_alarms(&mut self) -> Result<(), ControlError> {
        for name in ALARM_NAMES {
            let value = self
                .controller
                .sequence_value(&format!("garage/RO/{name}"))
                .await?;
            let active = alarm_active(value);
            if self.state.alarms.should_notify(name, active) {
                warn!(alarm = name, "Purifier alarm raised");
                // Lowercased in the email to be a bit less alarming
                send_alarm_fanout(
                    self.controller.as_ref(),
                    &self.alarm_recipients,
                    &name.to_lowercase(),
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// Sends one alarm email per configured recipient.
pub async fn send_alarm_fanout(
    controller: &dyn Controller,
    recipients: &[String],
    alarm_name: &str,
) -> Result<(), TransportError> {
    for recipient in recipients {
        controller
            .send_email(
                recipient,
                &format!("received {alarm_name}"),
                &format!("sitekeeper notification: {alarm_name}"),
            )
            .await?;
    }
    Ok(())
}
