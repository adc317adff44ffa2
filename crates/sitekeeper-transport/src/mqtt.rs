//! MQTT transport backend.
//!
//! `MqttController` speaks to the site server through an MQTT broker:
//!
//! ```text
//! <prefix>/sequences/<path>   retained; latest value per sequence
//! <prefix>/messages/<type>    typed messages (watchdog, ...)
//! <prefix>/email              email envelopes for the server bridge
//! <prefix>/inbound/<type>     server -> client control messages
//! ```
//!
//! Current sequence values are answered from a local cache kept fresh by
//! subscribing to the retained sequence topics, so reads never block on
//! the broker. A background task owns the rumqttc event loop; broker
//! errors are logged and polling resumes after a short delay (rumqttc
//! reconnects on the next poll).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::error::{TransportError, TransportResult};
use crate::message::{EmailEnvelope, InboundMessage, MessageEnvelope, SequenceValue};

/// Capacity of the rumqttc request channel.
const CLIENT_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the inbound broadcast channel.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Delay before re-polling after an event-loop error.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Broker keep-alive interval.
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Broker connection settings, usually deserialized from the daemon
/// configuration's `[mqtt]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker hostname
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Client identifier presented to the broker
    pub client_id: String,

    /// Topic prefix all sitekeeper traffic lives under
    pub topic_prefix: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "sitekeeper".to_string(),
            topic_prefix: "sitekeeper".to_string(),
        }
    }
}

/// Production [`Controller`] over an MQTT broker.
pub struct MqttController {
    site_path: String,
    topic_prefix: String,
    client: AsyncClient,
    values: Arc<RwLock<HashMap<String, f64>>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

impl MqttController {
    /// Connects to the broker and starts the event-loop task.
    ///
    /// Subscribes to the retained sequence topics (value cache) and the
    /// inbound command topics. The event-loop task runs until
    /// `cancel_token` fires.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Subscribe` if the initial subscriptions
    /// cannot be queued.
    pub async fn connect(
        settings: &MqttSettings,
        site_path: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> TransportResult<Self> {
        let mut options =
            MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CHANNEL_CAPACITY);
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        let prefix = settings.topic_prefix.clone();
        client
            .subscribe(format!("{prefix}/sequences/#"), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        client
            .subscribe(format!("{prefix}/inbound/#"), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        let values = Arc::new(RwLock::new(HashMap::new()));
        spawn_event_loop_task(
            eventloop,
            prefix.clone(),
            Arc::clone(&values),
            inbound_tx.clone(),
            cancel_token,
        );

        info!(
            host = %settings.host,
            port = settings.port,
            prefix = %prefix,
            "Connected to MQTT broker"
        );

        Ok(Self {
            site_path: site_path.into(),
            topic_prefix: prefix,
            client,
            values,
            inbound_tx,
        })
    }

    fn sequence_topic(&self, path: &str) -> String {
        format!("{}/sequences/{}", self.topic_prefix, path)
    }

    fn message_topic(&self, message_type: &str) -> String {
        format!("{}/messages/{}", self.topic_prefix, message_type)
    }

    fn email_topic(&self) -> String {
        format!("{}/email", self.topic_prefix)
    }
}

#[async_trait]
impl Controller for MqttController {
    fn site_path(&self) -> &str {
        &self.site_path
    }

    async fn sequence_value(&self, path: &str) -> TransportResult<Option<f64>> {
        Ok(self.values.read().await.get(path).copied())
    }

    async fn update_sequence(&self, path: &str, value: SequenceValue) -> TransportResult<()> {
        // Keep the local cache read-after-write coherent instead of
        // waiting for the broker echo.
        if let Some(n) = value.as_number() {
            self.values.write().await.insert(path.to_string(), n);
        }

        self.client
            .publish(
                self.sequence_topic(path),
                QoS::AtLeastOnce,
                true,
                value.to_payload(),
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn update_multiple(
        &self,
        values: HashMap<String, SequenceValue>,
    ) -> TransportResult<()> {
        for (path, value) in values {
            self.update_sequence(&path, value).await?;
        }
        Ok(())
    }

    async fn send_message(
        &self,
        message_type: &str,
        params: serde_json::Value,
    ) -> TransportResult<()> {
        let envelope = MessageEnvelope::new(message_type, params);
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(
                self.message_topic(message_type),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> TransportResult<()> {
        let envelope = EmailEnvelope::new(recipient, subject, body);
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(self.email_topic(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }
}

/// Spawns the task that owns the rumqttc event loop.
///
/// Routes retained sequence publishes into the value cache and inbound
/// command publishes onto the broadcast channel. Runs until the
/// cancellation token fires.
fn spawn_event_loop_task(
    mut eventloop: rumqttc::EventLoop,
    topic_prefix: String,
    values: Arc<RwLock<HashMap<String, f64>>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let sequence_prefix = format!("{topic_prefix}/sequences/");
        let inbound_prefix = format!("{topic_prefix}/inbound/");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("MQTT event loop shutting down");
                    break;
                }

                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(rumqttc::Incoming::Publish(publish))) => {
                            handle_publish(
                                &publish.topic,
                                &publish.payload,
                                &sequence_prefix,
                                &inbound_prefix,
                                &values,
                                &inbound_tx,
                            )
                            .await;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "MQTT event loop error, retrying");
                            tokio::time::sleep(RECONNECT_DELAY).await;
                        }
                    }
                }
            }
        }

        debug!("MQTT event loop task completed");
    })
}

/// Routes one inbound publish to the value cache or the command stream.
async fn handle_publish(
    topic: &str,
    payload: &[u8],
    sequence_prefix: &str,
    inbound_prefix: &str,
    values: &RwLock<HashMap<String, f64>>,
    inbound_tx: &broadcast::Sender<InboundMessage>,
) {
    if let Some(path) = topic.strip_prefix(sequence_prefix) {
        match parse_numeric_payload(payload) {
            Some(value) => {
                values.write().await.insert(path.to_string(), value);
            }
            None => {
                // Text sequences (status strings) have no numeric reading
                values.write().await.remove(path);
            }
        }
    } else if let Some(message_type) = topic.strip_prefix(inbound_prefix) {
        let params =
            serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null);
        let message = InboundMessage::new(message_type, params);
        debug!(message_type = %message.message_type, "Inbound message received");
        // No subscribers yet is fine; messages before startup completes are dropped
        let _ = inbound_tx.send(message);
    }
}

/// Parses a sequence payload as a number.
///
/// Payloads are plain value strings (`"73.42"`, `"1"`); anything
/// non-numeric (status text) yields `None`.
fn parse_numeric_payload(payload: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().parse().ok()
}
