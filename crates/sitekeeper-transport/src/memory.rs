//! In-memory recording transport.
//!
//! `MemoryController` implements [`Controller`] entirely in process
//! memory: sequence values live in a map, and every outbound write,
//! message, and email is recorded in arrival order so tests can assert
//! on exactly what the daemon said. Inbound messages are injected
//! through [`MemoryController::inject`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::controller::Controller;
use crate::error::TransportResult;
use crate::message::{EmailEnvelope, InboundMessage, SequenceValue};

/// Capacity of the inbound broadcast channel.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Recording in-memory implementation of [`Controller`].
pub struct MemoryController {
    site_path: String,
    sequences: RwLock<HashMap<String, SequenceValue>>,
    updates: Mutex<Vec<(String, SequenceValue)>>,
    messages: Mutex<Vec<(String, serde_json::Value)>>,
    emails: Mutex<Vec<EmailEnvelope>>,
    inbound_tx: broadcast::Sender<InboundMessage>,
}

impl MemoryController {
    /// Creates an empty controller writing under `site_path`.
    pub fn new(site_path: impl Into<String>) -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        Self {
            site_path: site_path.into(),
            sequences: RwLock::new(HashMap::new()),
            updates: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            emails: Mutex::new(Vec::new()),
            inbound_tx,
        }
    }

    /// Seeds a sequence with a numeric value without recording an
    /// update (models data already on the server).
    pub async fn seed_value(&self, path: &str, value: f64) {
        self.sequences
            .write()
            .await
            .insert(path.to_string(), SequenceValue::Number(value));
    }

    /// Removes a seeded/written sequence so reads return `None` again.
    pub async fn clear_value(&self, path: &str) {
        self.sequences.write().await.remove(path);
    }

    /// Delivers an inbound message to all current subscribers.
    ///
    /// Returns the number of subscribers that received it.
    pub fn inject(&self, message: InboundMessage) -> usize {
        self.inbound_tx.send(message).unwrap_or(0)
    }

    /// Every sequence write in arrival order (batch writes appear as
    /// individual entries).
    pub async fn recorded_updates(&self) -> Vec<(String, SequenceValue)> {
        self.updates.lock().await.clone()
    }

    /// Number of writes recorded against one path.
    pub async fn update_count(&self, path: &str) -> usize {
        self.updates
            .lock()
            .await
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    /// Every typed message in send order.
    pub async fn recorded_messages(&self) -> Vec<(String, serde_json::Value)> {
        self.messages.lock().await.clone()
    }

    /// Number of messages recorded with one type.
    pub async fn message_count(&self, message_type: &str) -> usize {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(t, _)| t == message_type)
            .count()
    }

    /// Every email in queue order.
    pub async fn recorded_emails(&self) -> Vec<EmailEnvelope> {
        self.emails.lock().await.clone()
    }
}

#[async_trait]
impl Controller for MemoryController {
    fn site_path(&self) -> &str {
        &self.site_path
    }

    async fn sequence_value(&self, path: &str) -> TransportResult<Option<f64>> {
        Ok(self
            .sequences
            .read()
            .await
            .get(path)
            .and_then(|v| v.as_number()))
    }

    async fn update_sequence(&self, path: &str, value: SequenceValue) -> TransportResult<()> {
        self.sequences
            .write()
            .await
            .insert(path.to_string(), value.clone());
        self.updates.lock().await.push((path.to_string(), value));
        Ok(())
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
        self.messages
            .lock()
            .await
            .push((message_type.to_string(), params));
        Ok(())
    }

    async fn send_email(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> TransportResult<()> {
        self.emails
            .lock()
            .await
            .push(EmailEnvelope::new(recipient, subject, body));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_read_after_write() {
        let controller = MemoryController::new("sites/test");
        controller
            .update_sequence("a/b", SequenceValue::Number(5.0))
            .await
            .unwrap();
        assert_eq!(controller.sequence_value("a/b").await.unwrap(), Some(5.0));
        assert_eq!(controller.sequence_value("a/missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_text_values_read_as_numbers_when_parseable() {
        let controller = MemoryController::new("sites/test");
        controller
            .update_sequence("avg", SequenceValue::Text("73.42".into()))
            .await
            .unwrap();
        assert_eq!(controller.sequence_value("avg").await.unwrap(), Some(73.42));

        controller
            .update_sequence("status", SequenceValue::Text("running".into()))
            .await
            .unwrap();
        assert_eq!(controller.sequence_value("status").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_multiple_records_each_write() {
        let controller = MemoryController::new("sites/test");
        let mut batch = HashMap::new();
        batch.insert("x".to_string(), SequenceValue::Number(1.0));
        batch.insert("y".to_string(), SequenceValue::Number(2.0));
        controller.update_multiple(batch).await.unwrap();
        assert_eq!(controller.recorded_updates().await.len(), 2);
        assert_eq!(controller.update_count("x").await, 1);
    }

    #[tokio::test]
    async fn test_messages_and_emails_recorded() {
        let controller = MemoryController::new("sites/test");
        controller
            .send_message("watchdog", serde_json::json!({}))
            .await
            .unwrap();
        controller
            .send_email("ops@example.org", "received x", "notification: x")
            .await
            .unwrap();

        assert_eq!(controller.message_count("watchdog").await, 1);
        let emails = controller.recorded_emails().await;
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].recipient, "ops@example.org");
    }

    #[tokio::test]
    async fn test_inject_reaches_subscriber() {
        let controller = MemoryController::new("sites/test");
        let mut rx = controller.subscribe();
        let delivered =
            controller.inject(InboundMessage::new("test_alarm", serde_json::Value::Null));
        assert_eq!(delivered, 1);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.message_type, "test_alarm");
    }

    #[tokio::test]
    async fn test_inject_without_subscribers_is_harmless() {
        let controller = MemoryController::new("sites/test");
        assert_eq!(controller.inject(InboundMessage::bare("noop")), 0);
    }
}
