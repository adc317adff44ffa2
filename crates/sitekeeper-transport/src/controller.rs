//! Controller capability interface.
//!
//! Everything sitekeeper says to the outside world goes through this
//! trait: telemetry reads, sequence writes, typed messages, email
//! requests, and the inbound command stream. Components receive an
//! `Arc<dyn Controller>` at construction; nothing reaches for a global.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::TransportResult;
use crate::message::{InboundMessage, SequenceValue};

/// Capability interface to the telemetry/command transport.
///
/// Implementations: [`crate::MqttController`] (production) and
/// [`crate::MemoryController`] (tests). All methods are cheap to call
/// concurrently from multiple tasks.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Returns the server-side folder this client writes under.
    ///
    /// Computed values (battery averages) are published beneath this
    /// path; device sequences use their own absolute paths.
    fn site_path(&self) -> &str;

    /// Fetches the most recent value of a sequence.
    ///
    /// Returns `Ok(None)` when the sequence exists but has no numeric
    /// data yet, or does not exist at all. Only transport-level
    /// failures produce an error.
    async fn sequence_value(&self, path: &str) -> TransportResult<Option<f64>>;

    /// Writes one value to a sequence.
    async fn update_sequence(&self, path: &str, value: SequenceValue) -> TransportResult<()>;

    /// Writes several sequence values in one batch.
    ///
    /// Backends without a true batch primitive fan the writes out, but
    /// callers still get a single round trip through this interface.
    async fn update_multiple(
        &self,
        values: HashMap<String, SequenceValue>,
    ) -> TransportResult<()>;

    /// Sends a typed message to the server.
    async fn send_message(
        &self,
        message_type: &str,
        params: serde_json::Value,
    ) -> TransportResult<()>;

    /// Queues an email for delivery by the server.
    async fn send_email(&self, recipient: &str, subject: &str, body: &str)
        -> TransportResult<()>;

    /// Subscribes to inbound control messages.
    ///
    /// Returns a broadcast receiver; each subscriber sees every message
    /// that arrives after subscription. Slow consumers can lag and must
    /// handle `RecvError::Lagged`.
    fn subscribe(&self) -> broadcast::Receiver<InboundMessage>;
}
