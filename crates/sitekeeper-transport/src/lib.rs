//! Sitekeeper Transport - Telemetry/command plumbing to the site server
//!
//! This crate provides the capability interface the rest of sitekeeper
//! talks through, plus its two implementations:
//! - `controller` - the `Controller` trait (sequence reads/writes,
//!   messages, email, inbound subscription)
//! - `mqtt` - production backend over an MQTT broker
//! - `memory` - recording in-memory backend for tests
//!
//! All durable state lives on the server side of the transport; nothing
//! here persists anything locally.

pub mod controller;
pub mod error;
pub mod memory;
pub mod message;
pub mod mqtt;

pub use controller::Controller;
pub use error::{TransportError, TransportResult};
pub use memory::MemoryController;
pub use message::{EmailEnvelope, InboundMessage, MessageEnvelope, SequenceValue};
pub use mqtt::{MqttController, MqttSettings};
