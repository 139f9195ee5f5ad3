//! # EventBus Abstraction
//!
//! A platform-level abstraction over the MQTT broker the tracker services talk to.
//!
//! ## Sessions, not subscriptions
//!
//! MQTT clients own exactly one connection that carries both inbound
//! subscriptions and outbound publishes. The abstraction therefore splits into:
//!
//! - [`BusConnector`]: opens a fresh [`BusSession`] (one broker connection)
//! - [`BusSession`]: subscribe to topic filters and read the inbound stream
//! - [`EventBus`]: the publish handle, shared with whoever needs to emit events
//!   over the session's connection
//!
//! Reconnect policy lives with the caller; a connector never retries on its own.
//!
//! ## Implementations
//!
//! - **MqttConnector**: Production implementation using `rumqttc`
//! - **InMemoryBus**: Test/dev implementation using in-memory channels, with
//!   fault injection for connect and publish failures
//!
//! ## Usage
//!
//! ```rust
//! use event_bus::{BusConnector, InMemoryBus};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = InMemoryBus::new();
//! let mut session = bus.connect().await?;
//! session.subscribe("tracker/events/+/+").await?;
//!
//! let publisher = session.publisher();
//! publisher
//!     .publish("tracker/events/projects/created", b"{}".to_vec())
//!     .await?;
//!
//! let msg = session.next_message().await?.expect("session open");
//! assert_eq!(msg.subject, "tracker/events/projects/created");
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory_bus;
mod mqtt_bus;
pub mod retry;

pub use envelope::{idempotency_key, missing_envelope_fields, EventEnvelope, REQUIRED_FIELDS};
pub use inmemory_bus::InMemoryBus;
pub use mqtt_bus::{MqttConfig, MqttConnector, MqttPublisher, MqttSession};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A message received from or sent to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// The topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Delivery guarantee the broker used for this message (0, 1 or 2)
    pub qos: u8,
    /// Whether the broker delivered this as a retained message
    pub retain: bool,
}

impl BusMessage {
    /// Create a new bus message delivered at least once
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            qos: 1,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to topic filter: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("no live broker connection")]
    NotConnected,

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Outbound half of a broker connection
///
/// Every publish is made at the "at least once" delivery level (MQTT QoS 1).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a topic
    ///
    /// # Returns
    /// * `Ok(())` once the broker client has accepted the message for delivery
    /// * `Err(BusError)` if the message could not be handed over
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

/// One live broker connection
///
/// A session is exclusively owned by whoever called [`BusConnector::connect`].
/// Outbound traffic goes through the handle returned by [`BusSession::publisher`],
/// which shares this session's connection instead of opening a second one.
#[async_trait]
pub trait BusSession: Send {
    /// Subscribe to a topic filter (supports MQTT wildcards: `+`, `#`)
    ///
    /// - `+` matches exactly one level (e.g., `tracker/events/+/+`)
    /// - `#` matches any number of trailing levels (e.g., `tracker/#`)
    ///
    /// `Ok` means the broker granted the filter, not merely that the request was sent.
    async fn subscribe(&mut self, filter: &str) -> BusResult<()>;

    /// Wait for the next inbound message
    ///
    /// # Returns
    /// * `Ok(Some(msg))` for every delivered message, in broker order
    /// * `Ok(None)` if the broker closed the session cleanly
    /// * `Err(BusError)` if the connection failed
    async fn next_message(&mut self) -> BusResult<Option<BusMessage>>;

    /// Publish handle bound to this session's connection
    fn publisher(&self) -> Arc<dyn EventBus>;

    /// Release the connection
    async fn disconnect(&mut self) -> BusResult<()>;
}

/// Opens broker sessions
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a new broker session. Never retries internally.
    async fn connect(&self) -> BusResult<Box<dyn BusSession>>;
}

impl fmt::Debug for dyn BusConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusConnector")
    }
}
