//! In-memory implementation of the bus traits for testing and development

use crate::{BusConnector, BusError, BusMessage, BusResult, BusSession, EventBus};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::Instant;

/// Broker double using in-memory channels
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without a Mosquitto container
/// - Integration tests that need to simulate broker outages
///
/// Messages are broadcast to every open session; each session filters by the
/// topic filters it subscribed to.
///
/// # Fault injection
/// - [`InMemoryBus::fail_next_connects`]: the next `n` connects are refused
/// - [`InMemoryBus::reject_publishes`]: every publish fails until switched off
/// - [`InMemoryBus::drop_sessions`]: every open session fails on its next read
///
/// # Example
/// ```rust
/// use event_bus::{BusConnector, InMemoryBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
///
/// // Subscribe before publishing
/// let mut session = bus.connect().await?;
/// session.subscribe("tracker/commands/+").await?;
///
/// // Publish a message
/// session.publisher().publish("tracker/commands/sync", b"hello".to_vec()).await?;
///
/// // Receive it
/// let msg = session.next_message().await?.unwrap();
/// assert_eq!(msg.subject, "tracker/commands/sync");
/// assert_eq!(msg.payload, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    // Global broadcast channel for all messages
    sender: Arc<broadcast::Sender<BusMessage>>,
    faults: Arc<Faults>,
}

struct Faults {
    refused_connects: AtomicU32,
    reject_publishes: AtomicBool,
    // Bumped by drop_sessions(); sessions opened under an older generation die
    generation: watch::Sender<u64>,
    connect_attempts: Mutex<Vec<Instant>>,
    published: Mutex<Vec<BusMessage>>,
}

impl InMemoryBus {
    /// Create a new in-memory bus
    ///
    /// The bus uses a broadcast channel with a buffer of 1000 messages.
    /// If this buffer is exceeded, the oldest messages will be dropped.
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    /// Create a new in-memory bus with a custom buffer size
    pub fn with_capacity(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        let (generation, _) = watch::channel(0);
        Self {
            sender: Arc::new(sender),
            faults: Arc::new(Faults {
                refused_connects: AtomicU32::new(0),
                reject_publishes: AtomicBool::new(false),
                generation,
                connect_attempts: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Refuse the next `count` connect calls
    pub fn fail_next_connects(&self, count: u32) {
        self.faults.refused_connects.store(count, Ordering::SeqCst);
    }

    /// Make every publish fail (or succeed again)
    pub fn reject_publishes(&self, reject: bool) {
        self.faults.reject_publishes.store(reject, Ordering::SeqCst);
    }

    /// Sever every open session, as a broker restart would
    pub fn drop_sessions(&self) {
        self.faults.generation.send_modify(|generation| *generation += 1);
    }

    /// Time of every connect call, successful or not
    pub async fn connect_attempts(&self) -> Vec<Instant> {
        self.faults.connect_attempts.lock().await.clone()
    }

    /// Every message accepted by `publish`, in order
    pub async fn published(&self) -> Vec<BusMessage> {
        self.faults.published.lock().await.clone()
    }

    /// Check if a topic matches an MQTT topic filter
    ///
    /// - `+` matches exactly one level
    /// - `#` matches the parent level and everything below it
    ///
    /// # Examples
    /// - `tracker/#` matches `tracker/events/projects/created`
    /// - `tracker/events/+/+` matches `tracker/events/projects/created`
    /// - `tracker/commands/+` does NOT match `tracker/commands/a/b` (too many levels)
    fn matches_filter(topic: &str, filter: &str) -> bool {
        let topic_levels: Vec<&str> = topic.split('/').collect();
        let filter_levels: Vec<&str> = filter.split('/').collect();

        let mut t_idx = 0;
        let mut f_idx = 0;

        while f_idx < filter_levels.len() {
            let filter_level = filter_levels[f_idx];

            if filter_level == "#" {
                // `#` matches all remaining levels, including none
                return true;
            }

            if t_idx >= topic_levels.len() {
                return false;
            }

            if filter_level != "+" && topic_levels[t_idx] != filter_level {
                return false;
            }

            t_idx += 1;
            f_idx += 1;
        }

        t_idx == topic_levels.len()
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        if self.faults.reject_publishes.load(Ordering::SeqCst) {
            return Err(BusError::PublishError(format!(
                "in-memory broker rejected publish to {}",
                subject
            )));
        }

        let msg = BusMessage::new(subject.to_string(), payload);
        self.faults.published.lock().await.push(msg.clone());

        // No open sessions is fine, the message is simply not delivered
        let _ = self.sender.send(msg);

        Ok(())
    }
}

#[async_trait]
impl BusConnector for InMemoryBus {
    async fn connect(&self) -> BusResult<Box<dyn BusSession>> {
        self.faults.connect_attempts.lock().await.push(Instant::now());

        let refused = self
            .faults
            .refused_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(BusError::ConnectionError(
                "in-memory broker refused connection".to_string(),
            ));
        }

        // A fresh receiver treats the current generation as already seen
        let generation = self.faults.generation.subscribe();

        Ok(Box::new(InMemorySession {
            bus: self.clone(),
            receiver: self.sender.subscribe(),
            filters: Vec::new(),
            generation,
            closed: false,
        }))
    }
}

/// A session against [`InMemoryBus`]
pub struct InMemorySession {
    bus: InMemoryBus,
    receiver: broadcast::Receiver<BusMessage>,
    filters: Vec<String>,
    generation: watch::Receiver<u64>,
    closed: bool,
}

#[async_trait]
impl BusSession for InMemorySession {
    async fn subscribe(&mut self, filter: &str) -> BusResult<()> {
        if self.closed {
            return Err(BusError::NotConnected);
        }
        if filter.is_empty() {
            return Err(BusError::SubscribeError("empty topic filter".to_string()));
        }
        self.filters.push(filter.to_string());
        Ok(())
    }

    async fn next_message(&mut self) -> BusResult<Option<BusMessage>> {
        if self.closed {
            return Err(BusError::NotConnected);
        }

        loop {
            tokio::select! {
                changed = self.generation.changed() => {
                    if changed.is_ok() {
                        self.closed = true;
                        return Err(BusError::ConnectionError(
                            "in-memory session dropped".to_string(),
                        ));
                    }
                    // The bus itself is gone; treat like a clean close
                    return Ok(None);
                }
                received = self.receiver.recv() => match received {
                    Ok(msg) => {
                        if self
                            .filters
                            .iter()
                            .any(|filter| InMemoryBus::matches_filter(&msg.subject, filter))
                        {
                            return Ok(Some(msg));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "InMemoryBus: session lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                },
            }
        }
    }

    fn publisher(&self) -> Arc<dyn EventBus> {
        Arc::new(self.bus.clone())
    }

    async fn disconnect(&mut self) -> BusResult<()> {
        self.closed = true;
        Ok(())
    }
}
