//! MQTT implementation of the bus traits, backed by `rumqttc`

use crate::{BusConnector, BusError, BusMessage, BusResult, BusSession, EventBus};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Connection settings for one MQTT broker
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Empty means anonymous
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound for TCP connect plus CONNACK
    pub connect_timeout: Duration,
    /// Capacity of the client request queue shared by publishes and subscribes
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "tracker-ingest".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            request_capacity: 64,
        }
    }
}

impl MqttConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if !self.username.is_empty() {
            options.set_credentials(self.username.clone(), self.password.clone());
        }
        options
    }
}

/// Opens sessions against a real MQTT broker
///
/// # Example
/// ```rust,no_run
/// use event_bus::{BusConnector, MqttConfig, MqttConnector};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = MqttConnector::new(MqttConfig::default());
/// let mut session = connector.connect().await?;
/// session.subscribe("tracker/events/+/+").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    async fn connect(&self) -> BusResult<Box<dyn BusSession>> {
        let (client, mut eventloop) =
            AsyncClient::new(self.config.options(), self.config.request_capacity);

        // rumqttc connects lazily: drive the event loop until the broker answers
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => return Ok(connack),
                    Ok(_) => continue,
                    Err(e) => return Err(BusError::ConnectionError(e.to_string())),
                }
            }
        };

        let connack = tokio::time::timeout(self.config.connect_timeout, handshake)
            .await
            .map_err(|_| {
                BusError::ConnectionError(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.config.host, self.config.port, self.config.connect_timeout
                ))
            })??;

        if connack.code != ConnectReturnCode::Success {
            return Err(BusError::ConnectionError(format!(
                "broker refused connection: {:?}",
                connack.code
            )));
        }

        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connected to MQTT broker"
        );

        Ok(Box::new(MqttSession {
            client,
            eventloop,
            pending: VecDeque::new(),
            ack_timeout: self.config.connect_timeout,
        }))
    }
}

/// One live `rumqttc` connection
pub struct MqttSession {
    client: AsyncClient,
    eventloop: EventLoop,
    // Publishes that arrived while a subscribe was waiting on its SUBACK
    pending: VecDeque<BusMessage>,
    ack_timeout: Duration,
}

impl MqttSession {
    // Polls until the SUBACK for our SUBSCRIBE lands
    async fn await_suback(&mut self, filter: &str) -> BusResult<()> {
        let mut pkid = None;
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Subscribe(id))) => pkid = Some(id),
                Ok(Event::Incoming(Packet::SubAck(suback))) if Some(suback.pkid) == pkid => {
                    if suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(BusError::SubscribeError(format!(
                            "broker rejected subscription to {}",
                            filter
                        )));
                    }
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.pending.push_back(to_message(&publish));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Err(BusError::SubscribeError(format!(
                        "broker disconnected before acknowledging {}",
                        filter
                    )));
                }
                Ok(_) => continue,
                Err(e) => return Err(BusError::ConnectionError(e.to_string())),
            }
        }
    }
}

fn to_message(publish: &rumqttc::Publish) -> BusMessage {
    BusMessage::new(publish.topic.clone(), publish.payload.to_vec())
        .with_qos(publish.qos as u8)
        .with_retain(publish.retain)
}

#[async_trait]
impl BusSession for MqttSession {
    /// Returns once the broker has granted the filter
    async fn subscribe(&mut self, filter: &str) -> BusResult<()> {
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| BusError::SubscribeError(format!("{}: {}", filter, e)))?;

        let timeout = self.ack_timeout;
        tokio::time::timeout(timeout, self.await_suback(filter))
            .await
            .map_err(|_| {
                BusError::SubscribeError(format!(
                    "no SUBACK for {} within {:?}",
                    filter, timeout
                ))
            })?
    }

    async fn next_message(&mut self) -> BusResult<Option<BusMessage>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    return Ok(Some(to_message(&publish)));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(BusError::ConnectionError(e.to_string())),
            }
        }
    }

    fn publisher(&self) -> Arc<dyn EventBus> {
        Arc::new(MqttPublisher {
            client: self.client.clone(),
        })
    }

    async fn disconnect(&mut self) -> BusResult<()> {
        self.client
            .try_disconnect()
            .map_err(|e| BusError::ConnectionError(e.to_string()))?;

        // Flush queued requests (pending publishes included) up to the DISCONNECT
        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(2), flush).await;
        Ok(())
    }
}

/// Publish handle sharing an [`MqttSession`]'s connection
///
/// Uses the non-blocking request path: the session's event loop may be busy
/// with the caller's own message, so a full request queue fails fast with
/// [`BusError::PublishError`] instead of waiting on it.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl EventBus for MqttPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        self.client
            .try_publish(subject, QoS::AtLeastOnce, false, payload)
            .map_err(|e| BusError::PublishError(e.to_string()))
    }
}
