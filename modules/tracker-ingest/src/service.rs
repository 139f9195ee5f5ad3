//! Composition root for the ingestion pipeline

use event_bus::BusConnector;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::connection::LiveConnection;
use crate::dlq::DeadLetterRouter;
use crate::metrics::IngestMetrics;
use crate::mirror::MirrorWriter;
use crate::processor::MessageProcessor;
use crate::publisher::EventPublisher;
use crate::schema_registry::SchemaRegistry;
use crate::store::EventStore;
use crate::supervisor::{ReconnectSupervisor, SupervisorError, SupervisorState};

/// Owns every pipeline component; nothing is global
pub struct IngestService {
    supervisor: Arc<ReconnectSupervisor>,
    publisher: EventPublisher,
    connection: LiveConnection,
    metrics: IngestMetrics,
}

impl IngestService {
    pub fn new(
        config: &Config,
        connector: Arc<dyn BusConnector>,
        store: Arc<dyn EventStore>,
        metrics: IngestMetrics,
    ) -> Result<Self, String> {
        let connection = LiveConnection::new();

        let router = DeadLetterRouter::new(
            store.clone(),
            connection.clone(),
            metrics.clone(),
            config.dlq_root.clone(),
        );

        let schemas = if config.schema_enforce {
            tracing::info!("Event schema enforcement enabled");
            Some(SchemaRegistry::builtin()?)
        } else {
            None
        };

        let processor = MessageProcessor::new(
            MirrorWriter::new(store),
            router.clone(),
            schemas,
            metrics.clone(),
        );

        let supervisor = Arc::new(ReconnectSupervisor::new(
            connector,
            processor,
            connection.clone(),
            metrics.clone(),
            config.backoff(),
            config.topic_filters(),
        ));

        let publisher = EventPublisher::new(
            connection.clone(),
            router,
            metrics.clone(),
            config.publish_max_retries,
        );

        Ok(Self {
            supervisor,
            publisher,
            connection,
            metrics,
        })
    }

    /// Spawn the supervised consume loop
    pub fn start(&self) -> JoinHandle<Result<(), SupervisorError>> {
        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move { supervisor.start().await })
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn supervisor(&self) -> Arc<ReconnectSupervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_live().await
    }

    /// Stop the loop and wait until the session is released
    pub async fn shutdown(&self) {
        self.supervisor.stop();

        let mut state = self.supervisor.subscribe_state();
        let _ = state
            .wait_for(|s| matches!(s, SupervisorState::Stopped | SupervisorState::Failed))
            .await;

        tracing::info!(state = %self.supervisor.state(), "Ingest service shut down");
    }
}
