pub mod config;
pub mod connection;
pub mod db;
pub mod dlq;
pub mod metrics;
pub mod mirror;
pub mod processor;
pub mod publisher;
pub mod repos;
pub mod routes;
pub mod schema_registry;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod validation;

pub use connection::LiveConnection;
pub use dlq::{dlq_topic, DeadLetterOutcome, DeadLetterRouter, DlqEnvelope, DlqPayload};
pub use processor::{MessageProcessor, ProcessOutcome};
pub use publisher::{EventPublisher, PublishError};
pub use service::IngestService;
pub use store::{EventStore, InMemoryEventStore, PgEventStore, StorageError};
pub use supervisor::{ReconnectSupervisor, SupervisorError, SupervisorState};
pub use validation::{validate, FailureReason, InboundEnvelope};
