use event_bus::{BusConnector, InMemoryBus, MqttConnector};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tracker_ingest_rs::{
    config::{BusType, Config, StoreType},
    db,
    metrics::IngestMetrics,
    routes::{self, AppState},
    EventStore, InMemoryEventStore, IngestService, PgEventStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tracker_ingest_rs=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        bus_type = ?config.bus_type,
        store_type = ?config.store_type,
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        topic_root = %config.topic_root,
        "Configuration loaded"
    );

    let metrics = IngestMetrics::new()?;

    let store: Arc<dyn EventStore> = match config.store_type {
        StoreType::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or("DATABASE_URL must be set")?;
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            db::ensure_schema(&pool).await?;
            Arc::new(PgEventStore::new(pool))
        }
        StoreType::InMemory => {
            tracing::warn!("Using in-memory store; mirrored events are not durable");
            Arc::new(InMemoryEventStore::new())
        }
    };

    let connector: Arc<dyn BusConnector> = match config.bus_type {
        BusType::Mqtt => Arc::new(MqttConnector::new(config.mqtt())),
        BusType::InMemory => {
            tracing::info!("Using InMemory event bus");
            Arc::new(InMemoryBus::new())
        }
    };

    let service = IngestService::new(&config, connector, store, metrics.clone())?;
    let mut supervisor_task = service.start();

    let app = routes::router(Arc::new(AppState {
        supervisor: service.supervisor(),
        metrics,
    }));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Tracker ingest listening");

    let (http_stop, mut http_stopped) = watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_stopped.wait_for(|stop| *stop).await;
            })
            .await
    });

    let outcome = tokio::select! {
        joined = &mut supervisor_task => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            service.shutdown().await;
            supervisor_task.await
        }
    };

    http_stop.send_replace(true);
    if let Err(e) = server.await? {
        tracing::error!(error = %e, "HTTP server error");
    }

    match outcome? {
        Ok(()) => {
            tracing::info!("Tracker ingest stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Ingestion pipeline failed permanently");
            Err(e.into())
        }
    }
}
