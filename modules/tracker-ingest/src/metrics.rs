use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for the ingestion pipeline
///
/// Cheap to clone; every clone feeds the same registry.
#[derive(Clone)]
pub struct IngestMetrics {
    registry: Registry,

    // Counters
    pub ingest_total: IntCounterVec,
    pub dlq_total: IntCounterVec,
    pub publish_total: IntCounterVec,

    // Histograms
    pub event_latency_seconds: Histogram,

    // Gauges
    pub connections_active: IntGauge,
}

impl IngestMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ingest_total = IntCounterVec::new(
            Opts::new("tracker_ingest_total", "Total MQTT events mirrored"),
            &["topic", "kind"],
        )?;

        let dlq_total = IntCounterVec::new(
            Opts::new("tracker_dlq_total", "Total events sent to the DLQ"),
            &["topic", "reason"], // reason: json_decode|not_an_object|missing_fields|schema|processing|publish
        )?;

        let publish_total = IntCounterVec::new(
            Opts::new("tracker_publish_total", "Outbound publish calls"),
            &["result"], // ok|exhausted
        )?;

        let event_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "tracker_event_latency_seconds",
            "Inbound event processing latency seconds",
        ))?;

        let connections_active = IntGauge::new(
            "tracker_mqtt_connections_active",
            "Active MQTT broker connections",
        )?;

        registry.register(Box::new(ingest_total.clone()))?;
        registry.register(Box::new(dlq_total.clone()))?;
        registry.register(Box::new(publish_total.clone()))?;
        registry.register(Box::new(event_latency_seconds.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;

        Ok(Self {
            registry,
            ingest_total,
            dlq_total,
            publish_total,
            event_latency_seconds,
            connections_active,
        })
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}
