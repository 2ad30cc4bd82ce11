use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, MeterProvider, UpDownCounter};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Log stream metrics
    pub logs_received: Counter<u64>,
    pub logs_rejected: Counter<u64>,
    pub stream_errors: Counter<u64>,

    // Enrichment metrics
    pub transfers_emitted: Counter<u64>,
    pub enrichment_failures: Counter<u64>,
    pub in_flight_events: UpDownCounter<i64>,
    pub event_processing_time: Histogram<f64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("indexer_metrics");

        let logs_received = meter
            .u64_counter("indexer_logs_received")
            .with_description("Number of logs delivered by the node subscription")
            .build();

        let logs_rejected = meter
            .u64_counter("indexer_logs_rejected")
            .with_description("Number of logs not classified as ERC-721 transfers")
            .build();

        let stream_errors = meter
            .u64_counter("indexer_stream_errors")
            .with_description("Number of errors reported by the log subscription")
            .build();

        let transfers_emitted = meter
            .u64_counter("indexer_transfers_emitted")
            .with_description("Number of enriched transfers handed to the output")
            .build();

        let enrichment_failures = meter
            .u64_counter("indexer_enrichment_failures")
            .with_description("Number of enrichment lookups that fell back to an empty value")
            .build();

        let in_flight_events = meter
            .i64_up_down_counter("indexer_in_flight_events")
            .with_description("Transfers currently being enriched")
            .build();

        let event_processing_time = meter
            .f64_histogram("indexer_event_processing_time")
            .with_description("Time spent enriching a single transfer")
            .with_boundaries(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
            .with_unit("s")
            .build();

        let rpc_requests = meter
            .u64_counter("indexer_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("indexer_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("indexer_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            logs_received,
            logs_rejected,
            stream_errors,
            transfers_emitted,
            enrichment_failures,
            in_flight_events,
            event_processing_time,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub fn record_rpc(&self, method: &str, elapsed: Duration, is_error: bool) {
        let labels = [KeyValue::new("method", method.to_string())];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(elapsed.as_secs_f64(), &labels);
        if is_error {
            self.rpc_errors.add(1, &labels);
        }
    }

    /// Current registry contents in the Prometheus text format.
    pub fn encode(&self) -> String {
        encode_registry(&self.registry)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) {
        let addr = match format!("{addr}:{port}").parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Invalid metrics address {}:{}: {}", addr, port, e);
                return;
            }
        };
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().to_string() == "0.0.0.0" {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics server to {}: {}", addr, e);
                return;
            }
        };

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    encode_registry(&registry)
}

fn encode_registry(registry: &prometheus::Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
