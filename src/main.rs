use anyhow::Result;
use std::io;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};

use nft_transfer_indexer::indexer::{
    self,
    metadata::HttpMetadataTransport,
    rpc::contract::RpcNodeClient,
    rpc::subscription::{LogSubscription, subscribe_transfer_logs},
    transfer_processor::TransferProcessor,
};
use nft_transfer_indexer::metrics::Metrics;
use nft_transfer_indexer::sink::ConsoleSink;
use nft_transfer_indexer::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing. Stdout carries transfer records only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(io::stderr)
        .init();

    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config("config.yml") {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(e);
        }
    };

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        Some(Metrics::new()?)
    } else {
        info!("Metrics are disabled");
        None
    };

    // Start metrics server if metrics are enabled
    if let Some(metrics_instance) = &metrics {
        metrics_instance
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await;
    }

    // Both the subscription and the processor listen for Ctrl+C
    let (shutdown_tx, _) = broadcast::channel(1);
    let subscription_shutdown = shutdown_tx.subscribe();
    let processor_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, initiating shutdown...");
            if let Err(e) = shutdown_tx.send(()) {
                error!("Error during shutdown: {}", e);
            }
        }
    });

    // Create websocket provider
    info!("RPC URL: {:?}", config.rpc_ws_url);
    let provider = indexer::connect_provider(&config.rpc_ws_url).await?;

    // Subscribe to Transfer logs. Failing here is fatal.
    let (log_tx, log_rx) = mpsc::unbounded_channel();
    let subscription = LogSubscription::establish(
        subscribe_transfer_logs(&provider, config.transfer_signature),
        log_tx,
        subscription_shutdown,
    )
    .await?;

    let node = Arc::new(RpcNodeClient::new(provider));
    let transport = Arc::new(HttpMetadataTransport::new(config.call_timeout())?);
    let sink = Arc::new(ConsoleSink::new(config.output_format));
    let processor = TransferProcessor::new(&config, node, transport, sink, metrics);

    info!("============================ LISTENING =============================");

    // Returns an error if the node closed the stream without a shutdown signal
    let outcome = processor.run(log_rx, processor_shutdown).await;
    subscription.closed().await;

    if let Err(e) = &outcome {
        error!("Transfer processing stopped: {:#}", e);
    } else {
        info!("Shutdown complete");
    }
    outcome
}
