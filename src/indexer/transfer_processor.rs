use alloy_primitives::Address;
use anyhow::{Result, anyhow};
use opentelemetry::KeyValue;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::indexer::metadata::{MetadataFetcher, MetadataTransport};
use crate::indexer::rpc::contract::{ContractReader, NodeClient};
use crate::indexer::rpc::subscription::LogStreamItem;
use crate::indexer::transformations::transfers::TransferClassifier;
use crate::metrics::Metrics;
use crate::models::common::Config;
use crate::models::datasets::logs::RpcLogData;
use crate::models::datasets::transfers::{EnrichedTransferData, TransferEvent};
use crate::models::errors::ConnectionError;
use crate::sink::RecordSink;

/// Looks up the on-chain and off-chain data of a single transfer.
pub struct TransferEnricher {
    reader: ContractReader,
    fetcher: MetadataFetcher,
    event_timeout: Duration,
    metrics: Option<Metrics>,
}

impl TransferEnricher {
    pub fn new(
        reader: ContractReader,
        fetcher: MetadataFetcher,
        event_timeout: Duration,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            reader,
            fetcher,
            event_timeout,
            metrics,
        }
    }

    /// `name`, `symbol` and `tokenURI` are read concurrently, the metadata
    /// fetch follows `tokenURI`. Each lookup that fails or misses the event
    /// deadline leaves its field empty.
    pub async fn enrich(&self, event: TransferEvent) -> EnrichedTransferData {
        let contract = event.contract_address;
        let deadline = Instant::now() + self.event_timeout;

        let name = self.within(deadline, "contractName", contract, self.reader.name(contract));
        let symbol = self.within(deadline, "contractSymbol", contract, self.reader.symbol(contract));
        let token = async {
            let token_uri = self
                .within(
                    deadline,
                    "tokenURI",
                    contract,
                    self.reader.token_uri(contract, event.token_id),
                )
                .await;
            let metadata = if token_uri.is_empty() {
                String::new()
            } else {
                self.within(deadline, "tokenMetaData", contract, self.fetcher.fetch(&token_uri))
                    .await
            };
            (token_uri, metadata)
        };

        let (name, symbol, (token_uri, metadata)) = tokio::join!(name, symbol, token);

        EnrichedTransferData::new(event, name, symbol, token_uri, metadata)
    }

    async fn within<F, E>(
        &self,
        deadline: Instant,
        field: &'static str,
        contract: Address,
        lookup: F,
    ) -> String
    where
        F: Future<Output = Result<String, E>>,
        E: Display,
    {
        let failure = match tokio::time::timeout_at(deadline, lookup).await {
            Ok(Ok(value)) => return value,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("event deadline of {:?} reached", self.event_timeout),
        };

        debug!("Leaving {} empty for {}: {}", field, contract, failure);
        if let Some(metrics) = &self.metrics {
            metrics
                .enrichment_failures
                .add(1, &[KeyValue::new("field", field)]);
        }
        String::new()
    }
}

/// Holds one unit of the in-flight gauge, released when the task ends or is aborted.
struct InFlightGauge(Option<Metrics>);

impl InFlightGauge {
    fn enter(metrics: Option<Metrics>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.in_flight_events.add(1, &[]);
        }
        Self(metrics)
    }
}

impl Drop for InFlightGauge {
    fn drop(&mut self) {
        if let Some(metrics) = &self.0 {
            metrics.in_flight_events.add(-1, &[]);
        }
    }
}

/// Consumes the log stream, classifies each log and enriches accepted transfers
/// in background tasks.
pub struct TransferProcessor {
    classifier: TransferClassifier,
    enricher: Arc<TransferEnricher>,
    sink: Arc<dyn RecordSink>,
    admission: Arc<Semaphore>,
    grace_period: Duration,
    metrics: Option<Metrics>,
}

impl TransferProcessor {
    pub fn new(
        config: &Config,
        node: Arc<dyn NodeClient>,
        transport: Arc<dyn MetadataTransport>,
        sink: Arc<dyn RecordSink>,
        metrics: Option<Metrics>,
    ) -> Self {
        let reader = ContractReader::new(node, config.call_timeout(), metrics.clone());
        let fetcher = MetadataFetcher::new(
            transport,
            config.ipfs_gateway.clone(),
            config.call_timeout(),
        );
        let enricher = TransferEnricher::new(reader, fetcher, config.event_timeout(), metrics.clone());

        Self {
            classifier: TransferClassifier::from_config(config),
            enricher: Arc::new(enricher),
            sink,
            admission: Arc::new(Semaphore::new(config.max_in_flight_events.max(1))),
            grace_period: config.shutdown_grace_period(),
            metrics,
        }
    }

    /// Runs until `shutdown` fires, then gives in-flight transfers the grace
    /// period to finish.
    ///
    /// A log stream that ends without a shutdown signal is an error: in-flight
    /// transfers are still drained, then `ConnectionError::Closed` is returned.
    pub async fn run(
        &self,
        mut logs: mpsc::UnboundedReceiver<LogStreamItem>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut in_flight = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Shutting down transfer processing loop...");
                    break Ok(());
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!("Transfer enrichment task failed: {}", e);
                    }
                }
                item = logs.recv() => match item {
                    Some(Ok(log)) => {
                        let Some(event) = self.admit(log) else {
                            continue;
                        };

                        // Wait for a free slot before reading the next log
                        let permit = tokio::select! {
                            biased;

                            _ = shutdown.recv() => {
                                info!("Shutting down transfer processing loop...");
                                break Ok(());
                            }
                            permit = self.admission.clone().acquire_owned() => permit,
                        };

                        match permit {
                            Ok(permit) => self.spawn(event, permit, &mut in_flight),
                            Err(e) => break Err(anyhow!("Admission semaphore closed: {}", e)),
                        }
                    }
                    Some(Err(e)) => {
                        if let Some(metrics) = &self.metrics {
                            metrics.stream_errors.add(1, &[]);
                        }
                        self.sink.error(&e.to_string());
                    }
                    None => {
                        warn!("Log stream ended without a shutdown signal");
                        break Err(ConnectionError::Closed.into());
                    }
                }
            }
        };

        self.drain(in_flight).await;
        outcome
    }

    /// Classifies `log`, recording why it was rejected if it is not a transfer.
    fn admit(&self, log: RpcLogData) -> Option<TransferEvent> {
        if let Some(metrics) = &self.metrics {
            metrics.logs_received.add(1, &[]);
        }

        match self.classifier.try_classify(&log) {
            Ok(event) => Some(event),
            Err(rejection) => {
                debug!(
                    "Skipping log from {} in tx {:?}: {}",
                    log.address,
                    log.tx_hash,
                    rejection.as_str()
                );
                if let Some(metrics) = &self.metrics {
                    metrics
                        .logs_rejected
                        .add(1, &[KeyValue::new("reason", rejection.as_str())]);
                }
                None
            }
        }
    }

    fn spawn(&self, event: TransferEvent, permit: OwnedSemaphorePermit, in_flight: &mut JoinSet<()>) {
        let enricher = self.enricher.clone();
        let sink = self.sink.clone();
        let metrics = self.metrics.clone();

        in_flight.spawn(async move {
            let _permit = permit;
            let _gauge = InFlightGauge::enter(metrics.clone());
            let start = Instant::now();

            let record = enricher.enrich(event).await;
            sink.emit(&record);

            if let Some(metrics) = &metrics {
                metrics.transfers_emitted.add(1, &[]);
                metrics
                    .event_processing_time
                    .record(start.elapsed().as_secs_f64(), &[]);
            }
        });
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(
            "Waiting up to {:?} for {} in-flight transfers...",
            self.grace_period,
            in_flight.len()
        );

        let finished = tokio::time::timeout(self.grace_period, async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = joined {
                    error!("Transfer enrichment task failed: {}", e);
                }
            }
        })
        .await;

        if finished.is_err() {
            warn!(
                "Grace period elapsed, cancelling {} in-flight transfers",
                in_flight.len()
            );
            in_flight.shutdown().await;
        }
    }
}
