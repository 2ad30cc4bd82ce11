//! Lifecycle of the node log subscription.
//!
//! The subscription is owned by a forwarder task that pushes every delivery
//! (a log or a stream error) onto an unbounded channel consumed by the
//! transfer processor.

use alloy_primitives::B256;
use alloy_provider::Provider;
use alloy_pubsub::Subscription;
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::indexer::rpc::logs::LogParser;
use crate::models::datasets::logs::RpcLogData;
use crate::models::errors::ConnectionError;

pub type LogStreamItem = Result<RpcLogData, ConnectionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Listening,
    ErrorRecovering,
    Closed,
}

#[async_trait]
pub trait LogSource: Send {
    /// Next delivery. Errors for which `is_terminal` holds end the stream.
    async fn next_log(&mut self) -> LogStreamItem;
}

#[async_trait]
impl LogSource for Subscription<Log> {
    async fn next_log(&mut self) -> LogStreamItem {
        match self.recv().await {
            Ok(log) => Ok(log.parse_log()),
            Err(RecvError::Lagged(skipped)) => Err(ConnectionError::Lagged { skipped }),
            Err(RecvError::Closed) => Err(ConnectionError::Closed),
        }
    }
}

/// Subscribes to logs whose first topic is `signature`.
pub async fn subscribe_transfer_logs<P>(
    provider: &P,
    signature: B256,
) -> Result<Subscription<Log>, ConnectionError>
where
    P: Provider,
{
    let filter = Filter::new().event_signature(signature);
    provider
        .subscribe_logs(&filter)
        .await
        .map_err(|e| ConnectionError::Subscribe {
            message: e.to_string(),
        })
}

pub struct LogSubscription {
    state: watch::Receiver<SubscriptionState>,
    handle: JoinHandle<()>,
}

impl LogSubscription {
    /// Awaits the handshake, then forwards deliveries to `tx` until shutdown,
    /// a terminal stream error, or the receiving side going away.
    ///
    /// A failed handshake is returned to the caller.
    pub async fn establish<S, F>(
        connect: F,
        tx: mpsc::UnboundedSender<LogStreamItem>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<Self, ConnectionError>
    where
        S: LogSource + 'static,
        F: Future<Output = Result<S, ConnectionError>>,
    {
        let (state_tx, state_rx) = watch::channel(SubscriptionState::Connecting);

        let source = match connect.await {
            Ok(source) => source,
            Err(e) => {
                state_tx.send_replace(SubscriptionState::Closed);
                return Err(e);
            }
        };

        info!("Log subscription established");
        state_tx.send_replace(SubscriptionState::Listening);
        let handle = tokio::spawn(forward_logs(source, tx, shutdown, state_tx));

        Ok(Self {
            state: state_rx,
            handle,
        })
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriptionState> {
        self.state.clone()
    }

    /// Waits for the forwarder to release the subscription.
    pub async fn closed(self) {
        if let Err(e) = self.handle.await {
            error!("Log forwarder task failed: {}", e);
        }
    }
}

async fn forward_logs<S: LogSource>(
    mut source: S,
    tx: mpsc::UnboundedSender<LogStreamItem>,
    mut shutdown: broadcast::Receiver<()>,
    state: watch::Sender<SubscriptionState>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Shutdown requested, closing log subscription...");
                break;
            }
            item = source.next_log() => match item {
                Ok(log) => {
                    if *state.borrow() == SubscriptionState::ErrorRecovering {
                        state.send_replace(SubscriptionState::Listening);
                    }
                    if tx.send(Ok(log)).is_err() {
                        info!("Log consumer went away, closing log subscription...");
                        break;
                    }
                }
                Err(e) if e.is_terminal() => {
                    error!("Log subscription ended: {}", e);
                    let _ = tx.send(Err(e));
                    break;
                }
                Err(e) => {
                    warn!("Log subscription error: {}", e);
                    state.send_replace(SubscriptionState::ErrorRecovering);
                    if tx.send(Err(e)).is_err() {
                        break;
                    }
                }
            }
        }
    }

    drop(source);
    state.send_replace(SubscriptionState::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedSource {
        items: VecDeque<LogStreamItem>,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LogSource for ScriptedSource {
        async fn next_log(&mut self) -> LogStreamItem {
            match self.items.pop_front() {
                Some(item) => item,
                // Keep the stream open like an idle node
                None => std::future::pending().await,
            }
        }
    }

    fn log(byte: u8) -> RpcLogData {
        RpcLogData {
            address: Address::repeat_byte(byte),
            topics: vec![B256::repeat_byte(byte)],
            tx_hash: Some(B256::repeat_byte(byte)),
            block_number: Some(u64::from(byte)),
            log_index: Some(0),
        }
    }

    fn source(items: Vec<LogStreamItem>, drops: &Arc<AtomicUsize>) -> ScriptedSource {
        ScriptedSource {
            items: items.into(),
            drops: drops.clone(),
        }
    }

    #[tokio::test]
    async fn test_stream_error_does_not_stop_delivery() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let items = vec![
            Ok(log(1)),
            Err(ConnectionError::Lagged { skipped: 3 }),
            Ok(log(2)),
        ];
        let subscription = LogSubscription::establish(
            async { Ok(source(items, &drops)) },
            tx,
            shutdown_rx,
        )
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), log(1));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(ConnectionError::Lagged { skipped: 3 })
        ));
        assert_eq!(rx.recv().await.unwrap().unwrap(), log(2));
        assert_eq!(subscription.state(), SubscriptionState::Listening);

        shutdown_tx.send(()).unwrap();
        subscription.closed().await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_subscription_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let subscription =
            LogSubscription::establish(async { Ok(source(Vec::new(), &drops)) }, tx, shutdown_rx)
                .await
                .unwrap();
        let mut state = subscription.watch_state();
        assert_eq!(*state.borrow(), SubscriptionState::Listening);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == SubscriptionState::Closed),
        )
        .await
        .unwrap()
        .unwrap();

        subscription.closed().await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_error_is_forwarded_and_closes() {
        let drops = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let items = vec![Ok(log(1)), Err(ConnectionError::Closed)];
        let subscription =
            LogSubscription::establish(async { Ok(source(items, &drops)) }, tx, shutdown_rx)
                .await
                .unwrap();

        assert!(rx.recv().await.unwrap().is_ok());
        assert!(matches!(rx.recv().await.unwrap(), Err(ConnectionError::Closed)));
        assert!(rx.recv().await.is_none());

        subscription.closed().await;
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_handshake_is_returned() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let result = LogSubscription::establish(
            async {
                Err::<ScriptedSource, _>(ConnectionError::Subscribe {
                    message: "method not found".to_string(),
                })
            },
            tx,
            shutdown_rx,
        )
        .await;

        assert!(matches!(result, Err(ConnectionError::Subscribe { .. })));
    }
}
