//! Lifecycle controller: starts the event source and the consumer, owns
//! cancellation, and shuts both down in order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::consumer::{ConsumerState, IngestionConsumer};
use crate::error::{IngestError, StoreError};
use crate::feed::{EventSource, FeedSink};
use crate::store::TransferStore;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("ingestion stopped: {0}")]
    Ingest(#[from] IngestError),

    #[error("event source failed: {0}")]
    Source(anyhow::Error),

    #[error("failed to close store: {0}")]
    Close(StoreError),

    #[error("task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Graceful,
    TimedOut,
}

pub struct Tracker {
    cancel: CancellationToken,
    store: Arc<dyn TransferStore>,
    state: watch::Receiver<ConsumerState>,
    consumer: Option<JoinHandle<Result<(), IngestError>>>,
    consumer_result: Option<Result<(), IngestError>>,
    source: JoinHandle<anyhow::Result<()>>,
}

impl Tracker {
    /// Spawns `source` and the ingestion consumer, connected by a queue of
    /// `queue_capacity` messages.
    pub fn start<S: EventSource>(
        source: S,
        store: Arc<dyn TransferStore>,
        queue_capacity: usize,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(queue_capacity);
        let (state_tx, state_rx) = watch::channel(ConsumerState::Idle);
        let (applied_tx, applied_rx) = watch::channel(None);

        let source = tokio::spawn(source.run(FeedSink::new(tx, applied_rx), cancel.child_token()));

        let consumer = IngestionConsumer::new(store.clone(), state_tx, applied_tx);
        let consumer = tokio::spawn(consumer.run(rx, cancel.clone()));

        info!("Tracker started with queue capacity {}", queue_capacity);

        Tracker {
            cancel,
            store,
            state: state_rx,
            consumer: Some(consumer),
            consumer_result: None,
            source,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Resolves once the consumer has stopped on its own, either because the
    /// feed closed or because an event failed. Cancel-safe.
    pub async fn stopped(&mut self) {
        if let Some(handle) = self.consumer.as_mut() {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(IngestError::Worker(e)),
            };
            self.consumer = None;
            self.consumer_result = Some(result);
        }
    }

    /// Cancels ingestion, waits for the in-flight batch, closes the store and
    /// releases the source. Gives up after `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<ShutdownOutcome, TrackerError> {
        self.shutdown_by(Instant::now() + timeout).await
    }

    /// Same as [`Tracker::shutdown`], bounded by an absolute deadline so the
    /// caller can share one budget across several shutdown steps.
    pub async fn shutdown_by(self, deadline: Instant) -> Result<ShutdownOutcome, TrackerError> {
        info!("Shutting down tracker");

        match tokio::time::timeout_at(deadline, self.shutdown_inner()).await {
            Ok(result) => result.map(|()| ShutdownOutcome::Graceful),
            Err(_) => {
                warn!("Tracker shutdown did not finish before its deadline");
                Ok(ShutdownOutcome::TimedOut)
            }
        }
    }

    async fn shutdown_inner(self) -> Result<(), TrackerError> {
        self.cancel.cancel();

        let consumer_result = match (self.consumer, self.consumer_result) {
            (_, Some(result)) => result,
            (Some(handle), None) => handle.await?,
            (None, None) => Ok(()),
        };

        let store = self.store;
        let closed = tokio::task::spawn_blocking(move || store.close()).await?;

        let source_result = self.source.await?;

        // The ingestion error is the root cause when several steps failed.
        consumer_result?;
        closed.map_err(TrackerError::Close)?;
        if let Err(e) = source_result {
            error!("Event source failed: {:#}", e);
            return Err(TrackerError::Source(e));
        }

        info!("Tracker stopped");
        Ok(())
    }
}
