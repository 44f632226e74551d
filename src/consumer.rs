//! The single sequential writer.
//!
//! Drains [`FeedMessage`]s one at a time and applies each block event to the
//! store: removals first, then the added logs as one transaction. Draining
//! sequentially is what keeps store writes in arrival order.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::{IngestError, StoreError};
use crate::feed::{BlockCursor, BlockEvent, FeedMessage};
use crate::repository::WriteSummary;
use crate::store::TransferStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Syncing,
    Polling,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Idle => "idle",
            ConsumerState::Syncing => "syncing",
            ConsumerState::Polling => "polling",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the loop does after one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventSummary {
    pub removed_blocks: usize,
    pub removed_transfers: usize,
    pub written: WriteSummary,
}

pub struct IngestionConsumer {
    store: Arc<dyn TransferStore>,
    state: watch::Sender<ConsumerState>,
    applied: watch::Sender<Option<BlockCursor>>,
}

impl IngestionConsumer {
    pub fn new(
        store: Arc<dyn TransferStore>,
        state: watch::Sender<ConsumerState>,
        applied: watch::Sender<Option<BlockCursor>>,
    ) -> Self {
        Self {
            store,
            state,
            applied,
        }
    }

    /// Consumes `rx` until the feed closes, `cancel` fires, or an event
    /// fails. Cancellation is only observed between events.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<FeedMessage>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        self.transition(ConsumerState::Syncing);

        let result = loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Ingestion cancelled");
                    break Ok(());
                }
                message = rx.recv() => message,
            };

            match self.step(message).await {
                Ok(Step::Continue) => {}
                Ok(Step::Finished) => {
                    info!("Event feed closed");
                    break Ok(());
                }
                Err(e) => {
                    error!("Ingestion failed: {}", e);
                    break Err(e);
                }
            }
        };

        self.transition(ConsumerState::Stopped);
        result
    }

    pub async fn step(&self, message: Option<FeedMessage>) -> Result<Step, IngestError> {
        match message {
            None => Ok(Step::Finished),
            Some(FeedMessage::Synced { head }) => {
                info!("Caught up to block {}. Entering polling mode...", head);
                self.transition(ConsumerState::Polling);
                Ok(Step::Continue)
            }
            Some(FeedMessage::Block(event)) => {
                let cursor = event.cursor;
                self.apply(event).await?;
                if cursor.is_some() {
                    self.applied.send_replace(cursor);
                }
                Ok(Step::Continue)
            }
        }
    }

    async fn apply(&self, event: BlockEvent) -> Result<EventSummary, IngestError> {
        let store = self.store.clone();

        // Store calls block on SQLite.
        let summary =
            tokio::task::spawn_blocking(move || apply_event(store.as_ref(), &event)).await??;

        if summary.removed_blocks > 0 {
            info!(
                "Rolled back {} transfers from {} removed blocks",
                summary.removed_transfers, summary.removed_blocks
            );
        }
        Ok(summary)
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Consumer state {} -> {}", previous, next);
        }
    }
}

/// Applies one event: every removed block first, then the added logs.
pub fn apply_event(store: &dyn TransferStore, event: &BlockEvent) -> Result<EventSummary, StoreError> {
    let start = Instant::now();
    let mut summary = EventSummary::default();

    for block_hash in event.removed_block_hashes()? {
        summary.removed_transfers += store.remove_by_block(block_hash)?;
        summary.removed_blocks += 1;
    }

    if !event.added_logs.is_empty() {
        summary.written = store.write_batch(&event.added_logs)?;
        info!(
            "Inserted {} transfers in {:?}",
            summary.written.transfers_written,
            start.elapsed()
        );
    }

    Ok(summary)
}
