//! Types exchanged between an event source and the ingestion consumer.

use alloy::rpc::types::Log;
use alloy_primitives::B256;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::DecodeError;

/// Position in the chain reached by a [`BlockEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCursor {
    pub number: u64,
    pub hash: B256,
}

/// One unit of consumption: logs of newly accepted blocks and logs of
/// blocks invalidated by a reorg.
#[derive(Debug, Clone, Default)]
pub struct BlockEvent {
    pub added_logs: Vec<Log>,
    pub removed_logs: Vec<Log>,
    pub cursor: Option<BlockCursor>,
}

impl BlockEvent {
    pub fn added(logs: Vec<Log>) -> Self {
        Self {
            added_logs: logs,
            ..Self::default()
        }
    }

    pub fn with_cursor(mut self, cursor: BlockCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Distinct block hashes of the removed logs, in first-seen order.
    pub fn removed_block_hashes(&self) -> Result<Vec<B256>, DecodeError> {
        let mut hashes: Vec<B256> = Vec::new();
        for log in &self.removed_logs {
            let hash = log.block_hash.ok_or(DecodeError::MissingField("block hash"))?;
            if !hashes.contains(&hash) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }
}

/// Messages carried by the ingestion queue.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Block(BlockEvent),
    /// The source caught up with the chain head and switches to polling.
    Synced { head: u64 },
}

#[derive(Debug, thiserror::Error)]
#[error("ingestion queue closed")]
pub struct FeedClosed;

/// Producer half handed to an [`EventSource`].
#[derive(Clone)]
pub struct FeedSink {
    tx: mpsc::Sender<FeedMessage>,
    applied: watch::Receiver<Option<BlockCursor>>,
}

impl FeedSink {
    pub fn new(
        tx: mpsc::Sender<FeedMessage>,
        applied: watch::Receiver<Option<BlockCursor>>,
    ) -> Self {
        Self { tx, applied }
    }

    /// Waits for queue capacity. Fails once the consumer is gone.
    pub async fn send(&self, message: FeedMessage) -> Result<(), FeedClosed> {
        self.tx.send(message).await.map_err(|_| FeedClosed)
    }

    /// Cursor of the last event the consumer committed.
    pub fn last_applied(&self) -> Option<BlockCursor> {
        *self.applied.borrow()
    }

    /// Ends the feed and waits for the consumer to stop, returning the last
    /// cursor it committed.
    pub async fn close(self) -> Option<BlockCursor> {
        let FeedSink { tx, mut applied } = self;
        drop(tx);
        while applied.changed().await.is_ok() {}
        let last = *applied.borrow();
        last
    }
}

/// Produces the ordered stream of block events. Implementations own reorg
/// detection; the consumer only reacts.
pub trait EventSource: Send + 'static {
    /// Runs until the chain feed ends, the sink closes, or `cancel` fires.
    fn run(self, sink: FeedSink, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>;
}
