//! Follows the chain over JSON-RPC and turns `Transfer` logs into block
//! events: a catch-up sync in `batch_size` ranges, then polling at the head
//! with reorg detection against the recent-block window.

use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::B256;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointStore, REORG_WINDOW};
use crate::config::TrackerConfig;
use crate::error::SourceError;
use crate::events::Transfer;
use crate::feed::{BlockCursor, BlockEvent, EventSource, FeedMessage, FeedSink};
use crate::rpc::RpcClient;

const RATE_LIMIT_DELAY_MS: u64 = 200; // minimum spacing between sync ranges

/// Read access to the chain needed by [`RpcEventSource`].
pub trait ChainReader: Send + Sync + 'static {
    fn head(&self) -> BoxFuture<'_, anyhow::Result<u64>>;
    fn block_hash(&self, number: u64) -> BoxFuture<'_, anyhow::Result<Option<B256>>>;
    /// `Transfer` logs of every contract in `[from, to]`, in chain order.
    fn transfer_logs(&self, from: u64, to: u64) -> BoxFuture<'_, anyhow::Result<Vec<Log>>>;
}

impl ChainReader for RpcClient {
    fn head(&self) -> BoxFuture<'_, anyhow::Result<u64>> {
        self.get_latest_block().boxed()
    }

    fn block_hash(&self, number: u64) -> BoxFuture<'_, anyhow::Result<Option<B256>>> {
        self.get_block_hash(number).boxed()
    }

    fn transfer_logs(&self, from: u64, to: u64) -> BoxFuture<'_, anyhow::Result<Vec<Log>>> {
        self.get_logs(from, to, Transfer::SIGNATURE_HASH).boxed()
    }
}

/// Blocks to roll back, newest first, and the block they fork from.
struct Rewind {
    fork: BlockCursor,
    orphaned: Vec<(u64, B256)>,
}

pub struct RpcEventSource<C = RpcClient> {
    chain: C,
    checkpoint: Arc<CheckpointStore>,
    batch_size: u64,
    poll_interval: Duration,
    progress: bool,
}

impl<C: ChainReader> RpcEventSource<C> {
    pub fn new(chain: C, checkpoint: Arc<CheckpointStore>, batch_size: u64) -> Self {
        RpcEventSource {
            chain,
            checkpoint,
            batch_size: batch_size.max(1),
            poll_interval: Duration::from_secs(12),
            progress: true,
        }
    }

    pub fn from_config(chain: C, checkpoint: Arc<CheckpointStore>, config: &TrackerConfig) -> Self {
        Self::new(chain, checkpoint, config.batch_size)
            .with_poll_interval(Duration::from_secs(config.poll_interval_secs))
            .with_progress(config.progress)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    async fn follow(&self, sink: &FeedSink) -> Result<(), SourceError> {
        let resume = self.checkpoint.load_cursor()?;
        let mut next_block = match resume {
            Some(cursor) => {
                // Blocks past the cursor were emitted but never applied.
                self.checkpoint.truncate_after(cursor.number)?;
                info!("Resuming scan from block {}", cursor.number + 1);
                cursor.number + 1
            }
            None => {
                info!("No checkpoint found, starting scan from genesis");
                0
            }
        };
        let mut saved = resume;
        let mut synced = false;

        loop {
            let loop_start = Instant::now();
            self.persist_applied(sink, &mut saved)?;

            let head = self.chain.head().await?;
            if next_block > head {
                if !synced {
                    synced = true;
                    sink.send(FeedMessage::Synced { head }).await?;
                }
                sleep(self.poll_interval).await;
                continue;
            }

            if synced && next_block > 0 {
                if let Some(rewind) = self.detect_reorg(next_block - 1).await? {
                    next_block = rewind.fork.number + 1;
                    sink.send(FeedMessage::Block(self.roll_back(rewind)?)).await?;
                    continue;
                }
            }

            let to_block = next_block.saturating_add(self.batch_size - 1).min(head);
            let logs = self.chain.transfer_logs(next_block, to_block).await?;
            let hash = self
                .chain
                .block_hash(to_block)
                .await?
                .ok_or(SourceError::MissingBlock(to_block))?;

            self.remember(&logs, to_block, hash)?;
            self.report_progress(next_block, to_block, head, logs.len());

            let cursor = BlockCursor {
                number: to_block,
                hash,
            };
            sink.send(FeedMessage::Block(BlockEvent::added(logs).with_cursor(cursor)))
                .await?;
            next_block = to_block + 1;

            if !synced {
                let elapsed = loop_start.elapsed();
                let target = Duration::from_millis(RATE_LIMIT_DELAY_MS);
                if elapsed < target {
                    sleep(target - elapsed).await;
                }
            }
        }
    }

    /// Compares the recorded window with the chain, starting at `tip`.
    async fn detect_reorg(&self, tip: u64) -> Result<Option<Rewind>, SourceError> {
        let mut orphaned = Vec::new();

        for (number, hash) in self.checkpoint.recent_blocks_from(tip)? {
            if self.chain.block_hash(number).await? == Some(hash) {
                if orphaned.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(Rewind {
                    fork: BlockCursor { number, hash },
                    orphaned,
                }));
            }
            orphaned.push((number, hash));
        }

        if orphaned.is_empty() {
            Ok(None)
        } else {
            Err(SourceError::ReorgTooDeep { block_number: tip })
        }
    }

    fn roll_back(&self, rewind: Rewind) -> Result<BlockEvent, SourceError> {
        warn!(
            "Reorg detected: rolling back {} blocks to fork point {}",
            rewind.orphaned.len(),
            rewind.fork.number
        );
        self.checkpoint.truncate_after(rewind.fork.number)?;

        let removed_logs = rewind
            .orphaned
            .into_iter()
            .map(|(number, hash)| Log {
                block_hash: Some(hash),
                block_number: Some(number),
                removed: true,
                ..Log::default()
            })
            .collect();

        Ok(BlockEvent {
            added_logs: Vec::new(),
            removed_logs,
            cursor: Some(rewind.fork),
        })
    }

    /// Records the hashes needed to detect a reorg of this range: every
    /// block near `to_block` that carries transfers, and `to_block` itself.
    fn remember(&self, logs: &[Log], to_block: u64, hash: B256) -> Result<(), SourceError> {
        let mut last = None;
        for log in logs {
            let (Some(number), Some(block_hash)) = (log.block_number, log.block_hash) else {
                continue;
            };
            if number + REORG_WINDOW > to_block && number < to_block && last != Some(number) {
                self.checkpoint.record_block(number, block_hash)?;
                last = Some(number);
            }
        }
        self.checkpoint.record_block(to_block, hash)?;
        Ok(())
    }

    fn persist_applied(
        &self,
        sink: &FeedSink,
        saved: &mut Option<BlockCursor>,
    ) -> Result<(), SourceError> {
        match sink.last_applied() {
            Some(cursor) if Some(cursor) != *saved => {
                self.checkpoint.save_cursor(&cursor)?;
                debug!("Checkpoint advanced to block {}", cursor.number);
                *saved = Some(cursor);
            }
            _ => {}
        }
        Ok(())
    }

    fn report_progress(&self, from: u64, to: u64, head: u64, logs: usize) {
        if self.progress {
            info!(
                "Fetched {} logs for blocks {} to {} ({} behind head {})",
                logs,
                from,
                to,
                head - to,
                head
            );
        } else {
            debug!("Fetched {} logs for blocks {} to {}", logs, from, to);
        }
    }
}

impl<C: ChainReader> EventSource for RpcEventSource<C> {
    fn run(self, sink: FeedSink, cancel: CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> {
        async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Ok(()),
                result = self.follow(&sink) => result,
            };

            // Persist whatever the consumer finished before it stopped.
            if let Some(cursor) = sink.close().await {
                self.checkpoint.save_cursor(&cursor)?;
                info!("Checkpoint saved at block {}", cursor.number);
            }

            match result {
                Ok(()) | Err(SourceError::FeedClosed(_)) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};
    use std::sync::Mutex;
    use tokio::sync::{mpsc, watch};
    use tokio::task::JoinHandle;

    fn block_hash(salt: u8, number: u64) -> B256 {
        let mut bytes = [0u8; 32];
        bytes[0] = salt;
        bytes[24..].copy_from_slice(&number.to_be_bytes());
        B256::from(bytes)
    }

    /// One transfer log per block.
    struct FakeChain {
        blocks: Mutex<Vec<B256>>,
    }

    impl FakeChain {
        fn new(len: u64) -> Arc<Self> {
            Arc::new(FakeChain {
                blocks: Mutex::new((0..len).map(|n| block_hash(0, n)).collect()),
            })
        }

        /// Replaces everything from `at` with `count` blocks of a new branch.
        fn fork(&self, at: u64, count: u64, salt: u8) {
            let mut blocks = self.blocks.lock().unwrap();
            blocks.truncate(at as usize);
            blocks.extend((at..at + count).map(|n| block_hash(salt, n)));
        }

        fn log(number: u64, hash: B256) -> Log {
            Log {
                inner: alloy_primitives::Log {
                    address: Address::with_last_byte(0xa1),
                    data: Transfer {
                        from: Address::with_last_byte(1),
                        to: Address::with_last_byte(2),
                        value: U256::from(number),
                    }
                    .encode_log_data(),
                },
                block_hash: Some(hash),
                block_number: Some(number),
                block_timestamp: None,
                transaction_hash: Some(B256::with_last_byte(0xee)),
                transaction_index: Some(0),
                log_index: Some(0),
                removed: false,
            }
        }
    }

    impl ChainReader for Arc<FakeChain> {
        fn head(&self) -> BoxFuture<'_, anyhow::Result<u64>> {
            let len = self.blocks.lock().unwrap().len() as u64;
            async move { Ok(len - 1) }.boxed()
        }

        fn block_hash(&self, number: u64) -> BoxFuture<'_, anyhow::Result<Option<B256>>> {
            let hash = self.blocks.lock().unwrap().get(number as usize).copied();
            async move { Ok(hash) }.boxed()
        }

        fn transfer_logs(&self, from: u64, to: u64) -> BoxFuture<'_, anyhow::Result<Vec<Log>>> {
            let blocks = self.blocks.lock().unwrap();
            let logs = (from..=to)
                .filter_map(|n| blocks.get(n as usize).map(|hash| FakeChain::log(n, *hash)))
                .collect();
            async move { Ok(logs) }.boxed()
        }
    }

    struct Harness {
        handle: JoinHandle<anyhow::Result<()>>,
        rx: mpsc::Receiver<FeedMessage>,
        applied: watch::Sender<Option<BlockCursor>>,
        cancel: CancellationToken,
    }

    impl Harness {
        fn start(chain: Arc<FakeChain>, checkpoint: Arc<CheckpointStore>, batch_size: u64) -> Self {
            let (tx, rx) = mpsc::channel(16);
            let (applied, applied_rx) = watch::channel(None);
            let cancel = CancellationToken::new();

            let source = RpcEventSource::new(chain, checkpoint, batch_size)
                .with_poll_interval(Duration::from_millis(10))
                .with_progress(false);
            let handle = tokio::spawn(source.run(FeedSink::new(tx, applied_rx), cancel.clone()));

            Harness {
                handle,
                rx,
                applied,
                cancel,
            }
        }

        async fn next(&mut self) -> FeedMessage {
            tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
                .await
                .expect("source went quiet")
                .expect("feed closed")
        }

        async fn next_block(&mut self) -> BlockEvent {
            match self.next().await {
                FeedMessage::Block(event) => event,
                other => panic!("expected a block event, got {other:?}"),
            }
        }

        async fn stop(self) -> anyhow::Result<()> {
            self.cancel.cancel();
            drop(self.applied);
            self.handle.await.unwrap()
        }
    }

    #[tokio::test]
    async fn syncs_in_batches_then_reports_synced() {
        let chain = FakeChain::new(10);
        let checkpoint = Arc::new(CheckpointStore::open(":memory:").unwrap());
        let mut harness = Harness::start(chain, checkpoint.clone(), 4);

        let mut ranges = Vec::new();
        for _ in 0..3 {
            let event = harness.next_block().await;
            ranges.push((event.added_logs.len(), event.cursor.unwrap().number));
        }
        assert_eq!(ranges, vec![(4, 3), (4, 7), (2, 9)]);
        assert!(matches!(harness.next().await, FeedMessage::Synced { head: 9 }));

        let applied = BlockCursor {
            number: 9,
            hash: block_hash(0, 9),
        };
        harness.applied.send_replace(Some(applied));
        harness.stop().await.unwrap();

        assert_eq!(checkpoint.load_cursor().unwrap(), Some(applied));
    }

    #[tokio::test]
    async fn resumes_after_the_checkpoint() {
        let chain = FakeChain::new(8);
        let checkpoint = Arc::new(CheckpointStore::open(":memory:").unwrap());
        checkpoint
            .save_cursor(&BlockCursor {
                number: 4,
                hash: block_hash(0, 4),
            })
            .unwrap();

        let mut harness = Harness::start(chain, checkpoint, 100);
        let event = harness.next_block().await;

        let numbers: Vec<u64> = event
            .added_logs
            .iter()
            .filter_map(|log| log.block_number)
            .collect();
        assert_eq!(numbers, vec![5, 6, 7]);
        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shallow_reorg_is_rolled_back_and_refetched() {
        let chain = FakeChain::new(6);
        let checkpoint = Arc::new(CheckpointStore::open(":memory:").unwrap());
        let mut harness = Harness::start(chain.clone(), checkpoint, 10);

        harness.next_block().await;
        assert!(matches!(harness.next().await, FeedMessage::Synced { head: 5 }));

        chain.fork(5, 2, 1);

        let rollback = harness.next_block().await;
        assert!(rollback.added_logs.is_empty());
        assert_eq!(rollback.removed_block_hashes().unwrap(), vec![block_hash(0, 5)]);
        assert_eq!(
            rollback.cursor,
            Some(BlockCursor {
                number: 4,
                hash: block_hash(0, 4)
            })
        );

        let replay = harness.next_block().await;
        let hashes: Vec<B256> = replay.added_logs.iter().filter_map(|l| l.block_hash).collect();
        assert_eq!(hashes, vec![block_hash(1, 5), block_hash(1, 6)]);
        assert_eq!(replay.cursor.unwrap().hash, block_hash(1, 6));

        harness.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reorg_past_the_window_is_fatal() {
        let chain = FakeChain::new(3);
        let checkpoint = Arc::new(CheckpointStore::open(":memory:").unwrap());
        let mut harness = Harness::start(chain.clone(), checkpoint, 10);

        harness.next_block().await;
        assert!(matches!(harness.next().await, FeedMessage::Synced { .. }));

        chain.fork(0, 4, 1);

        drop(harness.applied);
        let err = harness.handle.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::ReorgTooDeep { block_number: 2 })
        ));
    }
}
