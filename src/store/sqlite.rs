//! SQLite backend built on the repositories in [`crate::repository`].

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::TransferStore;
use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::events::decode_transfer;
use crate::repository::{
    Database, Pagination, TokenRepository, Transfer, TransferRepository, TransfersFilter,
    WriteSummary,
};

pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn open(endpoint: &str) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(endpoint)?,
        })
    }

    pub fn factory(config: &StorageConfig) -> Result<Arc<dyn TransferStore>, StoreError> {
        Ok(Arc::new(Self::open(&config.endpoint)?))
    }

    pub fn transfer_count(&self) -> Result<usize, StoreError> {
        self.db
            .with_reader(|conn| TransferRepository::new(conn).count())
    }
}

impl TransferStore for SqliteStore {
    fn write_batch(&self, logs: &[Log]) -> Result<WriteSummary, StoreError> {
        let start = Instant::now();
        let mut guard = self.db.writer()?;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        // Dropping `tx` on an early return rolls the whole batch back.
        let tx = conn.transaction()?;
        let mut summary = WriteSummary::default();
        {
            let tokens = TokenRepository::new(&tx);
            let transfers = TransferRepository::new(&tx);

            for log in logs {
                let Some(transfer) = decode_transfer(log)? else {
                    // non-standard token
                    summary.logs_skipped += 1;
                    continue;
                };

                if tokens.insert_if_absent(&transfer.token)? {
                    summary.tokens_created += 1;
                }
                if transfers.insert(&transfer)? {
                    summary.transfers_written += 1;
                }
            }
        }
        tx.commit()?;

        debug!(
            "Wrote {} transfers ({} new tokens, {} skipped) in {:?}",
            summary.transfers_written,
            summary.tokens_created,
            summary.logs_skipped,
            start.elapsed()
        );
        Ok(summary)
    }

    fn remove_by_block(&self, block_hash: B256) -> Result<usize, StoreError> {
        let mut guard = self.db.writer()?;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let tx = conn.transaction()?;
        let deleted = TransferRepository::new(&tx).delete_by_block(&block_hash)?;
        tx.commit()?;

        debug!("Removed {} transfers of block {:?}", deleted, block_hash);
        Ok(deleted)
    }

    fn list_tokens(&self, pagination: Pagination) -> Result<Vec<Address>, StoreError> {
        self.db
            .with_reader(|conn| TokenRepository::new(conn).list(pagination))
    }

    fn get_transfers(&self, filter: &TransfersFilter) -> Result<Vec<Transfer>, StoreError> {
        self.db
            .with_reader(|conn| TransferRepository::new(conn).query_transfers(filter))
    }

    fn close(&self) -> Result<(), StoreError> {
        self.db.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Transfer as TransferEvent;
    use alloy::sol_types::SolEvent;
    use alloy_primitives::{Bytes, LogData, U256};

    fn addr(n: u8) -> Address {
        Address::with_last_byte(n)
    }

    fn hash(n: u8) -> B256 {
        B256::with_last_byte(n)
    }

    fn transfer_log(token: u8, from: u8, to: u8, value: u64, block: u8, index: u64) -> Log {
        let data = TransferEvent {
            from: addr(from),
            to: addr(to),
            value: U256::from(value),
        }
        .encode_log_data();
        with_data(token, data, block, index)
    }

    fn with_data(token: u8, data: LogData, block: u8, index: u64) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: addr(token),
                data,
            },
            block_hash: Some(hash(block)),
            block_number: Some(u64::from(block)),
            block_timestamp: None,
            transaction_hash: Some(hash(0xf0)),
            transaction_index: Some(0),
            log_index: Some(index),
            removed: false,
        }
    }

    fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_read_back() {
        let (_dir, store) = open_store();
        let logs = vec![
            transfer_log(0xa1, 1, 2, 1000, 1, 0),
            transfer_log(0xa1, 2, 3, 250, 1, 1),
            transfer_log(0xa1, 3, 1, 7, 1, 2),
        ];

        let summary = store.write_batch(&logs).unwrap();
        assert_eq!(summary.transfers_written, 3);
        assert_eq!(summary.tokens_created, 1);

        let transfers = store
            .get_transfers(&TransfersFilter::for_token(addr(0xa1)))
            .unwrap();
        assert_eq!(transfers.len(), 3);
        assert_eq!(transfers[0].from_address, addr(1));
        assert_eq!(transfers[0].value, U256::from(1000));
        assert_eq!(transfers[1].log_index, 1);

        assert_eq!(store.list_tokens(Pagination::default()).unwrap(), vec![addr(0xa1)]);
    }

    #[test]
    fn rewriting_the_same_log_is_a_no_op() {
        let (_dir, store) = open_store();
        let logs = vec![transfer_log(0xa1, 1, 2, 10, 1, 0)];

        store.write_batch(&logs).unwrap();
        let again = store.write_batch(&logs).unwrap();

        assert_eq!(again.transfers_written, 0);
        assert_eq!(again.tokens_created, 0);
        assert_eq!(store.transfer_count().unwrap(), 1);
    }

    #[test]
    fn failed_decode_rolls_back_the_batch() {
        let (_dir, store) = open_store();
        let good = transfer_log(0xa1, 1, 2, 10, 1, 0);
        let standard = TransferEvent {
            from: addr(1),
            to: addr(2),
            value: U256::from(1),
        }
        .encode_log_data();
        let broken = with_data(
            0xa2,
            LogData::new_unchecked(standard.topics().to_vec(), Bytes::new()),
            1,
            1,
        );

        let err = store.write_batch(&[good, broken]).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));

        assert_eq!(store.transfer_count().unwrap(), 0);
        assert!(store.list_tokens(Pagination::default()).unwrap().is_empty());
    }

    #[test]
    fn remove_unknown_block_is_a_no_op() {
        let (_dir, store) = open_store();
        store
            .write_batch(&[transfer_log(0xa1, 1, 2, 10, 1, 0)])
            .unwrap();

        assert_eq!(store.remove_by_block(hash(9)).unwrap(), 0);
        assert_eq!(store.transfer_count().unwrap(), 1);
    }

    #[test]
    fn removal_keeps_tokens() {
        let (_dir, store) = open_store();
        store
            .write_batch(&[transfer_log(0xa1, 1, 2, 10, 1, 0)])
            .unwrap();

        assert_eq!(store.remove_by_block(hash(1)).unwrap(), 1);
        assert_eq!(store.transfer_count().unwrap(), 0);
        assert_eq!(store.list_tokens(Pagination::default()).unwrap(), vec![addr(0xa1)]);
    }

    #[test]
    fn operations_fail_after_close() {
        let (_dir, store) = open_store();
        store.close().unwrap();

        assert!(matches!(
            store.write_batch(&[transfer_log(0xa1, 1, 2, 10, 1, 0)]),
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.list_tokens(Pagination::default()),
            Err(StoreError::Closed)
        ));
        store.close().unwrap();
    }
}
