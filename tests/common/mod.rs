#![allow(dead_code)]

use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, Bytes, LogData, U256};
use std::sync::Arc;
use tempfile::TempDir;
use token_tracker::events::Transfer;
use token_tracker::store::SqliteStore;

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn hash(n: u8) -> B256 {
    B256::with_last_byte(n)
}

/// A well-formed `Transfer` log emitted by token `token` in block `block`.
pub fn transfer_log(token: u8, from: u8, to: u8, value: u64, block: u8, index: u64) -> Log {
    let data = Transfer {
        from: addr(from),
        to: addr(to),
        value: U256::from(value),
    }
    .encode_log_data();
    with_data(token, data, block, index)
}

/// Same log with only the first `topics` topics kept.
pub fn with_topic_count(log: Log, topics: usize) -> Log {
    let mut all = log.topics().to_vec();
    all.resize(topics, B256::ZERO);
    let data = log.data().data.clone();
    let address = log.address();
    Log {
        inner: alloy_primitives::Log {
            address,
            data: LogData::new_unchecked(all, data),
        },
        ..log
    }
}

/// Same shape as a transfer but with the `Approval` event id.
pub fn approval_log(token: u8, owner: u8, spender: u8, block: u8, index: u64) -> Log {
    let transfer = transfer_log(token, owner, spender, 1, block, index);
    let mut topics = transfer.topics().to_vec();
    topics[0] = APPROVAL_TOPIC;
    let data = transfer.data().data.clone();
    with_data(token, LogData::new_unchecked(topics, data), block, index)
}

pub const APPROVAL_TOPIC: B256 =
    alloy_primitives::b256!("8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925");

/// Three topics but a data section too short to hold a value.
pub fn undecodable_log(token: u8, block: u8, index: u64) -> Log {
    let topics = transfer_log(token, 1, 2, 0, block, index).topics().to_vec();
    with_data(token, LogData::new_unchecked(topics, Bytes::from(vec![0u8; 3])), block, index)
}

pub fn removed_log(block: u8) -> Log {
    Log {
        block_hash: Some(hash(block)),
        removed: true,
        ..Log::default()
    }
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
        transaction_hash: Some(B256::with_last_byte(0xee)),
        transaction_index: Some(0),
        log_index: Some(index),
        removed: false,
    }
}

/// File-backed store in a fresh temporary directory.
pub fn file_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker.db");
    let store = SqliteStore::open(path.to_str().unwrap()).unwrap();
    (dir, Arc::new(store))
}
