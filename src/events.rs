use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};

use crate::error::DecodeError;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Event id plus the two indexed addresses. Anything else (ERC-721 style
/// transfers with an indexed token id, anonymous variants) is not tracked.
pub const TRANSFER_TOPIC_COUNT: usize = 3;

/// A transfer log decoded together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_hash: B256,
    pub transaction_hash: B256,
    pub log_index: u64,
}

pub fn decode_transfer_event(log: &Log) -> Result<Transfer, DecodeError> {
    Ok(Transfer::decode_log_data(log.data())?)
}

/// Decodes `log` as a token transfer.
///
/// Returns `Ok(None)` for logs that are not a standard `Transfer`: a
/// different topic count or a different event id. Those are skipped, not
/// rejected.
pub fn decode_transfer(log: &Log) -> Result<Option<DecodedTransfer>, DecodeError> {
    let topics = log.topics();
    if topics.len() != TRANSFER_TOPIC_COUNT || topics[0] != Transfer::SIGNATURE_HASH {
        return Ok(None);
    }

    let block_hash = log.block_hash.ok_or(DecodeError::MissingField("block hash"))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or(DecodeError::MissingField("transaction hash"))?;
    let log_index = log.log_index.ok_or(DecodeError::MissingField("log index"))?;

    let event = decode_transfer_event(log)?;

    Ok(Some(DecodedTransfer {
        token: log.address(),
        from: event.from,
        to: event.to,
        value: event.value,
        block_hash,
        transaction_hash,
        log_index,
    }))
}
