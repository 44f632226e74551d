//! Error types for the tracker pipeline.

use thiserror::Error;

/// A log had the shape of a `Transfer` event but could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log is missing its {0}")]
    MissingField(&'static str),

    #[error("malformed transfer event: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// Errors raised by a [`TransferStore`](crate::store::TransferStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("store is closed")]
    Closed,

    #[error("store lock poisoned")]
    Poisoned,

    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),
}

/// Terminal errors of the ingestion consumer.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Returns `true` when the batch was rejected because a log failed to decode.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Store(StoreError::Decode(_)))
    }
}

/// Errors surfaced to query callers.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid address for '{field}': {value}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("invalid value for '{field}': {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("query worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl QueryError {
    /// Returns `true` if the caller sent malformed parameters.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. } | Self::InvalidNumber { .. }
        )
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Errors that end the upstream event source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rpc error: {0}")]
    Rpc(#[from] anyhow::Error),

    #[error("checkpoint store error: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("reorg at block {block_number} is deeper than the tracked window")]
    ReorgTooDeep { block_number: u64 },

    #[error("block {0} not found")]
    MissingBlock(u64),

    #[error(transparent)]
    FeedClosed(#[from] crate::feed::FeedClosed),
}
