//! Transactional persistence of token transfers.
//!
//! The ingestion consumer is the only writer; the query service reads
//! concurrently. Backends are built through a [`StoreRegistry`] that the
//! binary constructs and passes around explicitly.

pub mod sqlite;

use alloy::rpc::types::Log;
use alloy_primitives::{Address, B256};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::repository::{Pagination, Transfer, TransfersFilter, WriteSummary};

pub use sqlite::SqliteStore;

/// Storage interface shared by the ingestion consumer and the query service.
///
/// All methods block on the underlying database and are expected to run on
/// a blocking-capable thread.
pub trait TransferStore: Send + Sync {
    /// Records every qualifying transfer in `logs`, registering unseen
    /// tokens. Atomic: on error nothing from the batch is persisted.
    fn write_batch(&self, logs: &[Log]) -> Result<WriteSummary, StoreError>;

    /// Deletes every transfer recorded under `block_hash`. Tokens are kept.
    fn remove_by_block(&self, block_hash: B256) -> Result<usize, StoreError>;

    fn list_tokens(&self, pagination: Pagination) -> Result<Vec<Address>, StoreError>;

    fn get_transfers(&self, filter: &TransfersFilter) -> Result<Vec<Transfer>, StoreError>;

    /// Releases the underlying connection. Later calls are no-ops.
    fn close(&self) -> Result<(), StoreError>;
}

pub type StoreFactory = fn(&StorageConfig) -> Result<Arc<dyn TransferStore>, StoreError>;

/// Maps backend names to their constructors.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: BTreeMap<String, StoreFactory>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the backends shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("sqlite", SqliteStore::factory);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, config: &StorageConfig) -> Result<Arc<dyn TransferStore>, StoreError> {
        let factory = self
            .factories
            .get(&config.backend)
            .ok_or_else(|| StoreError::UnknownBackend(config.backend.clone()))?;
        factory(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_registered_backend() {
        let registry = StoreRegistry::with_builtin();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["sqlite"]);

        let config = StorageConfig {
            backend: "sqlite".to_string(),
            endpoint: ":memory:".to_string(),
        };
        let store = registry.build(&config).unwrap();
        assert!(store.list_tokens(Pagination::default()).unwrap().is_empty());
        store.close().unwrap();
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = StorageConfig {
            backend: "postgresql".to_string(),
            endpoint: "user=postgres".to_string(),
        };
        let result = StoreRegistry::new().build(&config);
        assert!(matches!(result, Err(StoreError::UnknownBackend(name)) if name == "postgresql"));
    }
}
