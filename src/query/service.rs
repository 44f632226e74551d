//! Read-side operations shared by the HTTP surface and the query CLI.

use alloy_primitives::Address;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::QueryError;
use crate::repository::{Pagination, Transfer, TransfersFilter};
use crate::store::TransferStore;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_LIMIT: usize = 100;

/// Stateless, read-only view over a [`TransferStore`]. Cheap to clone.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn TransferStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn TransferStore>) -> Self {
        Self { store }
    }

    pub async fn list_tokens(&self, pagination: Pagination) -> Result<Vec<Address>, QueryError> {
        let store = self.store.clone();
        let tokens = tokio::task::spawn_blocking(move || store.list_tokens(pagination)).await??;
        Ok(tokens)
    }

    pub async fn get_transfers(&self, filter: TransfersFilter) -> Result<Vec<Transfer>, QueryError> {
        let store = self.store.clone();
        let transfers = tokio::task::spawn_blocking(move || store.get_transfers(&filter)).await??;
        Ok(transfers)
    }
}

pub fn parse_address(field: &'static str, value: &str) -> Result<Address, QueryError> {
    Address::from_str(value.trim()).map_err(|_| QueryError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

/// Parses every value of a repeated parameter. Each value may itself be a
/// comma-separated list.
pub fn parse_addresses<'a>(
    field: &'static str,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<Address>, QueryError> {
    values
        .into_iter()
        .flat_map(|value| value.split(','))
        .filter(|value| !value.trim().is_empty())
        .map(|value| parse_address(field, value))
        .collect()
}

/// Builds a page from raw `limit`/`offset` values. A missing limit falls
/// back to `default_limit`; an explicit `0` means no limit.
pub fn parse_pagination(
    limit: Option<&str>,
    offset: Option<&str>,
    default_limit: usize,
) -> Result<Pagination, QueryError> {
    let limit = match limit {
        Some(raw) => parse_number("limit", raw)?,
        None => default_limit,
    };
    let offset = match offset {
        Some(raw) => parse_number("offset", raw)?,
        None => 0,
    };
    Ok(Pagination::new(limit, offset))
}

/// SQLite binds LIMIT/OFFSET as signed 64-bit integers.
const MAX_PAGE_VALUE: usize = i64::MAX as usize;

fn parse_number(field: &'static str, raw: &str) -> Result<usize, QueryError> {
    raw.trim()
        .parse()
        .ok()
        .filter(|value| *value <= MAX_PAGE_VALUE)
        .ok_or_else(|| QueryError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn comma_lists_and_repeats_combine() {
        let addresses = parse_addresses(
            "from",
            [
                "0x0000000000000000000000000000000000000001,0x0000000000000000000000000000000000000002",
                "0x0000000000000000000000000000000000000003",
            ],
        )
        .unwrap();
        assert_eq!(
            addresses,
            vec![
                Address::with_last_byte(1),
                Address::with_last_byte(2),
                Address::with_last_byte(3)
            ]
        );
    }

    #[test]
    fn bad_address_names_the_field() {
        let err = parse_addresses("to", ["0x1234"]).unwrap_err();
        assert!(err.is_request_error());
        assert!(matches!(err, QueryError::InvalidAddress { field: "to", .. }));
    }

    #[test]
    fn pagination_defaults_and_errors() {
        assert_eq!(
            parse_pagination(None, None, DEFAULT_LIMIT).unwrap(),
            Pagination::new(100, 0)
        );
        assert_eq!(
            parse_pagination(Some("0"), Some("3"), DEFAULT_LIMIT).unwrap(),
            Pagination::new(0, 3)
        );
        assert!(matches!(
            parse_pagination(Some("-1"), None, DEFAULT_LIMIT),
            Err(QueryError::InvalidNumber { field: "limit", .. })
        ));
    }

    #[tokio::test]
    async fn store_errors_are_not_request_errors() {
        let store = Arc::new(SqliteStore::open(":memory:").unwrap());
        let service = QueryService::new(store.clone());
        assert!(service.list_tokens(Pagination::default()).await.unwrap().is_empty());

        store.close().unwrap();
        let err = service.list_tokens(Pagination::default()).await.unwrap_err();
        assert!(!err.is_request_error());
    }
}
