use crate::query::formatters::{OutputFormat, format_tokens, format_transfers};
use crate::query::service::{QueryService, parse_addresses};
use crate::repository::{Pagination, TransfersFilter};
use anyhow::Result;

#[derive(Debug, Default)]
pub struct TransferQuery {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub tokens: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl TransferQuery {
    pub fn to_filter(&self) -> Result<TransfersFilter> {
        Ok(TransfersFilter {
            from: parse_addresses("from", self.from.iter().map(String::as_str))?,
            to: parse_addresses("to", self.to.iter().map(String::as_str))?,
            tokens: parse_addresses("token", self.tokens.iter().map(String::as_str))?,
            pagination: Pagination::new(self.limit, self.offset),
        })
    }
}

pub async fn cmd_tokens(
    service: &QueryService,
    pagination: Pagination,
    format: OutputFormat,
) -> Result<String> {
    let tokens = service.list_tokens(pagination).await?;
    Ok(format_tokens(&tokens, format))
}

pub async fn cmd_transfers(
    service: &QueryService,
    query: TransferQuery,
    format: OutputFormat,
) -> Result<String> {
    let filter = query.to_filter()?;
    let transfers = service.get_transfers(filter).await?;
    Ok(format_transfers(&transfers, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use std::sync::Arc;

    #[test]
    fn invalid_filter_address_is_rejected() {
        let query = TransferQuery {
            tokens: vec!["not-an-address".to_string()],
            ..TransferQuery::default()
        };
        let err = query.to_filter().unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[tokio::test]
    async fn empty_store_renders_empty_json() {
        let service = QueryService::new(Arc::new(SqliteStore::open(":memory:").unwrap()));
        let output = cmd_tokens(&service, Pagination::default(), OutputFormat::Json)
            .await
            .unwrap();
        assert_eq!(output, "[]");
    }
}
