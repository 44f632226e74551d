use super::models::{Transfer, TransfersFilter};
use alloy_primitives::{Address, B256, U256};
use rusqlite::{Row, ToSql, params, params_from_iter};
use std::str::FromStr;

use crate::error::StoreError;
use crate::events::DecodedTransfer;

pub struct TransferRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferRepository<'a> {
    const INSERT_TRANSFER: &'static str = "INSERT OR IGNORE INTO transfers (
            token_id, block_hash, txn_hash, log_index,
            from_addr, to_addr, value
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

    const DELETE_BY_BLOCK: &'static str = "DELETE FROM transfers WHERE block_hash = ?1";

    const SELECT_TRANSFER: &'static str = "SELECT token_id, from_addr, to_addr, value, block_hash, txn_hash, log_index FROM transfers";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Inserts one decoded transfer. Returns `false` when the same
    /// (block, transaction, log index) was already recorded.
    pub fn insert(&self, transfer: &DecodedTransfer) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_TRANSFER)?;
        let changed = stmt.execute(params![
            format!("{:?}", transfer.token),
            format!("{:?}", transfer.block_hash),
            format!("{:?}", transfer.transaction_hash),
            transfer.log_index,
            format!("{:?}", transfer.from),
            format!("{:?}", transfer.to),
            transfer.value.to_string(),
        ])?;
        Ok(changed > 0)
    }

    pub fn delete_by_block(&self, block_hash: &B256) -> Result<usize, StoreError> {
        let deleted = self
            .conn
            .execute(Self::DELETE_BY_BLOCK, params![format!("{block_hash:?}")])?;
        Ok(deleted)
    }

    pub fn query_transfers(&self, filter: &TransfersFilter) -> Result<Vec<Transfer>, StoreError> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        for (column, addresses) in [
            ("from_addr", &filter.from),
            ("to_addr", &filter.to),
            ("token_id", &filter.tokens),
        ] {
            if addresses.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; addresses.len()].join(", ");
            conditions.push(format!("{column} IN ({placeholders})"));
            for address in addresses {
                params.push(Box::new(format!("{address:?}")));
            }
        }

        let mut query = Self::SELECT_TRANSFER.to_string();

        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }

        query.push_str(" ORDER BY rowid");
        query.push_str(&filter.pagination.to_sql());

        let mut stmt = self.conn.prepare(&query)?;
        let transfers = stmt
            .query_map(params_from_iter(params), Self::row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transfers)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM transfers", [], |row| row.get(0))?;
        Ok(total)
    }

    fn row_to_transfer(row: &Row) -> rusqlite::Result<Transfer> {
        Ok(Transfer {
            token_address: parse_column::<Address>(row, 0)?,
            from_address: parse_column::<Address>(row, 1)?,
            to_address: parse_column::<Address>(row, 2)?,
            value: parse_column::<U256>(row, 3)?,
            block_hash: parse_column::<B256>(row, 4)?,
            transaction_hash: parse_column::<B256>(row, 5)?,
            log_index: row.get(6)?,
        })
    }
}

fn parse_column<T>(row: &Row, index: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(&row.get::<_, String>(index)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}
