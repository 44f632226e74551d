use super::models::Pagination;
use alloy_primitives::Address;
use rusqlite::params;
use std::str::FromStr;

use crate::error::StoreError;

pub struct TokenRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TokenRepository<'a> {
    const INSERT_TOKEN: &'static str = "INSERT OR IGNORE INTO tokens (id) VALUES (?1)";

    const SELECT_TOKENS: &'static str = "SELECT id FROM tokens ORDER BY rowid";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Registers `address` unless it is already known. Returns `true` if a
    /// row was created.
    pub fn insert_if_absent(&self, address: &Address) -> Result<bool, StoreError> {
        let mut stmt = self.conn.prepare_cached(Self::INSERT_TOKEN)?;
        let changed = stmt.execute(params![format!("{address:?}")])?;
        Ok(changed > 0)
    }

    pub fn list(&self, pagination: Pagination) -> Result<Vec<Address>, StoreError> {
        let query = format!("{}{}", Self::SELECT_TOKENS, pagination.to_sql());

        let mut stmt = self.conn.prepare(&query)?;
        let tokens = stmt
            .query_map([], |row| {
                Address::from_str(&row.get::<_, String>(0)?).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tokens)
    }
}
