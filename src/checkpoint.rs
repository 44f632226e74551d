//! Durable progress of the RPC event source.
//!
//! Keeps the last cursor the consumer applied and the hashes of the most
//! recent blocks, so a restart resumes where ingestion stopped and a shallow
//! reorg can be walked back to its fork point.

use alloy_primitives::B256;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;

use crate::feed::BlockCursor;

/// How many recent block hashes are kept for reorg detection.
pub const REORG_WINDOW: u64 = 64;

pub struct CheckpointStore {
    conn: Mutex<Connection>,
}

impl CheckpointStore {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cursor (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                number INTEGER NOT NULL,
                hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS recent_blocks (
                number INTEGER PRIMARY KEY,
                hash TEXT NOT NULL
            );",
        )?;
        debug!("Checkpoint store ready at {}", path);

        Ok(CheckpointStore {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        // A poisoned lock still guards a consistent connection: every write is
        // a single statement.
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }

    pub fn load_cursor(&self) -> rusqlite::Result<Option<BlockCursor>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT number, hash FROM cursor WHERE id = 0", [], |row| {
                Ok(BlockCursor {
                    number: row.get(0)?,
                    hash: parse_hash(row, 1)?,
                })
            })
            .optional()
        })
    }

    pub fn save_cursor(&self, cursor: &BlockCursor) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO cursor (id, number, hash) VALUES (0, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET number = excluded.number, hash = excluded.hash",
                params![cursor.number, format!("{:?}", cursor.hash)],
            )?;
            Ok(())
        })
    }

    /// Records the canonical hash of `number` and forgets blocks that fell
    /// out of the window.
    pub fn record_block(&self, number: u64, hash: B256) -> rusqlite::Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO recent_blocks (number, hash) VALUES (?1, ?2)",
                params![number, format!("{:?}", hash)],
            )?;
            conn.execute(
                "DELETE FROM recent_blocks WHERE number <= ?1",
                params![number.saturating_sub(REORG_WINDOW)],
            )?;
            Ok(())
        })
    }

    /// Recorded blocks at or below `number`, newest first.
    pub fn recent_blocks_from(&self, number: u64) -> rusqlite::Result<Vec<(u64, B256)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT number, hash FROM recent_blocks WHERE number <= ?1 ORDER BY number DESC",
            )?;
            let rows = stmt.query_map(params![number], |row| Ok((row.get(0)?, parse_hash(row, 1)?)))?;
            rows.collect()
        })
    }

    /// Drops recorded blocks above `number`, after a rewind.
    pub fn truncate_after(&self, number: u64) -> rusqlite::Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM recent_blocks WHERE number > ?1",
                params![number],
            )
        })
    }
}

fn parse_hash(row: &Row, index: usize) -> rusqlite::Result<B256> {
    B256::from_str(&row.get::<_, String>(index)?).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}
