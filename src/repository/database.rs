use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::StoreError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Owns the single writer connection of a SQLite database.
///
/// Reads on file-backed databases go through short-lived read-only
/// connections, so a query never waits on the writer's lock. In WAL mode
/// those readers only ever see committed transactions.
pub struct Database {
    location: Location,
    writer: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

impl Database {
    /// Opens (or creates) the database and bootstraps the schema.
    ///
    /// Accepts a plain path, a `sqlite:` prefixed path, or `:memory:`.
    pub fn open(endpoint: &str) -> Result<Self, StoreError> {
        let path = endpoint.strip_prefix("sqlite:").unwrap_or(endpoint);
        let path = path.strip_prefix("//").unwrap_or(path);

        let (location, conn) = if path == ":memory:" {
            (Location::Memory, Connection::open_in_memory()?)
        } else {
            let conn = Connection::open(path)?;
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            debug!("Opened {} with journal mode {}", path, mode);
            (Location::File(PathBuf::from(path)), conn)
        };
        conn.busy_timeout(BUSY_TIMEOUT)?;

        create_tables(&conn)?;
        info!("Database ready at {}", path);

        Ok(Database {
            location,
            writer: Mutex::new(Some(conn)),
            closed: AtomicBool::new(false),
        })
    }

    /// Locks the writer connection. Fails once the database is closed.
    pub fn writer(&self) -> Result<MutexGuard<'_, Option<Connection>>, StoreError> {
        let guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    /// Runs `f` against a connection suitable for reads.
    pub fn with_reader<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        match &self.location {
            Location::File(path) => {
                let conn = Connection::open_with_flags(
                    path,
                    OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                f(&conn)
            }
            // A private in-memory database is only visible to its own connection.
            Location::Memory => {
                let guard = self.writer()?;
                match guard.as_ref() {
                    Some(conn) => f(conn),
                    None => Err(StoreError::Closed),
                }
            }
        }
    }

    /// Closes the writer connection. Calling it again is a no-op.
    pub fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);

        let mut guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            info!("Database closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    // Rowid order doubles as insertion order for listings.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tokens (
            id TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfers (
            token_id TEXT NOT NULL,
            block_hash TEXT NOT NULL,
            txn_hash TEXT NOT NULL,
            log_index INTEGER NOT NULL,
            from_addr TEXT NOT NULL,
            to_addr TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (block_hash, txn_hash, log_index),
            FOREIGN KEY (token_id) REFERENCES tokens(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_token
         ON transfers(token_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_from
         ON transfers(from_addr)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_to
         ON transfers(to_addr)",
        [],
    )?;

    Ok(())
}
