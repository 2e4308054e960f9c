//! SQLite-backed batched writer for `dns_queries`.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, params, types::Value};
use tracing::debug;

use crate::{event::QueryEvent, types::UnixSeconds};

use super::{EventSink, PersistResult};

const INSERT_QUERY: &str = "INSERT INTO dns_queries \
     (timestamp, client_ip, domain, query_type, status, blocked, response_time) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Storage knobs for a low-RAM host writing to flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreTuning {
    /// Page cache budget in KiB.
    pub cache_kib: u32,
    /// Memory-mapped I/O window in bytes; 0 disables mmap.
    pub mmap_bytes: u64,
    /// Only takes effect on a fresh database file.
    pub page_size: u32,
    /// How long a locked database is retried before `SQLITE_BUSY`.
    pub busy_timeout: Duration,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            cache_kib: 2000,
            mmap_bytes: 256 * 1024 * 1024,
            page_size: 4096,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Exclusive writer connection. Readers open their own connections.
pub struct SqliteEventSink {
    conn: Connection,
}

impl SqliteEventSink {
    /// Opens or creates the store at `path`, applies `tuning` and the schema.
    ///
    /// Uses WAL with `synchronous=NORMAL`: a crash can lose the last
    /// uncommitted batch but never a committed one, and readers do not block
    /// on commits.
    pub fn open(path: impl AsRef<Path>, tuning: StoreTuning) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn, tuning)
    }

    /// Private in-memory store with default tuning.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, StoreTuning::default())
    }

    fn init_connection(conn: Connection, tuning: StoreTuning) -> PersistResult<Self> {
        conn.busy_timeout(tuning.busy_timeout)?;
        // page_size must precede the switch to WAL to apply to a new file.
        run_pragma(&conn, &format!("PRAGMA page_size = {}", tuning.page_size))?;
        let mode = run_pragma(&conn, "PRAGMA journal_mode = WAL")?;
        run_pragma(&conn, "PRAGMA synchronous = NORMAL")?;
        run_pragma(&conn, &format!("PRAGMA cache_size = -{}", tuning.cache_kib))?;
        run_pragma(&conn, "PRAGMA temp_store = MEMORY")?;
        run_pragma(&conn, &format!("PRAGMA mmap_size = {}", tuning.mmap_bytes))?;
        conn.execute_batch(include_str!("schema.sql"))?;

        debug!(
            journal_mode = ?mode,
            cache_kib = tuning.cache_kib,
            mmap_bytes = tuning.mmap_bytes,
            "store opened"
        );
        Ok(Self { conn })
    }

    /// Rows currently stored.
    pub fn row_count(&self) -> PersistResult<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM dns_queries", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

impl EventSink for SqliteEventSink {
    fn append_events(&mut self, events: &[QueryEvent]) -> PersistResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(INSERT_QUERY)?;
            for event in events {
                stmt.execute(params![
                    event.timestamp,
                    event.client_ip,
                    event.domain,
                    event.query_type,
                    event.status.as_str(),
                    event.blocked,
                    event.response_time,
                ])?;
            }
        }
        tx.commit()?;

        Ok(events.len())
    }

    fn delete_older_than(&mut self, cutoff: UnixSeconds) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM dns_queries WHERE timestamp < ?1", params![cutoff])?;
        Ok(count)
    }

    fn reclaim_space(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("VACUUM;")?;
        Ok(())
    }

    fn checkpoint(&mut self) -> PersistResult<()> {
        run_pragma(&self.conn, "PRAGMA wal_checkpoint(TRUNCATE)")?;
        Ok(())
    }
}

/// Runs a pragma and returns the first column of its first row, if any.
/// Some pragmas echo their new value and some return nothing.
pub(crate) fn run_pragma(conn: &Connection, sql: &str) -> rusqlite::Result<Option<Value>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let first = match rows.next()? {
        Some(row) => Some(row.get::<_, Value>(0)?),
        None => None,
    };
    while rows.next()?.is_some() {}
    Ok(first)
}
