/// Age-based deletion.
pub mod retention;
/// SQLite writer.
pub mod sqlite;

use thiserror::Error;

use crate::{event::QueryEvent, types::UnixSeconds};

/// Failures from the store.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Error reported by SQLite.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Report serialization failed.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for store operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for buffered query events.
///
/// `append_events` is all-or-nothing: on `Err` none of the batch may be
/// visible to readers, so the caller can keep the batch for another attempt.
pub trait EventSink: Send {
    /// Commits `events` in one transaction and returns how many were written.
    fn append_events(&mut self, events: &[QueryEvent]) -> PersistResult<usize>;

    /// Deletes rows strictly older than `cutoff`, returning how many went.
    fn delete_older_than(&mut self, cutoff: UnixSeconds) -> PersistResult<usize>;

    /// Returns free pages to the filesystem after large deletes.
    fn reclaim_space(&mut self) -> PersistResult<()> {
        Ok(())
    }

    /// Folds any write-ahead log back into the main file.
    fn checkpoint(&mut self) -> PersistResult<()> {
        Ok(())
    }
}
