//! Age-based deletion of persisted queries.

use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::types::UnixSeconds;

use super::{EventSink, PersistResult};

/// Seconds in a retention day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Outcome of one [`sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows strictly older than this were deleted.
    pub cutoff: UnixSeconds,
    /// Rows removed.
    pub deleted: usize,
    /// Whether free pages were handed back to the filesystem.
    pub reclaimed: bool,
}

/// Deletes every row with `timestamp < now - horizon`.
///
/// Space is reclaimed only when something was deleted and `reclaim` is set,
/// so a repeated sweep is a no-op. Rows being inserted carry current
/// timestamps and are never older than the cutoff.
pub fn sweep(
    sink: &mut dyn EventSink,
    now: UnixSeconds,
    horizon: Duration,
    reclaim: bool,
) -> PersistResult<SweepReport> {
    let horizon_secs = i64::try_from(horizon.as_secs()).unwrap_or(i64::MAX);
    let cutoff = now.saturating_sub(horizon_secs);
    let deleted = sink.delete_older_than(cutoff)?;

    let reclaimed = reclaim && deleted > 0;
    if reclaimed {
        sink.reclaim_space()?;
    }

    if deleted > 0 {
        info!(deleted, cutoff, reclaimed, "retention sweep removed old queries");
    }

    Ok(SweepReport {
        cutoff,
        deleted,
        reclaimed,
    })
}

/// Retention horizon of `n` whole days.
pub fn days(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * SECONDS_PER_DAY)
}
