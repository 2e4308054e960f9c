//! Pipeline lifecycle types.

use serde::Serialize;

/// Lifecycle of a [`crate::runtime::pipeline::Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// Sweeping old rows and opening the log.
    Initializing,
    /// Tailing and flushing.
    Running,
    /// Committing what is left after a stop request.
    Draining,
    /// Store released; no further work.
    Stopped,
}

/// Why a flush was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlushTrigger {
    /// Buffer reached the batch size.
    Size,
    /// Batch interval elapsed since the last successful flush.
    Interval,
    /// Requested explicitly by the caller.
    Forced,
    /// Final flush during shutdown.
    Drain,
}

/// Counters accumulated over the pipeline's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Complete lines taken from the source.
    pub lines_read: u64,
    /// Lines that produced an event.
    pub events_parsed: u64,
    /// Events written by successful flushes.
    pub events_committed: u64,
    /// Events evicted by buffer overflow.
    pub dropped_events: u64,
    /// Source reads that returned an error.
    pub read_errors: u64,
    /// Flushes fired by the size trigger.
    pub size_flushes: u64,
    /// Flushes fired by the interval trigger.
    pub interval_flushes: u64,
    /// Flushes requested through `force_flush`.
    pub forced_flushes: u64,
    /// Final flushes during shutdown.
    pub drain_flushes: u64,
    /// Flush attempts the store rejected.
    pub failed_flushes: u64,
}

impl PipelineStats {
    /// Successful flushes of any kind.
    pub fn flushes(&self) -> u64 {
        self.size_flushes + self.interval_flushes + self.forced_flushes + self.drain_flushes
    }

    pub(crate) fn record_flush(&mut self, trigger: FlushTrigger, committed: usize) {
        self.events_committed += committed as u64;
        match trigger {
            FlushTrigger::Size => self.size_flushes += 1,
            FlushTrigger::Interval => self.interval_flushes += 1,
            FlushTrigger::Forced => self.forced_flushes += 1,
            FlushTrigger::Drain => self.drain_flushes += 1,
        }
    }
}
