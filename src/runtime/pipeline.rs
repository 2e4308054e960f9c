//! The ingestion orchestrator.
//!
//! Reading, parsing, buffering and flushing all happen on the caller's task,
//! one line at a time. The only suspension point is the idle sleep in
//! [`Pipeline::run`], which races the cancellation token; a flush that has
//! started always finishes before cancellation is looked at.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::{
        buffer::{EventBuffer, FlushPolicy, PolicyError},
        clock::Clock,
    },
    parse::parse_line,
    persist::{EventSink, PersistError, PersistResult, retention},
    tail::LineSource,
};

use super::state::{FlushTrigger, PipelineState, PipelineStats};

const PROGRESS_EVERY: u64 = 500;

/// Fatal pipeline failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The log could not be opened at startup.
    #[error("log source '{path}' unavailable: {source}")]
    SourceUnavailable {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying open error.
        #[source]
        source: io::Error,
    },
    /// Flush thresholds are unusable.
    #[error("invalid flush policy: {0}")]
    Policy(#[from] PolicyError),
    /// The final flush was rejected; the events stay buffered for a retry.
    #[error("final flush failed with {pending} queries still buffered: {source}")]
    DrainFailed {
        /// Events still held in memory.
        pending: usize,
        /// Store error from the failed commit.
        #[source]
        source: PersistError,
    },
}

/// Tunables for one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Flush thresholds and buffer cap.
    pub policy: FlushPolicy,
    /// Idle sleep between reads when the log has nothing new.
    pub poll_interval: Duration,
    /// Age past which rows are swept at startup.
    pub retention: Duration,
    /// VACUUM after a sweep that deleted rows.
    pub reclaim_space: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            policy: FlushPolicy::default(),
            poll_interval: Duration::from_millis(500),
            retention: retention::days(30),
            reclaim_space: true,
        }
    }
}

/// Result of one [`Pipeline::poll_once`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A line was consumed.
    Line {
        /// Whether the line produced an event.
        matched: bool,
    },
    /// Nothing new to read.
    Idle,
}

/// Tails one source into one sink.
///
/// The sink is released when the pipeline reaches [`PipelineState::Stopped`],
/// which closes the store connection.
pub struct Pipeline {
    state: PipelineState,
    settings: PipelineSettings,
    buffer: EventBuffer,
    sink: Option<Box<dyn EventSink>>,
    source: Box<dyn LineSource>,
    clock: Arc<dyn Clock>,
    stats: PipelineStats,
}

impl Pipeline {
    /// Runs the retention sweep, then opens the log source and starts in
    /// [`PipelineState::Running`].
    ///
    /// A failing sweep is logged and skipped. A source that cannot be opened
    /// is fatal: there is nothing to tail.
    pub fn initialize<F>(
        mut sink: Box<dyn EventSink>,
        clock: Arc<dyn Clock>,
        settings: PipelineSettings,
        source_path: &Path,
        open_source: F,
    ) -> Result<Self, PipelineError>
    where
        F: FnOnce(&Path) -> io::Result<Box<dyn LineSource>>,
    {
        settings.policy.validate()?;
        debug!(state = ?PipelineState::Initializing, "pipeline initializing");

        if let Err(err) = retention::sweep(
            sink.as_mut(),
            clock.now().timestamp(),
            settings.retention,
            settings.reclaim_space,
        ) {
            warn!(error = %err, "retention sweep failed, continuing without it");
        }

        let source = open_source(source_path).map_err(|source| PipelineError::SourceUnavailable {
            path: source_path.to_path_buf(),
            source,
        })?;
        let buffer = EventBuffer::new(settings.policy, clock.now_ms());

        info!(
            batch_size = settings.policy.batch_size,
            batch_interval_secs = settings.policy.batch_interval.as_secs(),
            buffer_capacity = settings.policy.capacity,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            source = %source_path.display(),
            "monitoring started"
        );

        Ok(Self {
            state: PipelineState::Running,
            settings,
            buffer,
            sink: Some(sink),
            source,
            clock,
            stats: PipelineStats::default(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Events waiting for a commit.
    pub fn buffer(&self) -> &EventBuffer {
        &self.buffer
    }

    /// Reads at most one line and flushes if a trigger fired.
    ///
    /// The trigger is evaluated on idle reads too, so the interval path works
    /// without new input. Read errors are counted, logged and treated as idle.
    pub fn poll_once(&mut self) -> PollOutcome {
        if self.state != PipelineState::Running {
            return PollOutcome::Idle;
        }

        match self.source.next_line() {
            Ok(Some(line)) => {
                self.stats.lines_read += 1;
                let matched = self.ingest_line(&line);
                PollOutcome::Line { matched }
            }
            Ok(None) => {
                self.maybe_flush();
                PollOutcome::Idle
            }
            Err(err) => {
                self.stats.read_errors += 1;
                warn!(error = %err, "log read failed");
                self.maybe_flush();
                PollOutcome::Idle
            }
        }
    }

    /// Flushes whatever is buffered regardless of triggers.
    pub fn force_flush(&mut self) -> PersistResult<usize> {
        self.flush(FlushTrigger::Forced)
    }

    /// Polls until `cancel` fires, then drains and closes the store.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PipelineStats, PipelineError> {
        while !cancel.is_cancelled() {
            match self.poll_once() {
                PollOutcome::Line { .. } => tokio::task::yield_now().await,
                PollOutcome::Idle => {
                    tokio::select! {
                        () = tokio::time::sleep(self.settings.poll_interval) => {}
                        () = cancel.cancelled() => {}
                    }
                }
            }
        }

        info!(buffered = self.buffer.len(), "stop requested, draining buffer");
        self.shutdown()
    }

    /// Commits every buffered event, checkpoints and closes the store.
    ///
    /// A failed final flush leaves the pipeline in [`PipelineState::Draining`]
    /// with the events still buffered, so calling it again retries. Once
    /// stopped it returns the final counters.
    pub fn shutdown(&mut self) -> Result<PipelineStats, PipelineError> {
        if self.state == PipelineState::Stopped {
            return Ok(self.stats.clone());
        }
        self.state = PipelineState::Draining;

        if let Err(source) = self.flush(FlushTrigger::Drain) {
            return Err(PipelineError::DrainFailed {
                pending: self.buffer.len(),
                source,
            });
        }

        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.checkpoint() {
                warn!(error = %err, "wal checkpoint on shutdown failed");
            }
        }

        self.state = PipelineState::Stopped;
        info!(
            lines_read = self.stats.lines_read,
            committed = self.stats.events_committed,
            dropped = self.stats.dropped_events,
            "pipeline stopped"
        );
        Ok(self.stats.clone())
    }

    fn ingest_line(&mut self, line: &str) -> bool {
        let now = self.clock.now().with_timezone(&Local);
        let Some(event) = parse_line(line, &now) else {
            return false;
        };
        self.stats.events_parsed += 1;

        if self.buffer.push(event).is_some() {
            self.stats.dropped_events = self.buffer.dropped();
            if self.stats.dropped_events.is_power_of_two() {
                warn!(
                    dropped_total = self.stats.dropped_events,
                    capacity = self.buffer.policy().capacity,
                    "buffer full, evicted oldest unflushed query"
                );
            }
        }

        self.maybe_flush();
        true
    }

    fn maybe_flush(&mut self) {
        if let Some(trigger) = self.buffer.flush_trigger(self.clock.now_ms()) {
            // Failures are logged in flush; the buffer is kept for next time.
            let _ = self.flush(trigger);
        }
    }

    fn flush(&mut self, trigger: FlushTrigger) -> PersistResult<usize> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(0);
        };
        if self.buffer.is_empty() {
            return Ok(0);
        }

        let batch = self.buffer.drain();
        match sink.append_events(&batch) {
            Ok(count) => {
                self.buffer.mark_flushed(self.clock.now_ms());
                let before = self.stats.events_committed;
                self.stats.record_flush(trigger, count);
                debug!(?trigger, count, "batch committed");

                if before / PROGRESS_EVERY != self.stats.events_committed / PROGRESS_EVERY {
                    info!(
                        committed = self.stats.events_committed,
                        dropped = self.stats.dropped_events,
                        "ingestion progress"
                    );
                }
                Ok(count)
            }
            Err(err) => {
                let pending = batch.len();
                self.buffer.restore(batch);
                self.stats.failed_flushes += 1;
                warn!(?trigger, pending, error = %err, "flush failed, keeping buffer for retry");
                Err(err)
            }
        }
    }
}
