//! Bounded holding area for parsed events awaiting a durable commit.
//!
//! The buffer owns the flush-trigger policy: a size trigger bounds the number
//! of writes per event, an interval trigger bounds staleness when traffic is
//! light. At capacity the oldest event is evicted and counted.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::event::QueryEvent;
use crate::runtime::state::FlushTrigger;
use crate::types::UnixMillis;

/// Rejected [`FlushPolicy`] values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// `batch_size` is zero.
    #[error("batch size must be at least 1")]
    ZeroBatchSize,
    /// `batch_interval` is zero.
    #[error("batch interval must be non-zero")]
    ZeroInterval,
    #[error("buffer capacity {capacity} is smaller than batch size {batch_size}")]
    /// The buffer could never reach the size trigger.
    CapacityBelowBatch {
        /// Configured capacity.
        capacity: usize,
        /// Configured batch size.
        batch_size: usize,
    },
}

/// Size and time thresholds plus the hard memory cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Buffered events that force a flush.
    pub batch_size: usize,
    /// Time since the last flush that forces one.
    pub batch_interval: Duration,
    /// Hard limit; the oldest event is evicted beyond it.
    pub capacity: usize,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_interval: Duration::from_secs(30),
            capacity: 100,
        }
    }
}

impl FlushPolicy {
    /// Checks the thresholds are non-zero and that `capacity >= batch_size`.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.batch_size == 0 {
            return Err(PolicyError::ZeroBatchSize);
        }
        if self.batch_interval.is_zero() {
            return Err(PolicyError::ZeroInterval);
        }
        if self.capacity < self.batch_size {
            return Err(PolicyError::CapacityBelowBatch {
                capacity: self.capacity,
                batch_size: self.batch_size,
            });
        }
        Ok(())
    }

    fn interval_ms(&self) -> i64 {
        i64::try_from(self.batch_interval.as_millis()).unwrap_or(i64::MAX)
    }
}

/// FIFO of parsed events waiting for a commit.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<QueryEvent>,
    policy: FlushPolicy,
    last_flush_ms: UnixMillis,
    dropped: u64,
}

impl EventBuffer {
    /// Empty buffer whose interval clock starts at `now_ms`.
    pub fn new(policy: FlushPolicy, now_ms: UnixMillis) -> Self {
        Self {
            events: VecDeque::with_capacity(policy.capacity),
            policy,
            last_flush_ms: now_ms,
            dropped: 0,
        }
    }

    /// Policy the buffer was created with.
    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Events currently held.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Time of the last successful flush, or creation.
    pub fn last_flush_ms(&self) -> UnixMillis {
        self.last_flush_ms
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueryEvent> {
        self.events.iter()
    }

    /// Appends `event`, returning the evicted oldest event if the buffer was
    /// already at capacity.
    pub fn push(&mut self, event: QueryEvent) -> Option<QueryEvent> {
        let evicted = if self.events.len() >= self.policy.capacity {
            self.dropped += 1;
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Which trigger, if any, asks for a flush at `now_ms`.
    ///
    /// An empty buffer never asks. A clock that went backwards past the last
    /// flush counts as an elapsed interval so a jump cannot stall the time
    /// trigger.
    pub fn flush_trigger(&self, now_ms: UnixMillis) -> Option<FlushTrigger> {
        if self.events.is_empty() {
            return None;
        }
        if self.events.len() >= self.policy.batch_size {
            return Some(FlushTrigger::Size);
        }
        if now_ms < self.last_flush_ms
            || now_ms - self.last_flush_ms >= self.policy.interval_ms()
        {
            return Some(FlushTrigger::Interval);
        }
        None
    }

    /// Shorthand for `flush_trigger(now_ms).is_some()`.
    pub fn should_flush(&self, now_ms: UnixMillis) -> bool {
        self.flush_trigger(now_ms).is_some()
    }

    /// Takes every buffered event in insertion order, leaving it empty.
    pub fn drain(&mut self) -> Vec<QueryEvent> {
        self.events.drain(..).collect()
    }

    /// Puts a batch that failed to commit back in front of anything pushed
    /// since it was drained. Overflow evicts from the oldest end as usual.
    pub fn restore(&mut self, batch: Vec<QueryEvent>) {
        let newer = std::mem::take(&mut self.events);
        for event in batch.into_iter().chain(newer) {
            self.push(event);
        }
    }

    /// Restarts the interval clock after a committed batch.
    pub fn mark_flushed(&mut self, now_ms: UnixMillis) {
        self.last_flush_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(n: i64) -> QueryEvent {
        QueryEvent::allowed(n, "10.0.0.1", &format!("host{n}.example"), "A")
    }

    #[test]
    fn policy_rejects_capacity_below_batch() {
        let policy = FlushPolicy {
            batch_size: 10,
            batch_interval: Duration::from_secs(1),
            capacity: 5,
        };
        assert_eq!(
            policy.validate(),
            Err(PolicyError::CapacityBelowBatch {
                capacity: 5,
                batch_size: 10
            })
        );
        assert!(FlushPolicy::default().validate().is_ok());
    }

    #[test]
    fn restore_keeps_original_order_ahead_of_newer_events() {
        let mut buf = EventBuffer::new(FlushPolicy::default(), 0);
        buf.push(ev(1));
        buf.push(ev(2));
        let batch = buf.drain();
        buf.push(ev(3));
        buf.restore(batch);

        let order: Vec<i64> = buf.iter().map(|e| e.timestamp).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(buf.dropped(), 0);
    }

    #[test]
    fn backwards_clock_counts_as_elapsed() {
        let mut buf = EventBuffer::new(FlushPolicy::default(), 10_000);
        buf.push(ev(1));
        assert_eq!(buf.flush_trigger(10_001), None);
        assert_eq!(buf.flush_trigger(9_000), Some(FlushTrigger::Interval));
    }
}
