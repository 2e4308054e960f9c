//! In-memory buffering and the clock seam used by the pipeline.

/// Bounded event buffer and dual flush-trigger policy.
pub mod buffer;
/// Wall-clock abstraction with a manual implementation for tests.
pub mod clock;
