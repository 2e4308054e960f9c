//! Single-threaded ingestion loop, its state, and shutdown signalling.

/// Orchestrator: poll loop, flush decisions and draining.
pub mod pipeline;
/// SIGINT/SIGTERM to cancellation token bridge.
pub mod shutdown;
/// Lifecycle states, flush triggers and counters.
pub mod state;
