//! Tail a DNS resolver log into SQLite under tight memory and write budgets.
//!
//! Lines are parsed into [`event::QueryEvent`]s, held in a bounded
//! [`core::buffer::EventBuffer`], and committed in batches when either the
//! batch size or the batch interval is reached. Old rows are swept at
//! startup. Everything runs on one task; a termination signal drains the
//! buffer before exit.
//!
//! # Examples
//!
//! Driving the pipeline by hand with an in-memory store:
//! ```
//! use std::{io, path::Path, sync::Arc};
//!
//! use dnslog::{
//!     core::clock::SystemClock,
//!     persist::sqlite::SqliteEventSink,
//!     runtime::pipeline::{Pipeline, PipelineSettings},
//!     tail::LineSource,
//! };
//!
//! struct OneLine(Option<String>);
//!
//! impl LineSource for OneLine {
//!     fn next_line(&mut self) -> io::Result<Option<String>> {
//!         Ok(self.0.take())
//!     }
//! }
//!
//! let sink = SqliteEventSink::open_in_memory().expect("open sqlite");
//! let mut pipeline = Pipeline::initialize(
//!     Box::new(sink),
//!     Arc::new(SystemClock),
//!     PipelineSettings::default(),
//!     Path::new("pihole.log"),
//!     |_| Ok(Box::new(OneLine(Some("Mar  5 10:00:01 dnsmasq: query[A] example.com from 192.168.1.5".into())))),
//! )
//! .expect("initialize");
//!
//! pipeline.poll_once();
//! let stats = pipeline.shutdown().expect("drain");
//! assert_eq!(stats.events_committed, 1);
//! ```
#![deny(missing_docs)]

/// Event buffer, flush policy and clock.
pub mod core;
/// CLI arguments and TOML configuration.
pub mod config;
/// Parsed query event.
pub mod event;
/// Tracing subscriber setup.
pub mod logging;
/// Log line parser.
pub mod parse;
/// Writer abstraction, SQLite implementation and retention.
pub mod persist;
/// Read-only reporting queries and cache.
pub mod report;
/// Orchestrator, state and shutdown signalling.
pub mod runtime;
/// Log file tailing.
pub mod tail;
/// Shared primitive types.
pub mod types;
