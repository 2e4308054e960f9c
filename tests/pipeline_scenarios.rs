use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use dnslog::{
    core::{
        buffer::FlushPolicy,
        clock::{Clock, ManualClock},
    },
    event::QueryEvent,
    persist::{
        EventSink, PersistError, PersistResult,
        sqlite::{SqliteEventSink, StoreTuning},
    },
    report::reader::QueryReader,
    runtime::{
        pipeline::{Pipeline, PipelineError, PipelineSettings, PollOutcome},
        state::PipelineState,
    },
    tail::LineSource,
    types::{QueryStatus, UnixSeconds},
};

#[derive(Clone, Default)]
struct ScriptedSource {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl ScriptedSource {
    fn push(&self, line: impl Into<String>) {
        self.lines.lock().expect("lock").push_back(line.into());
    }
}

impl LineSource for ScriptedSource {
    fn next_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.lines.lock().expect("lock").pop_front())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    batches: Arc<Mutex<Vec<Vec<QueryEvent>>>>,
    deleted_before: Arc<Mutex<Vec<UnixSeconds>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingSink {
    fn batches(&self) -> Vec<Vec<QueryEvent>> {
        self.batches.lock().expect("lock").clone()
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

impl EventSink for RecordingSink {
    fn append_events(&mut self, events: &[QueryEvent]) -> PersistResult<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistError::Sqlite(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                Some("database is locked".to_string()),
            )));
        }
        self.batches.lock().expect("lock").push(events.to_vec());
        Ok(events.len())
    }

    fn delete_older_than(&mut self, cutoff: UnixSeconds) -> PersistResult<usize> {
        self.deleted_before.lock().expect("lock").push(cutoff);
        Ok(0)
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ))
}

fn settings(batch_size: usize, capacity: usize) -> PipelineSettings {
    PipelineSettings {
        policy: FlushPolicy {
            batch_size,
            batch_interval: Duration::from_secs(30),
            capacity,
        },
        ..PipelineSettings::default()
    }
}

fn query_line(i: usize) -> String {
    format!("Mar  5 10:00:{:02} dnsmasq[1]: query[A] host{i}.example from 10.0.0.{i}", i % 60)
}

fn start(
    sink: Box<dyn EventSink>,
    clock: &Arc<ManualClock>,
    settings: PipelineSettings,
    source: &ScriptedSource,
) -> Pipeline {
    let source = source.clone();
    Pipeline::initialize(sink, clock.clone(), settings, Path::new("pihole.log"), move |_| {
        Ok(Box::new(source) as Box<dyn LineSource>)
    })
    .expect("initialize")
}

fn domains<'a>(events: impl IntoIterator<Item = &'a QueryEvent>) -> Vec<String> {
    events.into_iter().map(|e| e.domain.clone()).collect()
}

#[test]
fn allowed_and_blocked_lines_land_in_store_after_forced_flush() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("dns.db");
    let sink = SqliteEventSink::open(&db, StoreTuning::default()).expect("open");
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink), &clock, settings(50, 100), &source);

    source.push("Mar  5 10:00:01 dnsmasq: query[A] example.com from 192.168.1.5");
    source.push("Mar  5 10:00:02 dnsmasq: gravity blocked ads.example.com");
    assert_eq!(pipeline.poll_once(), PollOutcome::Line { matched: true });
    assert_eq!(pipeline.poll_once(), PollOutcome::Line { matched: true });
    assert_eq!(pipeline.stats().flushes(), 0);

    assert_eq!(pipeline.force_flush().expect("flush"), 2);

    let mut rows = QueryReader::open(&db).expect("reader").recent(10).expect("recent");
    rows.sort_by(|a, b| a.domain.cmp(&b.domain));
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].domain, "ads.example.com");
    assert_eq!(rows[0].status, QueryStatus::Blocked);
    assert!(rows[0].blocked);
    assert_eq!(rows[0].client_ip, None);

    assert_eq!(rows[1].domain, "example.com");
    assert_eq!(rows[1].status, QueryStatus::Allowed);
    assert!(!rows[1].blocked);
    assert_eq!(rows[1].client_ip.as_deref(), Some("192.168.1.5"));
}

#[test]
fn batch_size_consecutive_lines_commit_in_exactly_one_flush() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(5, 10), &source);

    for i in 0..5 {
        source.push(query_line(i));
    }
    for _ in 0..5 {
        pipeline.poll_once();
    }

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        domains(&batches[0]),
        (0..5).map(|i| format!("host{i}.example")).collect::<Vec<_>>()
    );
    assert_eq!(pipeline.stats().size_flushes, 1);
    assert_eq!(pipeline.stats().interval_flushes, 0);
    assert!(pipeline.buffer().is_empty());
}

#[test]
fn lone_event_is_flushed_by_idle_interval_path() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(50, 100), &source);

    source.push(query_line(1));
    assert_eq!(pipeline.poll_once(), PollOutcome::Line { matched: true });
    assert_eq!(pipeline.poll_once(), PollOutcome::Idle);
    assert!(sink.batches().is_empty());

    clock.advance(Duration::from_secs(29));
    pipeline.poll_once();
    assert!(sink.batches().is_empty());

    clock.advance(Duration::from_secs(2));
    assert_eq!(pipeline.poll_once(), PollOutcome::Idle);

    assert_eq!(sink.batches().len(), 1);
    assert_eq!(pipeline.stats().interval_flushes, 1);
    assert_eq!(pipeline.stats().size_flushes, 0);
    assert_eq!(pipeline.buffer().last_flush_ms(), clock.now_ms());
}

#[test]
fn failed_flush_keeps_buffer_intact_and_retries_next_cycle() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(3, 10), &source);
    let flushed_at = pipeline.buffer().last_flush_ms();

    sink.set_failing(true);
    for i in 0..3 {
        source.push(query_line(i));
        pipeline.poll_once();
    }

    assert_eq!(pipeline.stats().failed_flushes, 1);
    assert_eq!(
        domains(pipeline.buffer().iter()),
        vec!["host0.example", "host1.example", "host2.example"]
    );
    assert_eq!(pipeline.buffer().last_flush_ms(), flushed_at);

    sink.set_failing(false);
    clock.advance(Duration::from_secs(1));
    assert_eq!(pipeline.poll_once(), PollOutcome::Idle);

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        domains(&batches[0]),
        vec!["host0.example", "host1.example", "host2.example"]
    );
    assert!(pipeline.buffer().is_empty());
    assert_eq!(pipeline.buffer().last_flush_ms(), clock.now_ms());
    assert_eq!(pipeline.stats().events_committed, 3);
}

#[test]
fn overflow_while_writes_fail_evicts_oldest_and_counts_it() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(2, 4), &source);

    sink.set_failing(true);
    for i in 0..6 {
        source.push(query_line(i));
        pipeline.poll_once();
    }

    assert_eq!(pipeline.buffer().len(), 4);
    assert_eq!(pipeline.stats().dropped_events, 2);
    assert_eq!(
        domains(pipeline.buffer().iter()),
        vec!["host2.example", "host3.example", "host4.example", "host5.example"]
    );
}

#[test]
fn shutdown_commits_partial_buffer() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(50, 100), &source);

    for i in 0..3 {
        source.push(query_line(i));
        pipeline.poll_once();
    }
    assert!(sink.batches().is_empty());

    let stats = pipeline.shutdown().expect("drain");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(stats.events_committed, 3);
    assert_eq!(stats.drain_flushes, 1);
    assert_eq!(sink.batches().len(), 1);
    assert_eq!(sink.batches()[0].len(), 3);

    // Stopped pipelines ignore further input.
    source.push(query_line(9));
    assert_eq!(pipeline.poll_once(), PollOutcome::Idle);
}

#[test]
fn shutdown_reports_drain_failure() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(50, 100), &source);

    source.push(query_line(1));
    pipeline.poll_once();
    sink.set_failing(true);

    let err = pipeline.shutdown().expect_err("drain fails");
    assert!(matches!(err, PipelineError::DrainFailed { pending: 1, .. }));
}

#[test]
fn shutdown_retries_drain_after_transient_failure() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink.clone()), &clock, settings(50, 100), &source);

    source.push(query_line(1));
    pipeline.poll_once();
    sink.set_failing(true);

    pipeline.shutdown().expect_err("first drain fails");
    assert_eq!(pipeline.state(), PipelineState::Draining);
    assert_eq!(pipeline.buffer().len(), 1);

    sink.set_failing(false);
    let stats = pipeline.shutdown().expect("second drain commits");
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(pipeline.buffer().is_empty());
    assert_eq!(stats.events_committed, 1);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.drain_flushes, 1);
    assert_eq!(domains(&sink.batches()[0]), vec!["host1.example"]);
}

#[test]
fn stopped_pipeline_releases_store_connection() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("dns.db");
    let sink = SqliteEventSink::open(&db, StoreTuning::default()).expect("open");
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink), &clock, settings(50, 100), &source);

    source.push(query_line(1));
    pipeline.poll_once();
    pipeline.shutdown().expect("drain");

    // Closing the last connection removes the write-ahead log.
    assert!(!tmp.path().join("dns.db-wal").exists());
    assert_eq!(pipeline.force_flush().expect("no-op"), 0);

    let rows = QueryReader::open(&db).expect("reader").recent(10).expect("recent");
    assert_eq!(domains(&rows), vec!["host1.example"]);
}

#[test]
fn noise_lines_are_consumed_without_buffering() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let mut pipeline = start(Box::new(sink), &clock, settings(50, 100), &source);

    source.push("Mar  5 10:00:03 dnsmasq[1]: forwarded example.com to 1.1.1.1");
    assert_eq!(pipeline.poll_once(), PollOutcome::Line { matched: false });
    assert!(pipeline.buffer().is_empty());
    assert_eq!(pipeline.stats().lines_read, 1);
    assert_eq!(pipeline.stats().events_parsed, 0);
}

#[test]
fn missing_log_source_is_fatal() {
    let clock = clock();
    let result = Pipeline::initialize(
        Box::new(RecordingSink::default()),
        clock,
        PipelineSettings::default(),
        Path::new("/var/log/missing.log"),
        |_| Err(io::Error::new(io::ErrorKind::NotFound, "no such file")),
    );
    match result {
        Err(PipelineError::SourceUnavailable { path, source }) => {
            assert_eq!(path, PathBuf::from("/var/log/missing.log"));
            assert_eq!(source.kind(), io::ErrorKind::NotFound);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("missing source must be fatal"),
    }
}

#[test]
fn initialize_sweeps_with_retention_cutoff() {
    let sink = RecordingSink::default();
    let clock = clock();
    let source = ScriptedSource::default();
    let _pipeline = start(Box::new(sink.clone()), &clock, PipelineSettings::default(), &source);

    let cutoffs = sink.deleted_before.lock().expect("lock").clone();
    assert_eq!(cutoffs, vec![clock.now().timestamp() - 30 * 86_400]);
}

#[test]
fn initialize_removes_expired_rows_from_store() {
    let tmp = TempDir::new().expect("tmp");
    let db = tmp.path().join("dns.db");
    let clock = clock();
    let now = clock.now().timestamp();

    let mut seed = SqliteEventSink::open(&db, StoreTuning::default()).expect("open");
    seed.append_events(&[
        QueryEvent::allowed(now - 31 * 86_400, "10.0.0.1", "stale.example", "A"),
        QueryEvent::allowed(now - 60, "10.0.0.1", "live.example", "A"),
    ])
    .expect("seed");
    drop(seed);

    let sink = SqliteEventSink::open(&db, StoreTuning::default()).expect("reopen");
    let source = ScriptedSource::default();
    let _pipeline = start(Box::new(sink), &clock, PipelineSettings::default(), &source);

    let rows = QueryReader::open(&db).expect("reader").recent(10).expect("recent");
    assert_eq!(domains(&rows), vec!["live.example"]);
}

#[test]
fn invalid_policy_is_rejected_before_opening_source() {
    let opened = Arc::new(AtomicBool::new(false));
    let flag = opened.clone();
    let result = Pipeline::initialize(
        Box::new(RecordingSink::default()),
        clock(),
        settings(10, 5),
        Path::new("pihole.log"),
        move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource::default()) as Box<dyn LineSource>)
        },
    );
    assert!(matches!(result, Err(PipelineError::Policy(_))));
    assert!(!opened.load(Ordering::SeqCst));
}
