//! Read side of the store: aggregate queries and a cached dashboard view.

/// TTL cache for computed sections.
pub mod cache;
/// Read-only aggregate queries.
pub mod reader;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::{core::clock::Clock, persist::PersistResult, types::UnixSeconds};

use self::{cache::ReportCache, reader::QueryReader};

const STATS_TTL: Duration = Duration::from_secs(30);
const LIST_TTL: Duration = Duration::from_secs(60);
const QUERY_TYPES_TTL: Duration = Duration::from_secs(120);

/// Dashboard sections over a trailing window, each cached for its own TTL.
/// The recent-queries list is never cached.
pub struct Dashboard {
    reader: QueryReader,
    clock: Arc<dyn Clock>,
    cache: ReportCache<Value>,
    window: Duration,
    limit: usize,
    recent_limit: usize,
}

impl Dashboard {
    /// Last 24 hours, top 10, 50 recent rows.
    pub fn new(reader: QueryReader, clock: Arc<dyn Clock>) -> Self {
        Self {
            reader,
            clock,
            cache: ReportCache::new(),
            window: Duration::from_secs(24 * 3600),
            limit: 10,
            recent_limit: 50,
        }
    }

    /// Trailing window the aggregates cover.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Length of the top-N lists.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Length of the recent-queries list.
    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    fn since(&self) -> UnixSeconds {
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        self.clock.now().timestamp().saturating_sub(window)
    }

    fn cached<F>(&mut self, key: &str, ttl: Duration, compute: F) -> PersistResult<Value>
    where
        F: FnOnce(&QueryReader, UnixSeconds, usize) -> PersistResult<Value>,
    {
        let now_ms = self.clock.now_ms();
        let since = self.since();
        let limit = self.limit;
        let reader = &self.reader;
        self.cache
            .get_or_try_insert_with(key, ttl, now_ms, || compute(reader, since, limit))
    }

    /// [`Summary`](reader::Summary) as JSON, cached 30s.
    pub fn stats(&mut self) -> PersistResult<Value> {
        self.cached("stats", STATS_TTL, |r, since, _| {
            Ok(serde_json::to_value(r.summary(since)?)?)
        })
    }

    /// Most queried allowed domains, cached 60s.
    pub fn top_domains(&mut self) -> PersistResult<Value> {
        self.cached("top_domains", LIST_TTL, |r, since, limit| {
            Ok(serde_json::to_value(r.top_domains(since, false, limit)?)?)
        })
    }

    /// Most queried blocked domains, cached 60s.
    pub fn top_blocked(&mut self) -> PersistResult<Value> {
        self.cached("top_blocked", LIST_TTL, |r, since, limit| {
            Ok(serde_json::to_value(r.top_domains(since, true, limit)?)?)
        })
    }

    /// Hourly totals, cached 60s.
    pub fn timeline(&mut self) -> PersistResult<Value> {
        self.cached("timeline", LIST_TTL, |r, since, _| {
            Ok(serde_json::to_value(r.timeline(since)?)?)
        })
    }

    /// Busiest clients, cached 60s.
    pub fn clients(&mut self) -> PersistResult<Value> {
        self.cached("clients", LIST_TTL, |r, since, limit| {
            Ok(serde_json::to_value(r.top_clients(since, limit)?)?)
        })
    }

    /// Record type distribution, cached 120s.
    pub fn query_types(&mut self) -> PersistResult<Value> {
        self.cached("query_types", QUERY_TYPES_TTL, |r, since, _| {
            Ok(serde_json::to_value(r.query_types(since)?)?)
        })
    }

    /// Latest rows, always read fresh.
    pub fn recent(&self) -> PersistResult<Value> {
        Ok(serde_json::to_value(self.reader.recent(self.recent_limit)?)?)
    }

    /// Every section in one document.
    pub fn snapshot(&mut self) -> PersistResult<Value> {
        Ok(json!({
            "stats": self.stats()?,
            "top_domains": self.top_domains()?,
            "top_blocked": self.top_blocked()?,
            "clients": self.clients()?,
            "timeline": self.timeline()?,
            "query_types": self.query_types()?,
            "recent": self.recent()?,
        }))
    }
}
