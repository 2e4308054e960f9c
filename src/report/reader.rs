//! Read-only access to `dns_queries` for reporting.
//!
//! Opens its own connection with `query_only` set and a small page cache so
//! it never touches the writer's pragmas. In WAL mode it sees only whole
//! committed batches and never blocks the writer.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, params};
use serde::Serialize;

use crate::{
    event::QueryEvent,
    persist::{PersistResult, sqlite::run_pragma},
    types::{QueryStatus, UnixSeconds},
};

const READER_CACHE_KIB: u32 = 1000;

/// Window totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// All rows.
    pub total_queries: u64,
    /// Rows with `blocked = 1`.
    pub blocked_queries: u64,
    /// Percent of queries blocked, one decimal place.
    pub blocked_percentage: f64,
    /// Distinct domains.
    pub unique_domains: u64,
    /// Distinct non-null clients.
    pub unique_clients: u64,
}

/// Query count for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainCount {
    /// Queried name.
    pub domain: String,
    /// Rows in the window.
    pub count: u64,
}

/// Query count for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientCount {
    /// Client address.
    pub client: String,
    /// Rows in the window.
    pub queries: u64,
}

/// One hour of the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourBucket {
    /// Start of the hour, seconds since epoch.
    pub timestamp: UnixSeconds,
    /// Rows in the hour.
    pub total: u64,
    /// Blocked rows in the hour.
    pub blocked: u64,
}

/// Query count for one record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeCount {
    /// Record type such as `A`.
    #[serde(rename = "type")]
    pub query_type: String,
    /// Rows in the window.
    pub count: u64,
}

/// Read-only connection to the store.
pub struct QueryReader {
    conn: Connection,
}

impl QueryReader {
    /// Opens an existing store read-only. Fails if the file is missing.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        run_pragma(&conn, "PRAGMA query_only = ON")?;
        run_pragma(&conn, &format!("PRAGMA cache_size = -{READER_CACHE_KIB}"))?;
        Ok(Self { conn })
    }

    /// Totals over rows with `timestamp > since`.
    pub fn summary(&self, since: UnixSeconds) -> PersistResult<Summary> {
        let (total, blocked, domains, clients) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(blocked), 0), COUNT(DISTINCT domain), \
                    COUNT(DISTINCT client_ip) \
             FROM dns_queries WHERE timestamp > ?1",
            params![since],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let blocked_percentage = if total > 0 {
            (blocked as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(Summary {
            total_queries: count(total),
            blocked_queries: count(blocked),
            blocked_percentage,
            unique_domains: count(domains),
            unique_clients: count(clients),
        })
    }

    /// Most queried domains among allowed (`blocked = false`) or blocked rows.
    pub fn top_domains(
        &self,
        since: UnixSeconds,
        blocked: bool,
        limit: usize,
    ) -> PersistResult<Vec<DomainCount>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT domain, COUNT(*) AS n FROM dns_queries \
             WHERE timestamp > ?1 AND blocked = ?2 \
             GROUP BY domain ORDER BY n DESC, domain ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![since, blocked, limit_param(limit)], |row| {
            Ok(DomainCount {
                domain: row.get(0)?,
                count: count(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Clients with the most queries.
    pub fn top_clients(&self, since: UnixSeconds, limit: usize) -> PersistResult<Vec<ClientCount>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT client_ip, COUNT(*) AS n FROM dns_queries \
             WHERE client_ip IS NOT NULL AND timestamp > ?1 \
             GROUP BY client_ip ORDER BY n DESC, client_ip ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![since, limit_param(limit)], |row| {
            Ok(ClientCount {
                client: row.get(0)?,
                queries: count(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Hourly buckets, oldest first.
    pub fn timeline(&self, since: UnixSeconds) -> PersistResult<Vec<HourBucket>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT (timestamp / 3600) * 3600 AS hour, COUNT(*), COALESCE(SUM(blocked), 0) \
             FROM dns_queries WHERE timestamp > ?1 \
             GROUP BY hour ORDER BY hour",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(HourBucket {
                timestamp: row.get(0)?,
                total: count(row.get(1)?),
                blocked: count(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Counts per non-null record type.
    pub fn query_types(&self, since: UnixSeconds) -> PersistResult<Vec<TypeCount>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT query_type, COUNT(*) AS n FROM dns_queries \
             WHERE query_type IS NOT NULL AND timestamp > ?1 \
             GROUP BY query_type ORDER BY n DESC, query_type ASC",
        )?;
        let rows = stmt.query_map(params![since], |row| {
            Ok(TypeCount {
                query_type: row.get(0)?,
                count: count(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Newest rows first; insertion order breaks timestamp ties.
    pub fn recent(&self, limit: usize) -> PersistResult<Vec<QueryEvent>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT timestamp, client_ip, domain, query_type, status, blocked, response_time \
             FROM dns_queries ORDER BY timestamp DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit_param(limit)], |row| {
            let status: String = row.get(4)?;
            let status = status.parse::<QueryStatus>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            Ok(QueryEvent {
                timestamp: row.get(0)?,
                client_ip: row.get(1)?,
                domain: row.get(2)?,
                query_type: row.get(3)?,
                status,
                blocked: row.get(5)?,
                response_time: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }
}

fn count(n: i64) -> u64 {
    n.max(0) as u64
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
