//! Resolver log line parser.
//!
//! Lines are matched against a normal-query pattern and then a blocked-query
//! pattern; anything else is noise and yields `None`. The function is pure:
//! the caller supplies `now`, which provides the year missing from syslog
//! timestamps and the fallback time when the fragment cannot be parsed.
//!
//! Known gap: the year is always taken from `now`, so a line written on
//! Dec 31 and read after midnight on Jan 1 is dated almost a year ahead.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone};
use regex::Regex;

use crate::event::QueryEvent;
use crate::types::UnixSeconds;

static QUERY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}).*query\[(\w+)\]\s+(\S+)\s+from\s+(\S+)")
        .expect("query line regex")
});

static BLOCKED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}).*(?:gravity blocked|config blocked)\s+(\S+)")
        .expect("blocked line regex")
});

const SYSLOG_FORMAT: &str = "%Y %b %d %H:%M:%S";

/// Parses one log line into a [`QueryEvent`].
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use dnslog::parse::parse_line;
///
/// let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
/// let ev = parse_line("Mar  5 10:00:01 dnsmasq[1]: query[A] Example.com from 192.168.1.5", &now)
///     .expect("query line");
/// assert_eq!(ev.domain, "example.com");
/// assert!(parse_line("Jan 1 00:00:00 unrelated log noise", &now).is_none());
/// ```
pub fn parse_line<Tz: TimeZone>(line: &str, now: &DateTime<Tz>) -> Option<QueryEvent> {
    if let Some(caps) = QUERY_LINE.captures(line) {
        return Some(QueryEvent::allowed(
            parse_timestamp(&caps[1], now),
            &caps[4],
            &caps[3],
            &caps[2],
        ));
    }

    if let Some(caps) = BLOCKED_LINE.captures(line) {
        return Some(QueryEvent::blocked(parse_timestamp(&caps[1], now), &caps[2]));
    }

    None
}

/// Converts a `Mon DD HH:MM:SS` fragment to epoch seconds in `now`'s zone.
///
/// Falls back to `now` on any failure: unknown month, impossible date, or a
/// local time skipped by a DST transition.
pub fn parse_timestamp<Tz: TimeZone>(fragment: &str, now: &DateTime<Tz>) -> UnixSeconds {
    let normalized = fragment.split_whitespace().collect::<Vec<_>>().join(" ");
    let stamped = format!("{} {normalized}", now.year());

    NaiveDateTime::parse_from_str(&stamped, SYSLOG_FORMAT)
        .ok()
        .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest())
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| now.timestamp())
}
