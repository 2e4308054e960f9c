//! Parsed query event shared by the buffer, the writer and the reader.

use serde::{Deserialize, Serialize};

use crate::types::{QueryStatus, UnixSeconds};

/// One query occurrence extracted from the resolver log.
///
/// Built through [`QueryEvent::allowed`] or [`QueryEvent::blocked`], which
/// lowercase the domain and keep `blocked` consistent with `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEvent {
    /// Seconds since epoch.
    pub timestamp: UnixSeconds,
    /// Requesting client; absent on blocked lines.
    pub client_ip: Option<String>,
    /// Lowercased queried name.
    pub domain: String,
    /// Record type such as `A` or `AAAA`; absent on blocked lines.
    pub query_type: Option<String>,
    /// Resolution outcome.
    pub status: QueryStatus,
    /// Mirrors `status` for cheap filtering in storage.
    pub blocked: bool,
    /// Reserved, in milliseconds. The parser never fills it.
    pub response_time: Option<u32>,
}

impl QueryEvent {
    /// A forwarded query seen on a `query[TYPE] name from client` line.
    pub fn allowed(
        timestamp: UnixSeconds,
        client_ip: impl Into<String>,
        domain: &str,
        query_type: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            client_ip: Some(client_ip.into()),
            domain: domain.to_lowercase(),
            query_type: Some(query_type.into()),
            status: QueryStatus::Allowed,
            blocked: false,
            response_time: None,
        }
    }

    /// A blocklist hit. The log format carries neither client nor type.
    pub fn blocked(timestamp: UnixSeconds, domain: &str) -> Self {
        Self {
            timestamp,
            client_ip: None,
            domain: domain.to_lowercase(),
            query_type: None,
            status: QueryStatus::Blocked,
            blocked: true,
            response_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_keep_status_and_flag_in_sync() {
        let a = QueryEvent::allowed(1, "10.0.0.2", "Example.COM", "A");
        assert_eq!(a.domain, "example.com");
        assert_eq!(a.status, QueryStatus::Allowed);
        assert!(!a.blocked);

        let b = QueryEvent::blocked(1, "ADS.example.com");
        assert_eq!(b.domain, "ads.example.com");
        assert!(b.blocked);
        assert!(b.status.is_blocked());
        assert_eq!(b.client_ip, None);
        assert_eq!(b.query_type, None);
    }
}
