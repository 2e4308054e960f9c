//! Shared primitive aliases and the query status enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch.
pub type UnixSeconds = i64;
/// Milliseconds since the Unix epoch.
pub type UnixMillis = i64;

/// Resolution outcome of a logged query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Forwarded or answered normally.
    Allowed,
    /// Answered by a blocklist.
    Blocked,
}

impl QueryStatus {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }

    /// True for [`QueryStatus::Blocked`].
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Blocked)
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(Self::Allowed),
            "blocked" => Ok(Self::Blocked),
            other => Err(format!("unknown query status: {other}")),
        }
    }
}
