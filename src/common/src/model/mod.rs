//! Row types for the project hierarchy.
//!
//! Projects own sessions and traces; traces own spans and may belong to a
//! session. Keys are the integer row ids used by foreign references.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row id of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectKey(pub i64);

/// Row id of a project session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub i64);

/// Row id of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceKey(pub i64);

impl fmt::Display for ProjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TraceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Top-level container for traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectKey,
    pub name: String,
}

/// Grouping of traces within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSession {
    pub id: SessionKey,
    pub session_id: String,
    pub project_id: ProjectKey,
}

/// A recorded execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceKey,
    pub trace_id: String,
    pub project_rowid: ProjectKey,
    pub project_session_rowid: Option<SessionKey>,
    pub start_time: DateTime<Utc>,
}

/// Render a timestamp the way the SQLite schema stores it.
///
/// Fixed nanosecond precision with a `Z` suffix keeps the text ordering
/// identical to the chronological ordering, so `start_time < ?` compares
/// correctly as strings.
pub fn sqlite_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a timestamp stored by [`sqlite_timestamp`].
pub fn parse_sqlite_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}
