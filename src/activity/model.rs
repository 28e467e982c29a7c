//! Activity data types.

use chrono::{DateTime, Utc};

/// Column field names and display titles, in display order.
pub const ACTIVITY_HEADER: [(&str, &str); 13] = [
    ("pid", "PID"),
    ("application_name", "Application"),
    ("datname", "Database"),
    ("backend_start", "Backend Start"),
    ("client_addr", "Client Address"),
    ("client_hostname", "Client Host"),
    ("client_port", "Client Port"),
    ("query_start", "Query Start"),
    ("state", "State"),
    ("state_change", "State Change"),
    ("usename", "User Name"),
    ("wait_event", "Wait Event"),
    ("xact_start", "Transaction Start"),
];

/// One backend process in an activity snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRow {
    pub pid: i32,
    pub application_name: Option<String>,
    pub datname: String,
    pub backend_start: DateTime<Utc>,
    pub client_addr: Option<String>,
    pub client_hostname: Option<String>,
    pub client_port: Option<i32>,
    pub query_start: Option<DateTime<Utc>>,
    /// `active`, `idle`, `idle in transaction`, ... (vocabulary depends on
    /// server version).
    pub state: String,
    /// Always `None` on servers older than 9.2.
    pub state_change: Option<DateTime<Utc>>,
    pub usename: String,
    pub wait_event: Option<String>,
    pub xact_start: Option<DateTime<Utc>>,
}

/// Raw `pg_stat_activity` columns as returned by a dialect query.
///
/// Columns a dialect does not have are `None`. Timestamps are epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatActivityRecord {
    pub pid: i32,
    pub application_name: Option<String>,
    pub datname: Option<String>,
    pub backend_start: Option<i64>,
    pub client_addr: Option<String>,
    pub client_hostname: Option<String>,
    pub client_port: Option<i32>,
    pub query_start: Option<i64>,
    pub state: Option<String>,
    pub state_change: Option<i64>,
    pub usename: Option<String>,
    /// Boolean `waiting` flag (servers older than 9.6).
    pub waiting: Option<bool>,
    pub wait_event: Option<String>,
    /// `current_query` on servers older than 9.2, unused otherwise.
    pub query: Option<String>,
    pub xact_start: Option<i64>,
}

/// Raw result of a query-text lookup for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryTextRecord {
    pub state: Option<String>,
    pub query: Option<String>,
}

/// Signal sent to a backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendSignal {
    /// `pg_cancel_backend`: interrupt the running query, keep the session.
    Cancel,
    /// `pg_terminate_backend`: end the session.
    Terminate,
}

impl BackendSignal {
    pub fn function_name(&self) -> &'static str {
        match self {
            BackendSignal::Cancel => "pg_cancel_backend",
            BackendSignal::Terminate => "pg_terminate_backend",
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            BackendSignal::Cancel => "SELECT pg_cancel_backend($1) AS success",
            BackendSignal::Terminate => "SELECT pg_terminate_backend($1) AS success",
        }
    }

    /// Past-tense verb for status messages.
    pub fn verb(&self) -> &'static str {
        match self {
            BackendSignal::Cancel => "canceled",
            BackendSignal::Terminate => "terminated",
        }
    }
}

/// Converts epoch seconds to a UTC timestamp.
pub(crate) fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}
