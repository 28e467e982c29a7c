//! Version-specific `pg_stat_activity` dialects.
//!
//! The activity view changed shape across major versions:
//! - 9.2 renamed `procpid`/`current_query` to `pid`/`query` and added `state`
//!   (before that, idle sessions were reported through `<IDLE>` query markers).
//! - 9.6 replaced the boolean `waiting` with `wait_event`.
//!
//! A dialect is chosen once per connection from the server version and used
//! for every query on that connection.

use chrono::{DateTime, Utc};

use super::model::{ActivityRow, QueryTextRecord, StatActivityRecord, epoch_to_utc};
use super::version::ServerVersion;

const IDLE_MARKER: &str = "<IDLE>";

const ACTIVITY_SQL_MODERN: &str = r#"
    SELECT
        pid,
        application_name,
        datname,
        floor(EXTRACT(EPOCH FROM backend_start))::bigint AS backend_start,
        client_addr::text AS client_addr,
        nullif(client_hostname, '') AS client_hostname,
        client_port,
        floor(EXTRACT(EPOCH FROM query_start))::bigint AS query_start,
        state,
        floor(EXTRACT(EPOCH FROM state_change))::bigint AS state_change,
        usename::text AS usename,
        NULL::boolean AS waiting,
        wait_event,
        NULL::text AS query,
        floor(EXTRACT(EPOCH FROM xact_start))::bigint AS xact_start
    FROM pg_stat_activity
    ORDER BY pg_stat_activity.backend_start ASC
"#;

const ACTIVITY_SQL_MID: &str = r#"
    SELECT
        pid,
        application_name,
        datname,
        floor(EXTRACT(EPOCH FROM backend_start))::bigint AS backend_start,
        client_addr::text AS client_addr,
        nullif(client_hostname, '') AS client_hostname,
        client_port,
        floor(EXTRACT(EPOCH FROM query_start))::bigint AS query_start,
        state,
        floor(EXTRACT(EPOCH FROM state_change))::bigint AS state_change,
        usename::text AS usename,
        waiting,
        NULL::text AS wait_event,
        NULL::text AS query,
        floor(EXTRACT(EPOCH FROM xact_start))::bigint AS xact_start
    FROM pg_stat_activity
    ORDER BY pg_stat_activity.backend_start ASC
"#;

const ACTIVITY_SQL_LEGACY: &str = r#"
    SELECT
        procpid AS pid,
        application_name,
        datname,
        floor(EXTRACT(EPOCH FROM backend_start))::bigint AS backend_start,
        client_addr::text AS client_addr,
        client_hostname,
        client_port,
        floor(EXTRACT(EPOCH FROM query_start))::bigint AS query_start,
        NULL::text AS state,
        NULL::bigint AS state_change,
        usename::text AS usename,
        waiting,
        NULL::text AS wait_event,
        current_query AS query,
        floor(EXTRACT(EPOCH FROM xact_start))::bigint AS xact_start
    FROM pg_stat_activity
    ORDER BY pg_stat_activity.backend_start ASC
"#;

const QUERY_TEXT_SQL: &str = r#"
    SELECT state, query
    FROM pg_stat_activity
    WHERE pid = $1
"#;

const QUERY_TEXT_SQL_LEGACY: &str = r#"
    SELECT NULL::text AS state, current_query AS query
    FROM pg_stat_activity
    WHERE procpid = $1
"#;

/// SQL dialect for a server version band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// 9.1 and older: `procpid`, `current_query`, `<IDLE>` markers.
    Legacy,
    /// 9.2 through 9.5: `state` column, boolean `waiting`.
    Mid,
    /// 9.6 and newer: `wait_event` column.
    Modern,
}

impl Dialect {
    pub fn for_version(version: ServerVersion) -> Self {
        if version >= ServerVersion::new(9, 6) {
            Dialect::Modern
        } else if version >= ServerVersion::new(9, 2) {
            Dialect::Mid
        } else {
            Dialect::Legacy
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Legacy => "v<=9.1",
            Dialect::Mid => "v>=9.2",
            Dialect::Modern => "v>=9.6",
        }
    }

    /// Query returning one [`StatActivityRecord`] per backend.
    pub fn activity_sql(&self) -> &'static str {
        match self {
            Dialect::Legacy => ACTIVITY_SQL_LEGACY,
            Dialect::Mid => ACTIVITY_SQL_MID,
            Dialect::Modern => ACTIVITY_SQL_MODERN,
        }
    }

    /// Query returning a [`QueryTextRecord`] for the backend given as `$1`.
    pub fn query_text_sql(&self) -> &'static str {
        match self {
            Dialect::Legacy => QUERY_TEXT_SQL_LEGACY,
            Dialect::Mid | Dialect::Modern => QUERY_TEXT_SQL,
        }
    }

    /// Maps a raw record into an activity row.
    pub fn map_activity(&self, record: StatActivityRecord) -> ActivityRow {
        let (state, state_change, client_hostname) = match self {
            Dialect::Legacy => (
                legacy_state(record.query.as_deref()),
                None,
                record.client_hostname,
            ),
            Dialect::Mid | Dialect::Modern => (
                record.state.unwrap_or_default(),
                record.state_change.and_then(epoch_to_utc),
                record.client_hostname.filter(|h| !h.is_empty()),
            ),
        };

        let wait_event = match self {
            Dialect::Legacy | Dialect::Mid => waiting_event(record.waiting),
            Dialect::Modern => record.wait_event,
        };

        ActivityRow {
            pid: record.pid,
            application_name: record.application_name,
            datname: record.datname.unwrap_or_default(),
            backend_start: record
                .backend_start
                .and_then(epoch_to_utc)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            client_addr: record.client_addr,
            client_hostname,
            client_port: record.client_port,
            query_start: record.query_start.and_then(epoch_to_utc),
            state,
            state_change,
            usename: record.usename.unwrap_or_default(),
            wait_event,
            xact_start: record.xact_start.and_then(epoch_to_utc),
        }
    }

    /// Extracts the running query text, or `None` if the backend is not
    /// executing a query.
    pub fn map_query_text(&self, record: QueryTextRecord) -> Option<String> {
        match self {
            Dialect::Legacy => record.query.filter(|q| !q.starts_with(IDLE_MARKER)),
            Dialect::Mid | Dialect::Modern => {
                if record.state.as_deref() == Some("active") {
                    record.query
                } else {
                    None
                }
            }
        }
    }
}

/// Synthesizes a `state` value from a pre-9.2 `current_query`.
fn legacy_state(current_query: Option<&str>) -> String {
    match current_query {
        Some("<IDLE>") => "idle".to_string(),
        Some("<IDLE> in transaction") => "idle in transaction".to_string(),
        Some("<IDLE> in transaction (aborted)") => "idle in transaction (aborted)".to_string(),
        Some(other) if other.starts_with(IDLE_MARKER) => other.to_string(),
        _ => "active".to_string(),
    }
}

fn waiting_event(waiting: Option<bool>) -> Option<String> {
    match waiting {
        Some(true) => Some("Waiting".to_string()),
        _ => None,
    }
}
