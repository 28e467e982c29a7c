//! Database session abstraction.
//!
//! `Connector` and `Session` separate the activity manager from the
//! PostgreSQL client so the manager can be driven by [`super::mock`] in tests
//! and demo mode.

use std::time::Duration;

use postgres::config::SslMode as PgSslMode;
use postgres::{Client, Config, NoTls, Row};
use postgres_native_tls::MakeTlsConnector;
use tracing::debug;

use super::ActivityError;
use super::ConnectionParams;
use super::dialect::Dialect;
use super::model::{BackendSignal, QueryTextRecord, StatActivityRecord};

/// Application name reported to the server (visible in `pg_stat_activity`).
pub const APP_NAME: &str = "PostgreSQL Activity";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sessions never write, so every transaction is read-only.
const SESSION_OPTIONS: &str = "-c default_transaction_read_only=on";

/// Opens sessions for connection parameters.
pub trait Connector: Send {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Session>, ActivityError>;
}

/// One open database session.
///
/// Implementations are not required to be usable from more than one thread
/// at a time; the manager only drives a session from the background lane.
pub trait Session: Send {
    /// Returns the raw `server_version` setting.
    fn server_version(&mut self) -> Result<String, ActivityError>;

    /// Runs the dialect's activity query.
    fn stat_activity(&mut self, dialect: Dialect) -> Result<Vec<StatActivityRecord>, ActivityError>;

    /// Looks up the query text of one backend. `Ok(None)` if no such backend.
    fn query_text(
        &mut self,
        dialect: Dialect,
        pid: i32,
    ) -> Result<Option<QueryTextRecord>, ActivityError>;

    /// Sends a cancel or terminate signal; returns the server's success flag.
    fn signal_backend(&mut self, signal: BackendSignal, pid: i32) -> Result<bool, ActivityError>;

    /// Rolls back any open transaction and releases the session.
    fn close(self: Box<Self>) -> Result<(), ActivityError>;
}

/// TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            other => Err(format!(
                "invalid sslmode '{}' (expected disable, prefer or require)",
                other
            )),
        }
    }
}

/// Connector backed by the `postgres` client.
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    ssl_mode: SslMode,
}

impl PgConnector {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    fn config(&self, params: &ConnectionParams) -> Config {
        let mut config = Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.database)
            .user(&params.user)
            .application_name(APP_NAME)
            .options(SESSION_OPTIONS)
            .connect_timeout(CONNECT_TIMEOUT);
        if !params.password.is_empty() {
            config.password(&params.password);
        }
        config
    }
}

impl Connector for PgConnector {
    fn connect(&self, params: &ConnectionParams) -> Result<Box<dyn Session>, ActivityError> {
        let mut config = self.config(params);
        debug!(host = %params.host, port = params.port, ssl_mode = ?self.ssl_mode, "opening session");

        let client = match self.ssl_mode {
            SslMode::Disable => {
                config.ssl_mode(PgSslMode::Disable);
                config.connect(NoTls)
            }
            SslMode::Prefer | SslMode::Require => {
                config.ssl_mode(if self.ssl_mode == SslMode::Require {
                    PgSslMode::Require
                } else {
                    PgSslMode::Prefer
                });
                // Like libpq's prefer/require: encrypt, but do not verify the
                // server certificate.
                let tls = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(|e| ActivityError::Connection(format!("TLS setup failed: {}", e)))?;
                config.connect(MakeTlsConnector::new(tls))
            }
        }
        .map_err(|e| ActivityError::Connection(format_postgres_error(&e)))?;

        Ok(Box::new(PgSession { client }))
    }
}

/// Session over a live `postgres::Client`.
pub struct PgSession {
    client: Client,
}

impl Session for PgSession {
    fn server_version(&mut self) -> Result<String, ActivityError> {
        let row = self
            .client
            .query_one("SHOW server_version", &[])
            .map_err(query_error)?;
        row.try_get::<_, String>(0).map_err(query_error)
    }

    fn stat_activity(&mut self, dialect: Dialect) -> Result<Vec<StatActivityRecord>, ActivityError> {
        let rows = self
            .client
            .query(dialect.activity_sql(), &[])
            .map_err(query_error)?;
        rows.iter().map(read_activity_record).collect()
    }

    fn query_text(
        &mut self,
        dialect: Dialect,
        pid: i32,
    ) -> Result<Option<QueryTextRecord>, ActivityError> {
        let row = self
            .client
            .query_opt(dialect.query_text_sql(), &[&pid])
            .map_err(query_error)?;
        match row {
            Some(row) => Ok(Some(QueryTextRecord {
                state: row.try_get("state").map_err(query_error)?,
                query: row.try_get("query").map_err(query_error)?,
            })),
            None => Ok(None),
        }
    }

    fn signal_backend(&mut self, signal: BackendSignal, pid: i32) -> Result<bool, ActivityError> {
        let row = self
            .client
            .query_one(signal.sql(), &[&pid])
            .map_err(query_error)?;
        let success: Option<bool> = row.try_get("success").map_err(query_error)?;
        Ok(success.unwrap_or(false))
    }

    fn close(self: Box<Self>) -> Result<(), ActivityError> {
        let PgSession { mut client } = *self;
        let rollback = client.batch_execute("ROLLBACK").map_err(query_error);
        let close = client.close().map_err(query_error);
        rollback.and(close)
    }
}

fn read_activity_record(row: &Row) -> Result<StatActivityRecord, ActivityError> {
    Ok(StatActivityRecord {
        pid: row.try_get("pid").map_err(query_error)?,
        application_name: row.try_get("application_name").map_err(query_error)?,
        datname: row.try_get("datname").map_err(query_error)?,
        backend_start: row.try_get("backend_start").map_err(query_error)?,
        client_addr: row.try_get("client_addr").map_err(query_error)?,
        client_hostname: row.try_get("client_hostname").map_err(query_error)?,
        client_port: row.try_get("client_port").map_err(query_error)?,
        query_start: row.try_get("query_start").map_err(query_error)?,
        state: row.try_get("state").map_err(query_error)?,
        state_change: row.try_get("state_change").map_err(query_error)?,
        usename: row.try_get("usename").map_err(query_error)?,
        waiting: row.try_get("waiting").map_err(query_error)?,
        wait_event: row.try_get("wait_event").map_err(query_error)?,
        query: row.try_get("query").map_err(query_error)?,
        xact_start: row.try_get("xact_start").map_err(query_error)?,
    })
}

fn query_error(e: postgres::Error) -> ActivityError {
    ActivityError::Query(format_postgres_error(&e))
}

/// Formats PostgreSQL error message for display.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
