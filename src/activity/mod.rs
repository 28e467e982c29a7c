//! PostgreSQL activity manager.
//!
//! Owns the single live connection and translates activity operations into
//! the SQL dialect of the connected server version. All calls block; callers
//! run them on the background lane (see [`crate::worker::WorkLane`]).

pub mod dialect;
pub mod mock;
pub mod model;
pub mod session;
pub mod version;

use std::fmt;

use tracing::{debug, warn};

pub use dialect::Dialect;
pub use model::{ACTIVITY_HEADER, ActivityRow, BackendSignal, QueryTextRecord, StatActivityRecord};
pub use session::{APP_NAME, Connector, PgConnector, Session, SslMode};
pub use version::ServerVersion;

/// Error type for activity operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// Network, TLS or authentication failure while connecting.
    Connection(String),
    /// `server_version` could not be parsed into two integers.
    VersionParse(String),
    /// Query execution failed.
    Query(String),
    /// Operation requires a connection.
    NotConnected,
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
            ActivityError::VersionParse(raw) => {
                write!(f, "PostgreSQL: cannot parse server version '{}'", raw)
            }
            ActivityError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            ActivityError::NotConnected => write!(f, "PostgreSQL: not connected"),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Connection parameters. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionParams {
    /// Builds parameters from the standard libpq environment variables:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as user)
    pub fn from_env() -> Self {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_else(|_| "postgres".to_string());
        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("PGPORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432);
        let password = std::env::var("PGPASSWORD").unwrap_or_default();
        let database = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Self {
            host,
            port,
            database,
            user,
            password,
        }
    }

    /// `user@host/database`, as shown in the window title.
    pub fn label(&self) -> String {
        format!("{}@{}/{}", self.user, self.host, self.database)
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

struct Connection {
    session: Box<dyn Session>,
    params: ConnectionParams,
    version: ServerVersion,
    dialect: Dialect,
}

/// Manages the connection to PostgreSQL and queries its activity.
pub struct ActivityManager {
    connector: Box<dyn Connector>,
    connection: Option<Connection>,
}

impl ActivityManager {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            connection: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn params(&self) -> Option<&ConnectionParams> {
        self.connection.as_ref().map(|c| &c.params)
    }

    pub fn version(&self) -> Option<ServerVersion> {
        self.connection.as_ref().map(|c| c.version)
    }

    pub fn dialect(&self) -> Option<Dialect> {
        self.connection.as_ref().map(|c| c.dialect)
    }

    /// Connects and probes the server version.
    ///
    /// Any existing connection is closed first. On failure the manager is
    /// left disconnected.
    pub fn connect(&mut self, params: ConnectionParams) -> Result<(), ActivityError> {
        debug!(params = ?params, "connect");
        self.close();

        let mut session = self.connector.connect(&params)?;

        let version = match session
            .server_version()
            .and_then(|raw| ServerVersion::parse(&raw))
        {
            Ok(v) => v,
            Err(e) => {
                if let Err(close_err) = session.close() {
                    debug!(error = %close_err, "close after failed version probe");
                }
                return Err(e);
            }
        };

        let dialect = Dialect::for_version(version);
        debug!(%version, dialect = dialect.name(), "connected");

        self.connection = Some(Connection {
            session,
            params,
            version,
            dialect,
        });
        Ok(())
    }

    /// Disconnects. No-op when not connected; close errors are logged, not
    /// returned.
    pub fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!("close");
            if let Err(e) = conn.session.close() {
                warn!(error = %e, "error while closing connection");
            }
        }
    }

    /// Fetches the current activity, ordered by backend start.
    pub fn fetch_activity(&mut self) -> Result<Vec<ActivityRow>, ActivityError> {
        let conn = self.connection_mut()?;
        debug!(dialect = conn.dialect.name(), "fetch activity");

        let dialect = conn.dialect;
        let records = conn.session.stat_activity(dialect)?;
        let mut rows: Vec<ActivityRow> = records
            .into_iter()
            .map(|r| dialect.map_activity(r))
            .collect();
        rows.sort_by_key(|r| r.backend_start);
        Ok(rows)
    }

    /// Returns the running query of a backend, or `None` if the backend is
    /// not active or does not exist.
    pub fn fetch_query(&mut self, pid: i32) -> Result<Option<String>, ActivityError> {
        let conn = self.connection_mut()?;
        debug!(pid, dialect = conn.dialect.name(), "fetch query");

        let dialect = conn.dialect;
        let record = conn.session.query_text(dialect, pid)?;
        Ok(record.and_then(|r| dialect.map_query_text(r)))
    }

    /// Cancels the backend's current query. Returns the server's success flag.
    pub fn cancel_backend(&mut self, pid: i32) -> Result<bool, ActivityError> {
        self.signal_backend(BackendSignal::Cancel, pid)
    }

    /// Terminates the backend. Returns the server's success flag.
    pub fn terminate_backend(&mut self, pid: i32) -> Result<bool, ActivityError> {
        self.signal_backend(BackendSignal::Terminate, pid)
    }

    pub fn signal_backend(&mut self, signal: BackendSignal, pid: i32) -> Result<bool, ActivityError> {
        let conn = self.connection_mut()?;
        debug!(pid, function = signal.function_name(), "signal backend");
        conn.session.signal_backend(signal, pid)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, ActivityError> {
        self.connection.as_mut().ok_or(ActivityError::NotConnected)
    }
}

impl Drop for ActivityManager {
    fn drop(&mut self) {
        self.close();
    }
}
