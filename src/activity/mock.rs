//! In-memory PostgreSQL stand-in for testing the activity manager without a
//! server, and for `--demo` mode.
//!
//! A [`MockServer`] is a cheaply cloneable handle to shared state; every
//! [`MockSession`] opened through a [`MockConnector`] reads and records into
//! it, so tests can observe connects, closes and issued queries.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::ActivityError;
use super::ConnectionParams;
use super::dialect::Dialect;
use super::model::{BackendSignal, QueryTextRecord, StatActivityRecord};
use super::session::{Connector, Session};

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: usize,
    pub closes: usize,
    /// Sessions currently open.
    pub live: usize,
    /// Highest number of sessions open at the same time.
    pub max_live: usize,
    pub activity_queries: usize,
}

#[derive(Debug, Default)]
struct MockState {
    server_version: String,
    records: Vec<StatActivityRecord>,
    connect_error: Option<String>,
    query_error: Option<String>,
    close_fails: bool,
    latency: Duration,
    stats: MockStats,
    log: Vec<String>,
    dialects: Vec<Dialect>,
    signals: Vec<(BackendSignal, i32)>,
}

/// Shared handle to a simulated server.
#[derive(Debug, Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    /// Creates a server reporting `server_version` from `SHOW server_version`.
    pub fn new(server_version: &str) -> Self {
        let server = Self::default();
        server.state().server_version = server_version.to_string();
        server
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_records(&self, records: Vec<StatActivityRecord>) {
        self.state().records = records;
    }

    /// Makes every connect attempt fail with `message` (or succeed on `None`).
    pub fn fail_connect(&self, message: Option<&str>) {
        self.state().connect_error = message.map(str::to_string);
    }

    /// Makes every query fail with `message` (or succeed on `None`).
    pub fn fail_queries(&self, message: Option<&str>) {
        self.state().query_error = message.map(str::to_string);
    }

    pub fn fail_close(&self, fails: bool) {
        self.state().close_fails = fails;
    }

    /// Adds a delay to every query.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn stats(&self) -> MockStats {
        self.state().stats
    }

    /// Session lifecycle events in order (`connect`, `close`).
    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    /// Dialects used by queries, in order.
    pub fn dialects_seen(&self) -> Vec<Dialect> {
        self.state().dialects.clone()
    }

    pub fn signals(&self) -> Vec<(BackendSignal, i32)> {
        self.state().signals.clone()
    }
}

/// Connector opening sessions against a [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    pub fn new(server: MockServer) -> Self {
        Self { server }
    }
}

impl Connector for MockConnector {
    fn connect(&self, _params: &ConnectionParams) -> Result<Box<dyn Session>, ActivityError> {
        let mut state = self.server.state();
        if let Some(msg) = &state.connect_error {
            return Err(ActivityError::Connection(msg.clone()));
        }
        state.stats.connects += 1;
        state.stats.live += 1;
        state.stats.max_live = state.stats.max_live.max(state.stats.live);
        state.log.push("connect".to_string());
        drop(state);

        Ok(Box::new(MockSession {
            server: self.server.clone(),
        }))
    }
}

/// Session against a [`MockServer`].
#[derive(Debug)]
pub struct MockSession {
    server: MockServer,
}

impl MockSession {
    /// Applies latency and the configured query failure.
    fn begin_query(&self) -> Result<MutexGuard<'_, MockState>, ActivityError> {
        let latency = self.server.state().latency;
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        let state = self.server.state();
        match &state.query_error {
            Some(msg) => Err(ActivityError::Query(msg.clone())),
            None => Ok(state),
        }
    }
}

impl Session for MockSession {
    fn server_version(&mut self) -> Result<String, ActivityError> {
        let state = self.begin_query()?;
        Ok(state.server_version.clone())
    }

    fn stat_activity(&mut self, dialect: Dialect) -> Result<Vec<StatActivityRecord>, ActivityError> {
        let mut state = self.begin_query()?;
        state.stats.activity_queries += 1;
        state.dialects.push(dialect);
        Ok(state.records.clone())
    }

    fn query_text(
        &mut self,
        dialect: Dialect,
        pid: i32,
    ) -> Result<Option<QueryTextRecord>, ActivityError> {
        let mut state = self.begin_query()?;
        state.dialects.push(dialect);
        Ok(state
            .records
            .iter()
            .find(|r| r.pid == pid)
            .map(|r| QueryTextRecord {
                state: r.state.clone(),
                query: r.query.clone(),
            }))
    }

    fn signal_backend(&mut self, signal: BackendSignal, pid: i32) -> Result<bool, ActivityError> {
        let mut state = self.begin_query()?;
        state.signals.push((signal, pid));
        let exists = state.records.iter().any(|r| r.pid == pid);
        if exists && signal == BackendSignal::Terminate {
            state.records.retain(|r| r.pid != pid);
        }
        Ok(exists)
    }

    fn close(self: Box<Self>) -> Result<(), ActivityError> {
        let mut state = self.server.state();
        state.stats.closes += 1;
        state.stats.live = state.stats.live.saturating_sub(1);
        state.log.push("close".to_string());
        if state.close_fails {
            Err(ActivityError::Query("server closed the connection unexpectedly".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Pre-built records and servers.
pub mod scenarios {
    use super::*;

    /// A 9.6+ record.
    pub fn modern_record(pid: i32, backend_start: i64, state: &str) -> StatActivityRecord {
        StatActivityRecord {
            pid,
            application_name: Some("psql".to_string()),
            datname: Some("postgres".to_string()),
            backend_start: Some(backend_start),
            client_addr: Some("127.0.0.1/32".to_string()),
            client_hostname: None,
            client_port: Some(50_000 + pid),
            query_start: Some(backend_start + 5),
            state: Some(state.to_string()),
            state_change: Some(backend_start + 5),
            usename: Some("postgres".to_string()),
            waiting: None,
            wait_event: None,
            query: Some("SELECT 1".to_string()),
            xact_start: None,
        }
    }

    /// A 9.2 - 9.5 record.
    pub fn mid_record(pid: i32, backend_start: i64, state: &str, waiting: bool) -> StatActivityRecord {
        StatActivityRecord {
            waiting: Some(waiting),
            ..modern_record(pid, backend_start, state)
        }
    }

    /// A pre-9.2 record: no `state`, the status lives in `current_query`.
    pub fn legacy_record(pid: i32, backend_start: i64, current_query: &str) -> StatActivityRecord {
        StatActivityRecord {
            state: None,
            state_change: None,
            waiting: Some(false),
            query: Some(current_query.to_string()),
            ..modern_record(pid, backend_start, "")
        }
    }

    /// A PostgreSQL 16 server with a mix of sessions.
    pub fn demo_server() -> MockServer {
        let server = MockServer::new("16.2 (demo)");
        let base = chrono::Utc::now().timestamp() - 3600;

        let mut reporting = modern_record(4101, base, "active");
        reporting.application_name = Some("metabase".to_string());
        reporting.datname = Some("analytics".to_string());
        reporting.usename = Some("report".to_string());
        reporting.client_addr = Some("10.1.4.17/32".to_string());
        reporting.client_hostname = Some("bi-01.internal".to_string());
        reporting.query = Some(
            "SELECT date_trunc('day', created_at) AS day,\n\tcount(*)\nFROM orders\nGROUP BY 1\nORDER BY 1"
                .to_string(),
        );
        reporting.query_start = Some(base + 3500);
        reporting.xact_start = Some(base + 3500);

        let mut web = modern_record(4102, base + 60, "idle");
        web.application_name = Some("web".to_string());
        web.datname = Some("shop".to_string());
        web.usename = Some("shop_app".to_string());
        web.query = Some("COMMIT".to_string());

        let mut stuck = modern_record(4103, base + 120, "idle in transaction");
        stuck.application_name = Some("worker".to_string());
        stuck.datname = Some("shop".to_string());
        stuck.usename = Some("shop_app".to_string());
        stuck.query = Some("UPDATE inventory SET qty = qty - 1 WHERE sku = $1".to_string());
        stuck.xact_start = Some(base + 900);

        let mut locked = modern_record(4104, base + 180, "active");
        locked.application_name = Some("worker".to_string());
        locked.datname = Some("shop".to_string());
        locked.usename = Some("shop_app".to_string());
        locked.wait_event = Some("relation".to_string());
        locked.query = Some("LOCK TABLE inventory IN EXCLUSIVE MODE".to_string());
        locked.xact_start = Some(base + 3000);

        let mut autovacuum = modern_record(4105, base + 240, "");
        autovacuum.application_name = Some(String::new());
        autovacuum.datname = None;
        autovacuum.usename = None;
        autovacuum.client_addr = None;
        autovacuum.client_port = None;
        autovacuum.state = None;
        autovacuum.query = None;
        autovacuum.wait_event = Some("AutoVacuumMain".to_string());

        server.set_records(vec![reporting, web, stuck, locked, autovacuum]);
        server
    }
}
