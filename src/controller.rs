//! Activity controller: the presentation-independent half of the viewer.
//!
//! Owns the background lane (and through it the activity manager), the
//! refresh scheduler and everything a front end displays: connection state,
//! the last good snapshot, the selected backend and its query text, and a
//! status line. Front ends call the action methods and then [`pump`] from
//! their event loop; completions are applied there, on the foreground thread.
//!
//! Every connect and disconnect starts a new connection epoch. Completions
//! carry the epoch they were issued in and are dropped if it has moved on.
//!
//! [`pump`]: ActivityController::pump

use std::cell::RefCell;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::activity::{
    ActivityError, ActivityManager, ActivityRow, BackendSignal, ConnectionParams, Connector,
    ServerVersion,
};
use crate::refresh::{RefreshEvent, RefreshScheduler, RefreshState};
use crate::worker::{WorkError, WorkFuture, WorkLane};

/// Name of the background lane thread.
pub const LANE_NAME: &str = "pg-activity";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(ConnectionParams),
    Connected {
        params: ConnectionParams,
        version: ServerVersion,
    },
}

/// User-triggered operations, for enabling and disabling them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Connect,
    Disconnect,
    Refresh,
    Cancel,
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// Status line content.
#[derive(Debug, Clone)]
pub struct Status {
    pub level: StatusLevel,
    pub message: String,
    /// Diagnostic trace for errors.
    pub trace: Option<String>,
}

impl Status {
    fn info(message: String) -> Self {
        Self {
            level: StatusLevel::Info,
            message,
            trace: None,
        }
    }

    fn error(context: &str, err: &WorkError) -> Self {
        Self {
            level: StatusLevel::Error,
            message: format!("{}: {}", context, err.message()),
            trace: Some(err.trace().to_string()),
        }
    }
}

/// Completion of a one-off job, posted by its future callbacks.
enum Notice {
    Connected {
        epoch: u64,
        version: ServerVersion,
    },
    ConnectFailed {
        epoch: u64,
        error: WorkError,
    },
    QueryText {
        epoch: u64,
        pid: i32,
        text: Option<String>,
    },
    Signaled {
        epoch: u64,
        signal: BackendSignal,
        pid: i32,
        success: bool,
    },
    Failed {
        epoch: u64,
        context: &'static str,
        error: WorkError,
    },
}

impl Notice {
    fn epoch(&self) -> u64 {
        match self {
            Notice::Connected { epoch, .. }
            | Notice::ConnectFailed { epoch, .. }
            | Notice::QueryText { epoch, .. }
            | Notice::Signaled { epoch, .. }
            | Notice::Failed { epoch, .. } => *epoch,
        }
    }
}

type Inbox = Rc<RefCell<VecDeque<Notice>>>;

pub struct ActivityController {
    lane: WorkLane<ActivityManager>,
    scheduler: RefreshScheduler,
    inbox: Inbox,
    epoch: u64,
    connection: ConnectionState,
    rows: Vec<ActivityRow>,
    selected: Option<i32>,
    query_text: Option<String>,
    status: Option<Status>,
}

impl ActivityController {
    pub fn new(lane: WorkLane<ActivityManager>, scheduler: RefreshScheduler) -> Self {
        Self {
            lane,
            scheduler,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            epoch: 0,
            connection: ConnectionState::Disconnected,
            rows: Vec::new(),
            selected: None,
            query_text: None,
            status: None,
        }
    }

    /// Starts a lane for `connector` and builds a controller around it.
    ///
    /// `waker` runs on the lane thread after every completion.
    pub fn spawn(
        connector: Box<dyn Connector>,
        interval: Duration,
        waker: impl Fn() + Send + Sync + 'static,
    ) -> io::Result<Self> {
        let lane = WorkLane::with_waker(LANE_NAME, ActivityManager::new(connector), waker)?;
        Ok(Self::new(lane, RefreshScheduler::new(interval)))
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection, ConnectionState::Connected { .. })
    }

    pub fn params(&self) -> Option<&ConnectionParams> {
        match &self.connection {
            ConnectionState::Disconnected => None,
            ConnectionState::Connecting(params) | ConnectionState::Connected { params, .. } => {
                Some(params)
            }
        }
    }

    pub fn version(&self) -> Option<ServerVersion> {
        match &self.connection {
            ConnectionState::Connected { version, .. } => Some(*version),
            _ => None,
        }
    }

    /// `user@host/database` while connected, empty otherwise.
    pub fn title(&self) -> String {
        match &self.connection {
            ConnectionState::Connected { params, .. } => params.label(),
            _ => String::new(),
        }
    }

    /// Last good snapshot.
    pub fn rows(&self) -> &[ActivityRow] {
        &self.rows
    }

    pub fn selected(&self) -> Option<i32> {
        self.selected
    }

    pub fn selected_row(&self) -> Option<&ActivityRow> {
        let pid = self.selected?;
        self.rows.iter().find(|r| r.pid == pid)
    }

    /// Running query of the selected backend, if it is active.
    pub fn query_text(&self) -> Option<&str> {
        self.query_text.as_deref()
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.scheduler.state()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.scheduler.interval()
    }

    /// Time until the next automatic refresh.
    pub fn next_refresh(&self) -> Option<Duration> {
        self.scheduler.time_until_next()
    }

    /// Jobs submitted to the lane whose completion has not been applied.
    pub fn pending_jobs(&self) -> usize {
        self.lane.pending()
    }

    pub fn is_enabled(&self, action: Action) -> bool {
        match action {
            Action::Connect => true,
            Action::Disconnect | Action::Refresh => self.is_connected(),
            Action::Cancel | Action::Terminate => {
                self.is_connected() && self.selected_row().is_some()
            }
        }
    }

    /// Opens a new connection, replacing the current one.
    pub fn connect(&mut self, params: ConnectionParams) {
        info!(server = %params.label(), "connecting");
        self.reset();
        self.connection = ConnectionState::Connecting(params.clone());
        self.status = Some(Status::info(format!("Connecting to {}...", params.label())));

        let epoch = self.epoch;
        let future = self.lane.submit("connect", move |manager: &mut ActivityManager| {
            manager.connect(params)?;
            manager
                .version()
                .ok_or(ActivityError::NotConnected)
        });
        let inbox = Rc::clone(&self.inbox);
        future.add_result_callback(move |version| {
            inbox.borrow_mut().push_back(Notice::Connected {
                epoch,
                version: *version,
            });
        });
        let inbox = Rc::clone(&self.inbox);
        future.add_error_callback(move |error| {
            inbox.borrow_mut().push_back(Notice::ConnectFailed {
                epoch,
                error: error.clone(),
            });
        });
    }

    /// Closes the connection and clears everything shown.
    pub fn disconnect(&mut self) {
        if matches!(self.connection, ConnectionState::Disconnected) {
            return;
        }
        info!("disconnecting");
        self.reset();
        self.status = Some(Status::info("Disconnected".to_string()));
        self.submit_close();
    }

    /// Refreshes now. No-op while a refresh is in flight.
    pub fn refresh(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.scheduler.start(&self.lane)
    }

    /// Selects a backend and fetches its query text.
    pub fn select(&mut self, pid: Option<i32>) {
        if self.selected == pid {
            return;
        }
        self.selected = pid;
        self.query_text = None;
        if let Some(pid) = pid {
            self.request_query_text(pid);
        }
    }

    /// Fetches the query text of `pid`. The result is applied only if `pid`
    /// is still selected on the same connection.
    fn request_query_text(&mut self, pid: i32) {
        if !self.is_connected() {
            return;
        }

        let epoch = self.epoch;
        let future = self.lane.submit("fetch_query", move |manager: &mut ActivityManager| {
            manager.fetch_query(pid)
        });
        let inbox = Rc::clone(&self.inbox);
        future.add_result_callback(move |text: &Option<String>| {
            inbox.borrow_mut().push_back(Notice::QueryText {
                epoch,
                pid,
                text: text.clone(),
            });
        });
        self.report_failure(&future, "Fetching query failed");
    }

    /// Cancels the selected backend's running query.
    pub fn cancel_selected(&mut self) -> bool {
        self.signal_selected(BackendSignal::Cancel)
    }

    /// Terminates the selected backend.
    pub fn terminate_selected(&mut self) -> bool {
        self.signal_selected(BackendSignal::Terminate)
    }

    fn signal_selected(&mut self, signal: BackendSignal) -> bool {
        let action = match signal {
            BackendSignal::Cancel => Action::Cancel,
            BackendSignal::Terminate => Action::Terminate,
        };
        if !self.is_enabled(action) {
            return false;
        }
        let Some(pid) = self.selected else {
            return false;
        };
        debug!(pid, function = signal.function_name(), "signal requested");

        let epoch = self.epoch;
        let future = self
            .lane
            .submit(signal.function_name(), move |manager: &mut ActivityManager| {
                manager.signal_backend(signal, pid)
            });
        let inbox = Rc::clone(&self.inbox);
        future.add_result_callback(move |success: &bool| {
            inbox.borrow_mut().push_back(Notice::Signaled {
                epoch,
                signal,
                pid,
                success: *success,
            });
        });
        let context = match signal {
            BackendSignal::Cancel => "Cancel failed",
            BackendSignal::Terminate => "Terminate failed",
        };
        self.report_failure(&future, context);
        true
    }

    fn report_failure<T: 'static>(&self, future: &WorkFuture<T>, context: &'static str) {
        let epoch = self.epoch;
        let inbox = Rc::clone(&self.inbox);
        future.add_error_callback(move |error| {
            inbox.borrow_mut().push_back(Notice::Failed {
                epoch,
                context,
                error: error.clone(),
            });
        });
    }

    /// Applies completions and fires the refresh timer. Returns whether
    /// anything visible may have changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = self.lane.dispatch() > 0;
        if self.is_connected() {
            changed |= self.scheduler.poll(&self.lane);
        }
        changed |= self.apply_completions();
        changed
    }

    /// Like [`pump`](Self::pump), waiting up to `timeout` for a completion
    /// first.
    pub fn pump_wait(&mut self, timeout: Duration) -> bool {
        let mut changed = self.lane.wait_dispatch(timeout) > 0;
        changed |= self.pump();
        changed
    }

    fn apply_completions(&mut self) -> bool {
        let mut changed = false;
        loop {
            let notice = self.inbox.borrow_mut().pop_front();
            let Some(notice) = notice else {
                break;
            };
            changed = true;
            if notice.epoch() != self.epoch {
                debug!(epoch = notice.epoch(), current = self.epoch, "dropping stale completion");
                continue;
            }
            self.apply_notice(notice);
        }
        for event in self.scheduler.take_events() {
            changed = true;
            self.apply_refresh(event);
        }
        changed
    }

    fn apply_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Connected { version, .. } => {
                let ConnectionState::Connecting(params) = &self.connection else {
                    return;
                };
                let params = params.clone();
                info!(server = %params.label(), %version, "connected");
                self.status = Some(Status::info(format!(
                    "Connected to {} (PostgreSQL {})",
                    params.label(),
                    version
                )));
                self.connection = ConnectionState::Connected { params, version };
                self.scheduler.start(&self.lane);
            }
            Notice::ConnectFailed { error, .. } => {
                warn!(error = %error, "connect failed");
                self.connection = ConnectionState::Disconnected;
                self.status = Some(Status::error("Connection failed", &error));
            }
            Notice::QueryText { pid, text, .. } => {
                if self.selected == Some(pid) {
                    self.query_text = text;
                }
            }
            Notice::Signaled {
                signal,
                pid,
                success,
                ..
            } => {
                let message = if success {
                    format!("Backend {} {}", pid, signal.verb())
                } else {
                    format!("Backend {} was not {}", pid, signal.verb())
                };
                info!(pid, success, function = signal.function_name(), "signal result");
                self.status = Some(Status::info(message));
                if success && signal == BackendSignal::Terminate {
                    self.scheduler.start(&self.lane);
                }
            }
            Notice::Failed { context, error, .. } => {
                warn!(error = %error, "{}", context);
                self.status = Some(Status::error(context, &error));
            }
        }
    }

    fn apply_refresh(&mut self, event: RefreshEvent) {
        match event {
            RefreshEvent::Snapshot(rows) => {
                debug!(rows = rows.len(), "snapshot applied");
                self.rows = rows;
                if let Some(pid) = self.selected {
                    if self.rows.iter().any(|r| r.pid == pid) {
                        // The backend may have gone idle or moved on.
                        self.request_query_text(pid);
                    } else {
                        self.selected = None;
                        self.query_text = None;
                    }
                }
                if matches!(&self.status, Some(s) if s.level == StatusLevel::Error) {
                    self.status = None;
                }
            }
            RefreshEvent::Failed(error) => {
                warn!(error = %error, "refresh failed");
                self.status = Some(Status::error("Refresh failed", &error));
            }
        }
    }

    /// Starts a new epoch with nothing displayed.
    fn reset(&mut self) {
        self.scheduler.stop();
        self.epoch += 1;
        self.connection = ConnectionState::Disconnected;
        self.rows.clear();
        self.selected = None;
        self.query_text = None;
    }

    fn submit_close(&self) {
        self.lane.submit("close", |manager: &mut ActivityManager| {
            manager.close();
            Ok::<_, Infallible>(())
        });
    }

    /// Stops refreshing, closes the connection on the lane and joins it.
    pub fn shutdown(self) -> Option<ActivityManager> {
        self.scheduler.stop();
        self.submit_close();
        self.lane.shutdown()
    }
}
