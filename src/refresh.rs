//! Periodic activity refresh.
//!
//! [`RefreshScheduler`] keeps at most one fetch in flight and at most one
//! pending delay timer. A successful fetch arms the timer; a failed fetch
//! stops automatic refreshing until [`RefreshScheduler::start`] is called
//! again. Outcomes are queued as [`RefreshEvent`]s for the owner to drain.
//!
//! The scheduler lives on the foreground thread. Timers are not threads:
//! the owner calls [`RefreshScheduler::poll`] from its loop and the elapsed
//! timer fires there.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::activity::{ActivityManager, ActivityRow};
use crate::worker::{WorkError, WorkFuture, WorkLane};

/// Delay between a successful fetch and the next one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Source of monotonic time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Something that can fetch an activity snapshot in the background.
pub trait ActivitySource {
    fn fetch_activity(&self) -> WorkFuture<Vec<ActivityRow>>;
}

impl ActivitySource for WorkLane<ActivityManager> {
    fn fetch_activity(&self) -> WorkFuture<Vec<ActivityRow>> {
        self.submit("fetch_activity", |manager: &mut ActivityManager| {
            manager.fetch_activity()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Nothing in flight, no timer armed.
    Idle,
    /// A fetch is in flight.
    Fetching,
    /// Waiting for the delay timer before the next fetch.
    WaitingToRetry,
}

impl RefreshState {
    pub fn name(&self) -> &'static str {
        match self {
            RefreshState::Idle => "idle",
            RefreshState::Fetching => "fetching",
            RefreshState::WaitingToRetry => "waiting",
        }
    }
}

/// Outcome of one fetch, as seen by the owner.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    Snapshot(Vec<ActivityRow>),
    Failed(WorkError),
}

#[derive(Default)]
struct Inner {
    /// Ticket of the fetch whose outcome is still wanted.
    in_flight: Option<u64>,
    /// Deadline of the armed delay timer.
    timer: Option<Instant>,
    events: VecDeque<RefreshEvent>,
}

/// Drives periodic fetches with strict non-overlap.
pub struct RefreshScheduler {
    interval: Duration,
    clock: Rc<dyn Clock>,
    inner: Rc<RefCell<Inner>>,
    next_ticket: Cell<u64>,
}

impl RefreshScheduler {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Rc::new(SystemClock))
    }

    pub fn with_clock(interval: Duration, clock: Rc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            inner: Rc::new(RefCell::new(Inner::default())),
            next_ticket: Cell::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> RefreshState {
        let inner = self.inner.borrow();
        if inner.in_flight.is_some() {
            RefreshState::Fetching
        } else if inner.timer.is_some() {
            RefreshState::WaitingToRetry
        } else {
            RefreshState::Idle
        }
    }

    /// Deadline of the armed timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().timer
    }

    /// Time left until the armed timer fires.
    pub fn time_until_next(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }

    /// Starts a fetch now, cancelling any armed timer.
    ///
    /// Returns `false` without doing anything if a fetch is already in
    /// flight.
    pub fn start<S: ActivitySource + ?Sized>(&self, source: &S) -> bool {
        let ticket = {
            let mut inner = self.inner.borrow_mut();
            if inner.in_flight.is_some() {
                debug!("refresh already in flight");
                return false;
            }
            let ticket = self.next_ticket.get();
            self.next_ticket.set(ticket + 1);
            inner.timer = None;
            inner.in_flight = Some(ticket);
            ticket
        };
        debug!(ticket, "refresh started");

        // Callbacks may run synchronously below, so no borrow is held here.
        let future = source.fetch_activity();

        let inner = Rc::clone(&self.inner);
        let clock = Rc::clone(&self.clock);
        let interval = self.interval;
        future.add_result_callback(move |rows: &Vec<ActivityRow>| {
            let mut inner = inner.borrow_mut();
            if inner.in_flight != Some(ticket) {
                debug!(ticket, "discarding superseded refresh result");
                return;
            }
            inner.in_flight = None;
            inner.timer = Some(clock.now() + interval);
            inner.events.push_back(RefreshEvent::Snapshot(rows.clone()));
            debug!(ticket, rows = rows.len(), "refresh finished");
        });

        let inner = Rc::clone(&self.inner);
        future.add_error_callback(move |err| {
            let mut inner = inner.borrow_mut();
            if inner.in_flight != Some(ticket) {
                debug!(ticket, error = %err, "discarding superseded refresh error");
                return;
            }
            inner.in_flight = None;
            inner.events.push_back(RefreshEvent::Failed(err.clone()));
            debug!(ticket, error = %err, "refresh failed, automatic refresh stopped");
        });

        true
    }

    /// Stops refreshing: forgets the in-flight fetch, cancels the timer and
    /// drops undelivered events.
    pub fn stop(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.in_flight.is_some() || inner.timer.is_some() {
            debug!("refresh stopped");
        }
        inner.in_flight = None;
        inner.timer = None;
        inner.events.clear();
    }

    /// Fires the timer if it has elapsed. Returns whether a fetch started.
    pub fn poll<S: ActivitySource + ?Sized>(&self, source: &S) -> bool {
        let due = {
            let mut inner = self.inner.borrow_mut();
            match inner.timer {
                Some(deadline) if self.clock.now() >= deadline => {
                    inner.timer = None;
                    true
                }
                _ => false,
            }
        };
        due && self.start(source)
    }

    /// Takes the queued outcomes.
    pub fn take_events(&self) -> Vec<RefreshEvent> {
        self.inner.borrow_mut().events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityError;
    use chrono::{TimeZone, Utc};

    struct ManualClock(Cell<Instant>);

    impl ManualClock {
        fn new() -> Rc<Self> {
            Rc::new(Self(Cell::new(Instant::now())))
        }

        fn advance(&self, by: Duration) {
            self.0.set(self.0.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    /// Hands out pending futures and lets the test resolve them.
    #[derive(Default)]
    struct FakeSource {
        issued: RefCell<Vec<WorkFuture<Vec<ActivityRow>>>>,
    }

    impl FakeSource {
        fn fetches(&self) -> usize {
            self.issued.borrow().len()
        }

        fn succeed(&self, index: usize, rows: Vec<ActivityRow>) {
            let future = self.issued.borrow()[index].clone();
            future.set_result(rows);
        }

        fn fail(&self, index: usize, message: &str) {
            let future = self.issued.borrow()[index].clone();
            future.set_error(WorkError::new(ActivityError::Query(message.to_string())));
        }
    }

    impl ActivitySource for FakeSource {
        fn fetch_activity(&self) -> WorkFuture<Vec<ActivityRow>> {
            let future = WorkFuture::new();
            self.issued.borrow_mut().push(future.clone());
            future
        }
    }

    /// Completes every fetch immediately.
    struct ReadySource(Cell<usize>);

    impl ActivitySource for ReadySource {
        fn fetch_activity(&self) -> WorkFuture<Vec<ActivityRow>> {
            self.0.set(self.0.get() + 1);
            WorkFuture::ready(vec![row(1)])
        }
    }

    fn row(pid: i32) -> ActivityRow {
        ActivityRow {
            pid,
            application_name: None,
            datname: "postgres".to_string(),
            backend_start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            client_addr: None,
            client_hostname: None,
            client_port: None,
            query_start: None,
            state: "active".to_string(),
            state_change: None,
            usename: "postgres".to_string(),
            wait_event: None,
            xact_start: None,
        }
    }

    fn scheduler(clock: &Rc<ManualClock>) -> RefreshScheduler {
        RefreshScheduler::with_clock(DEFAULT_INTERVAL, clock.clone())
    }

    #[test]
    fn starts_idle() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        assert_eq!(sched.state(), RefreshState::Idle);
        assert_eq!(sched.next_deadline(), None);
        assert!(sched.take_events().is_empty());
    }

    #[test]
    fn second_start_while_fetching_is_a_no_op() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        assert!(sched.start(&source));
        assert!(!sched.start(&source));
        assert_eq!(source.fetches(), 1);
        assert_eq!(sched.state(), RefreshState::Fetching);
    }

    #[test]
    fn success_reschedules_exactly_once_after_interval() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        sched.start(&source);
        source.succeed(0, vec![row(10), row(11)]);

        assert_eq!(sched.state(), RefreshState::WaitingToRetry);
        assert_eq!(sched.time_until_next(), Some(DEFAULT_INTERVAL));
        match sched.take_events().as_slice() {
            [RefreshEvent::Snapshot(rows)] => assert_eq!(rows.len(), 2),
            other => panic!("unexpected events: {other:?}"),
        }

        clock.advance(DEFAULT_INTERVAL - Duration::from_millis(1));
        assert!(!sched.poll(&source));
        assert_eq!(source.fetches(), 1);

        clock.advance(Duration::from_millis(1));
        assert!(sched.poll(&source));
        assert!(!sched.poll(&source));
        assert_eq!(source.fetches(), 2);
        assert_eq!(sched.state(), RefreshState::Fetching);
    }

    #[test]
    fn failure_stops_automatic_refresh() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        sched.start(&source);
        source.fail(0, "connection reset");

        assert_eq!(sched.state(), RefreshState::Idle);
        assert_eq!(sched.next_deadline(), None);
        match sched.take_events().as_slice() {
            [RefreshEvent::Failed(err)] => assert!(err.message().contains("connection reset")),
            other => panic!("unexpected events: {other:?}"),
        }

        clock.advance(DEFAULT_INTERVAL * 3);
        assert!(!sched.poll(&source));
        assert_eq!(source.fetches(), 1);

        // Manual restart works.
        assert!(sched.start(&source));
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn stop_discards_late_completion_and_cancels_timer() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        sched.start(&source);
        sched.stop();
        assert_eq!(sched.state(), RefreshState::Idle);

        source.succeed(0, vec![row(1)]);
        assert!(sched.take_events().is_empty());
        assert_eq!(sched.state(), RefreshState::Idle);

        sched.start(&source);
        source.succeed(1, vec![row(1)]);
        assert_eq!(sched.state(), RefreshState::WaitingToRetry);
        sched.stop();
        assert_eq!(sched.next_deadline(), None);
        assert!(sched.take_events().is_empty());

        clock.advance(DEFAULT_INTERVAL);
        assert!(!sched.poll(&source));
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn late_error_after_restart_is_ignored() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        sched.start(&source);
        sched.stop();
        sched.start(&source);

        source.fail(0, "stale");
        assert_eq!(sched.state(), RefreshState::Fetching);
        assert!(sched.take_events().is_empty());

        source.succeed(1, vec![row(5)]);
        assert!(matches!(sched.take_events().as_slice(), [RefreshEvent::Snapshot(_)]));
    }

    #[test]
    fn manual_start_while_waiting_cancels_the_timer() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = FakeSource::default();

        sched.start(&source);
        source.succeed(0, vec![]);
        assert!(sched.next_deadline().is_some());

        assert!(sched.start(&source));
        assert_eq!(sched.next_deadline(), None);
        assert_eq!(source.fetches(), 2);

        // The old deadline passing does not start a third fetch.
        clock.advance(DEFAULT_INTERVAL);
        assert!(!sched.poll(&source));
        assert_eq!(source.fetches(), 2);
    }

    #[test]
    fn synchronously_completed_fetch_is_handled() {
        let clock = ManualClock::new();
        let sched = scheduler(&clock);
        let source = ReadySource(Cell::new(0));

        assert!(sched.start(&source));
        assert_eq!(sched.state(), RefreshState::WaitingToRetry);
        assert_eq!(sched.take_events().len(), 1);
        assert_eq!(source.0.get(), 1);
    }

    #[test]
    fn lane_source_fetches_from_manager() {
        use crate::activity::ConnectionParams;
        use crate::activity::mock::{MockConnector, MockServer, scenarios};

        let server = MockServer::new("16.1");
        server.set_records(vec![
            scenarios::modern_record(3, 300, "active"),
            scenarios::modern_record(1, 100, "idle"),
        ]);
        let mut manager = ActivityManager::new(Box::new(MockConnector::new(server)));
        manager.connect(ConnectionParams::default()).unwrap();

        let lane = WorkLane::new("test-refresh", manager).unwrap();
        let sched = RefreshScheduler::new(DEFAULT_INTERVAL);
        assert!(sched.start(&lane));

        let deadline = Instant::now() + Duration::from_secs(5);
        while sched.state() == RefreshState::Fetching && Instant::now() < deadline {
            lane.wait_dispatch(Duration::from_millis(50));
        }
        match sched.take_events().as_slice() {
            [RefreshEvent::Snapshot(rows)] => {
                let pids: Vec<i32> = rows.iter().map(|r| r.pid).collect();
                assert_eq!(pids, vec![1, 3]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
