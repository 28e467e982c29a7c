//! Single-assignment, multi-listener outcome cell.
//!
//! A [`WorkFuture`] lives on the foreground thread. It is completed exactly
//! once (by [`super::WorkLane::dispatch`] in production) and hands its
//! outcome to every registered callback exactly once, in registration order.
//! Callbacks registered after completion run immediately.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::{error, warn};

use super::WorkError;

type ResultCallback<T> = Box<dyn FnOnce(&T)>;
type ErrorCallback = Box<dyn FnOnce(&WorkError)>;

enum Outcome<T> {
    Pending,
    Ready(Rc<T>),
    Failed(Rc<WorkError>),
}

struct Shared<T> {
    outcome: Outcome<T>,
    result_callbacks: VecDeque<ResultCallback<T>>,
    error_callbacks: VecDeque<ErrorCallback>,
    /// Set once an error callback has received the error.
    error_observed: bool,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if let Outcome::Failed(err) = &self.outcome
            && !self.error_observed
        {
            warn!(error = %err, trace = err.trace(), "background work failed and nobody observed the error");
        }
    }
}

/// Eventual outcome of one unit of background work.
///
/// Cloning yields another handle to the same cell.
pub struct WorkFuture<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for WorkFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> Default for WorkFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WorkFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.borrow().outcome {
            Outcome::Pending => "pending",
            Outcome::Ready(_) => "ready",
            Outcome::Failed(_) => "failed",
        };
        f.debug_struct("WorkFuture").field("state", &state).finish()
    }
}

impl<T> WorkFuture<T> {
    /// Creates a pending future.
    pub fn new() -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                outcome: Outcome::Pending,
                result_callbacks: VecDeque::new(),
                error_callbacks: VecDeque::new(),
                error_observed: false,
            })),
        }
    }

    /// Creates a future already completed with `value`.
    pub fn ready(value: T) -> Self {
        let future = Self::new();
        future.set_result(value);
        future
    }

    /// Creates a future already completed with `error`.
    pub fn failed(error: WorkError) -> Self {
        let future = Self::new();
        future.set_error(error);
        future
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.shared.borrow().outcome, Outcome::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.shared.borrow().outcome, Outcome::Ready(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.shared.borrow().outcome, Outcome::Failed(_))
    }

    /// Registers a callback for the success value. Runs immediately if the
    /// future already succeeded; never runs if it failed.
    pub fn add_result_callback(&self, callback: impl FnOnce(&T) + 'static) {
        self.shared
            .borrow_mut()
            .result_callbacks
            .push_back(Box::new(callback));
        self.run_result_callbacks();
    }

    /// Registers a callback for the error. Runs immediately if the future
    /// already failed; never runs if it succeeded.
    pub fn add_error_callback(&self, callback: impl FnOnce(&WorkError) + 'static) {
        self.shared
            .borrow_mut()
            .error_callbacks
            .push_back(Box::new(callback));
        self.run_error_callbacks();
    }

    /// Completes the future with a value.
    ///
    /// # Panics
    /// If the future is already completed.
    pub fn set_result(&self, value: T) {
        {
            let mut shared = self.shared.borrow_mut();
            assert!(
                matches!(shared.outcome, Outcome::Pending),
                "WorkFuture completed twice (result after outcome was set)"
            );
            shared.outcome = Outcome::Ready(Rc::new(value));
            shared.error_callbacks.clear();
        }
        self.run_result_callbacks();
    }

    /// Completes the future with an error.
    ///
    /// # Panics
    /// If the future is already completed.
    pub fn set_error(&self, error: WorkError) {
        {
            let mut shared = self.shared.borrow_mut();
            assert!(
                matches!(shared.outcome, Outcome::Pending),
                "WorkFuture completed twice (error after outcome was set)"
            );
            shared.outcome = Outcome::Failed(Rc::new(error));
            shared.result_callbacks.clear();
        }
        self.run_error_callbacks();
    }

    /// Completes the future from a work outcome.
    pub fn complete(&self, outcome: Result<T, WorkError>) {
        match outcome {
            Ok(value) => self.set_result(value),
            Err(err) => self.set_error(err),
        }
    }

    fn run_result_callbacks(&self) {
        loop {
            // The borrow is released before the callback runs so callbacks
            // may register further callbacks on this future.
            let next = {
                let mut shared = self.shared.borrow_mut();
                let value = match &shared.outcome {
                    Outcome::Ready(value) => Rc::clone(value),
                    Outcome::Failed(_) => {
                        shared.result_callbacks.clear();
                        return;
                    }
                    Outcome::Pending => return,
                };
                shared.result_callbacks.pop_front().map(|cb| (cb, value))
            };
            let Some((callback, value)) = next else {
                return;
            };
            if catch_unwind(AssertUnwindSafe(|| callback(&value))).is_err() {
                error!("unhandled panic in result callback");
            }
        }
    }

    fn run_error_callbacks(&self) {
        loop {
            let next = {
                let mut shared = self.shared.borrow_mut();
                let err = match &shared.outcome {
                    Outcome::Failed(err) => Rc::clone(err),
                    Outcome::Ready(_) => {
                        shared.error_callbacks.clear();
                        return;
                    }
                    Outcome::Pending => return,
                };
                let cb = shared.error_callbacks.pop_front();
                if cb.is_some() {
                    shared.error_observed = true;
                }
                cb.map(|cb| (cb, err))
            };
            let Some((callback, err)) = next else {
                return;
            };
            if catch_unwind(AssertUnwindSafe(|| callback(&err))).is_err() {
                error!(error = %err, "unhandled panic in error callback");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::activity::ActivityError;

    fn work_error(msg: &str) -> WorkError {
        WorkError::new(ActivityError::Query(msg.to_string()))
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` with a subscriber that records WARN and above, returning
    /// the formatted output.
    fn capture_warnings(f: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn unobserved_error_is_logged_on_drop() {
        let logs = capture_warnings(|| {
            let future: WorkFuture<i32> = WorkFuture::new();
            let handle = future.clone();
            future.set_error(work_error("connection reset"));
            drop(future);
            drop(handle);
        });
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("nobody observed the error"), "{logs}");
        assert!(logs.contains("connection reset"), "{logs}");
    }

    #[test]
    fn observed_error_is_not_logged_on_drop() {
        let logs = capture_warnings(|| {
            let future: WorkFuture<i32> = WorkFuture::new();
            future.add_error_callback(|_| {});
            future.set_error(work_error("connection reset"));
            drop(future);

            let late: WorkFuture<i32> = WorkFuture::new();
            late.set_error(work_error("late observer"));
            late.add_error_callback(|_| {});
            drop(late);

            let ok = WorkFuture::ready(1);
            drop(ok);
        });
        assert!(logs.is_empty(), "{logs}");
    }

    #[test]
    fn callbacks_registered_before_completion_fire_on_completion() {
        let future = WorkFuture::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let s = seen.clone();
        future.add_result_callback(move |v: &i32| s.borrow_mut().push(*v));
        assert!(seen.borrow().is_empty());
        assert!(future.is_pending());

        future.set_result(7);
        assert_eq!(*seen.borrow(), vec![7]);
        assert!(future.is_ready());
    }

    #[test]
    fn late_callbacks_run_synchronously_in_order_exactly_once() {
        let future = WorkFuture::ready("done".to_string());
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..10 {
            let o = order.clone();
            future.add_result_callback(move |v: &String| {
                assert_eq!(v, "done");
                o.borrow_mut().push(i);
            });
            // Synchronous: visible right after registration.
            assert_eq!(order.borrow().len(), i + 1);
        }
        assert_eq!(*order.borrow(), (0..10).collect::<Vec<_>>());

        // Nothing fires again.
        future.add_result_callback(|_| {});
        assert_eq!(order.borrow().len(), 10);
    }

    #[test]
    fn failed_future_never_invokes_result_callbacks() {
        let future: WorkFuture<i32> = WorkFuture::new();
        let results = Rc::new(Cell::new(0));
        let errors = Rc::new(RefCell::new(Vec::new()));

        let r = results.clone();
        future.add_result_callback(move |_| r.set(r.get() + 1));
        let e = errors.clone();
        future.add_error_callback(move |err| e.borrow_mut().push(err.message()));

        future.set_error(work_error("relation does not exist"));

        let r = results.clone();
        future.add_result_callback(move |_| r.set(r.get() + 1));
        let e = errors.clone();
        future.add_error_callback(move |err| e.borrow_mut().push(err.message()));

        assert_eq!(results.get(), 0);
        assert_eq!(errors.borrow().len(), 2);
        assert!(errors.borrow()[0].contains("relation does not exist"));
        assert!(future.is_failed());
    }

    #[test]
    fn successful_future_never_invokes_error_callbacks() {
        let future = WorkFuture::new();
        let errors = Rc::new(Cell::new(0));

        let e = errors.clone();
        future.add_error_callback(move |_| e.set(e.get() + 1));
        future.set_result(1u8);
        let e = errors.clone();
        future.add_error_callback(move |_| e.set(e.get() + 1));

        assert_eq!(errors.get(), 0);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn completing_twice_is_a_programming_error() {
        let future = WorkFuture::new();
        future.set_result(1);
        future.set_result(2);
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn error_after_result_is_a_programming_error() {
        let future = WorkFuture::new();
        future.set_result(1);
        future.set_error(work_error("late"));
    }

    #[test]
    fn panicking_callback_does_not_stop_the_others() {
        let future = WorkFuture::new();
        let hits = Rc::new(Cell::new(0));

        let h = hits.clone();
        future.add_result_callback(move |_: &i32| h.set(h.get() + 1));
        future.add_result_callback(|_| panic!("callback bug"));
        let h = hits.clone();
        future.add_result_callback(move |_| h.set(h.get() + 1));

        future.set_result(0);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn callback_may_register_another_callback() {
        let future = WorkFuture::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let inner_future = future.clone();
        let o = order.clone();
        future.add_result_callback(move |_: &i32| {
            o.borrow_mut().push("first");
            let o2 = o.clone();
            inner_future.add_result_callback(move |_| o2.borrow_mut().push("nested"));
        });
        let o = order.clone();
        future.add_result_callback(move |_| o.borrow_mut().push("second"));

        future.set_result(1);
        assert_eq!(*order.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn clones_share_the_outcome() {
        let future = WorkFuture::new();
        let other = future.clone();
        future.set_result(3);
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        other.add_result_callback(move |v| s.set(*v));
        assert_eq!(seen.get(), 3);
    }
}
