//! Single background lane for blocking work.
//!
//! The lane owns a context value (the activity manager in production) on
//! one dedicated thread and runs submitted jobs against it strictly one at
//! a time, in submission order. Completions travel back over a channel and
//! are resolved into [`WorkFuture`]s only when the foreground thread calls
//! [`WorkLane::dispatch`], so every callback runs on the foreground thread.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, trace};

use super::{WorkError, WorkFuture};

type Job<C> = Box<dyn FnOnce(&mut C) + Send>;
type Payload = Box<dyn Any + Send>;
type Resolver = Box<dyn FnOnce(Payload)>;
type Waker = Arc<dyn Fn() + Send + Sync>;

/// One unit of blocking work against a context `C`.
pub struct Worker<C, T> {
    label: &'static str,
    work: Box<dyn FnOnce(&mut C) -> Result<T, WorkError> + Send>,
}

impl<C: 'static, T: 'static> Worker<C, T> {
    pub fn new<F, E>(label: &'static str, work: F) -> Self
    where
        F: FnOnce(&mut C) -> Result<T, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            label,
            work: Box::new(move |ctx: &mut C| work(ctx).map_err(WorkError::new)),
        }
    }

    /// Wraps a function that does not need the context.
    pub fn blocking<F, E>(label: &'static str, work: F) -> Self
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(label, move |_: &mut C| work())
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Runs the work, converting an error or a panic into a [`WorkError`].
    pub fn run(self, ctx: &mut C) -> Result<T, WorkError> {
        let work = self.work;
        match catch_unwind(AssertUnwindSafe(|| work(ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(WorkError::from_panic(payload)),
        }
    }
}

struct Completion {
    id: u64,
    payload: Payload,
}

/// Background lane with concurrency 1.
///
/// Owned by the foreground thread; not `Send`.
pub struct WorkLane<C: Send + 'static> {
    jobs: Option<Sender<Job<C>>>,
    completions_tx: Sender<Completion>,
    completions: Receiver<Completion>,
    pending: RefCell<HashMap<u64, Resolver>>,
    next_id: Cell<u64>,
    waker: Option<Waker>,
    handle: Option<JoinHandle<C>>,
}

impl<C: Send + 'static> WorkLane<C> {
    /// Starts the lane thread with `context`.
    pub fn new(name: &str, context: C) -> io::Result<Self> {
        Self::start(name, context, None)
    }

    /// Like [`WorkLane::new`], calling `waker` on the lane thread after each
    /// completion is posted.
    pub fn with_waker(
        name: &str,
        context: C,
        waker: impl Fn() + Send + Sync + 'static,
    ) -> io::Result<Self> {
        Self::start(name, context, Some(Arc::new(waker)))
    }

    fn start(name: &str, mut context: C, waker: Option<Waker>) -> io::Result<Self> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job<C>>();
        let (completions_tx, completions) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = jobs_rx.recv() {
                    job(&mut context);
                }
                debug!("work lane stopped");
                context
            })?;

        Ok(Self {
            jobs: Some(jobs_tx),
            completions_tx,
            completions,
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(0),
            waker,
            handle: Some(handle),
        })
    }

    /// Queues a function against the context and returns its future.
    pub fn submit<T, E, F>(&self, label: &'static str, work: F) -> WorkFuture<T>
    where
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
        F: FnOnce(&mut C) -> Result<T, E> + Send + 'static,
    {
        self.run(Worker::new(label, work))
    }

    /// Queues a worker and returns its future.
    pub fn run<T: Send + 'static>(&self, worker: Worker<C, T>) -> WorkFuture<T> {
        let future = WorkFuture::new();
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let label = worker.label();
        let resolve = future.clone();
        self.pending.borrow_mut().insert(
            id,
            Box::new(move |payload: Payload| {
                match payload.downcast::<Result<T, WorkError>>() {
                    Ok(outcome) => resolve.complete(*outcome),
                    Err(_) => error!(label, "completion payload has unexpected type"),
                }
            }),
        );

        let tx = self.completions_tx.clone();
        let waker = self.waker.clone();
        let job: Job<C> = Box::new(move |ctx: &mut C| {
            trace!(label, id, "work started");
            let outcome: Result<T, WorkError> = worker.run(ctx);
            trace!(label, id, ok = outcome.is_ok(), "work finished");
            let payload: Payload = Box::new(outcome);
            if tx.send(Completion { id, payload }).is_ok()
                && let Some(waker) = &waker
            {
                waker();
            }
        });

        let sent = match &self.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.pending.borrow_mut().remove(&id);
            future.set_error(WorkError::new(LaneClosed));
        }
        future
    }

    /// Number of submitted jobs whose completion has not been dispatched.
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Resolves every completion posted so far. Returns how many were
    /// resolved. Never blocks.
    pub fn dispatch(&self) -> usize {
        let mut resolved = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.resolve(completion);
            resolved += 1;
        }
        resolved
    }

    /// Waits up to `timeout` for a completion, then resolves it and any
    /// others already posted.
    pub fn wait_dispatch(&self, timeout: Duration) -> usize {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.resolve(completion);
                1 + self.dispatch()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn resolve(&self, completion: Completion) {
        // Taken out of the map before running so callbacks can submit more work.
        let resolver = self.pending.borrow_mut().remove(&completion.id);
        match resolver {
            Some(resolve) => resolve(completion.payload),
            None => error!(id = completion.id, "completion for unknown job"),
        }
    }

    /// Stops accepting work, waits for queued jobs to finish and returns the
    /// context. Completions of the remaining jobs are dispatched.
    pub fn shutdown(mut self) -> Option<C> {
        self.jobs = None;
        let context = match self.handle.take()?.join() {
            Ok(ctx) => Some(ctx),
            Err(_) => {
                error!("work lane thread panicked");
                None
            }
        };
        self.dispatch();
        context
    }
}

impl<C: Send + 'static> Drop for WorkLane<C> {
    fn drop(&mut self) {
        // Closing the job channel lets the thread exit once its queue drains.
        self.jobs = None;
    }
}

/// Work submitted after the lane stopped.
#[derive(Debug)]
pub struct LaneClosed;

impl std::fmt::Display for LaneClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "background worker is not running")
    }
}

impl std::error::Error for LaneClosed {}
