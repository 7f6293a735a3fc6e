//! Admission control for concurrent work
//!
//! A [`Scheduler`] runs at most `limit` tasks at once, admits queued tasks in
//! strict FIFO order, settles each task's [`TaskHandle`] exactly once, and
//! signals drain every time its outstanding count returns to zero.
//!
//! Two admission disciplines are supported:
//! - [`Discipline::AtRegistration`]: wrapping a task reserves its queue
//!   position immediately, even before the task is invoked. An uninvoked
//!   reservation at the head of the queue holds back everything behind it.
//! - [`Discipline::AtInvocation`]: the task enters the queue when called.
//!
//! Must be used from within a Tokio runtime; admitted tasks are spawned.

mod timeout;

pub use timeout::with_timeout_cancelling;

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace};

use crate::models::TestError;

/// Scheduler errors, delivered through a task's completion handle
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("task failed: {0:#}")]
    Task(anyhow::Error),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("timed out ({} ms)", .duration.as_millis())]
    Timeout { duration: Duration },

    #[error("task was abandoned before it settled")]
    Abandoned,
}

/// When a task takes its place in the queue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Discipline {
    AtRegistration,
    #[default]
    AtInvocation,
}

type DrainCallback = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    id: u64,
    job: Option<BoxFuture<'static, ()>>,
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<Entry>,
    running: usize,
    outstanding: usize,
    next_id: u64,
}

struct Shared {
    limit: usize,
    discipline: Discipline,
    queue: Mutex<Queue>,
    drains: watch::Sender<u64>,
    callbacks: Mutex<Vec<DrainCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn acquire(&self) {
        lock(&self.queue).outstanding += 1;
    }

    fn release(&self) {
        let drained = {
            let mut queue = lock(&self.queue);
            queue.outstanding = queue.outstanding.saturating_sub(1);
            queue.outstanding == 0
        };

        if drained {
            let callbacks: Vec<DrainCallback> = lock(&self.callbacks).clone();
            for callback in callbacks {
                callback();
            }
            self.drains.send_modify(|count| *count += 1);
            debug!("scheduler drained");
        }
    }

    fn push(&self, job: Option<BoxFuture<'static, ()>>) -> u64 {
        let mut queue = lock(&self.queue);
        let id = queue.next_id;
        queue.next_id += 1;
        queue.outstanding += 1;
        queue.entries.push_back(Entry { id, job });
        id
    }

    fn fill(&self, id: u64, job: BoxFuture<'static, ()>) {
        let mut queue = lock(&self.queue);
        if let Some(entry) = queue.entries.iter_mut().find(|e| e.id == id) {
            entry.job = Some(job);
        }
    }

    fn remove(&self, id: u64) {
        lock(&self.queue).entries.retain(|e| e.id != id);
    }

    /// Admit ready tasks from the head of the queue while slots are free
    fn pump(&self) {
        let mut ready = Vec::new();
        {
            let mut queue = lock(&self.queue);
            while queue.running < self.limit {
                let Some(job) = queue.entries.front_mut().and_then(|e| e.job.take()) else {
                    break;
                };
                queue.entries.pop_front();
                queue.running += 1;
                ready.push(job);
            }
            trace!(
                running = queue.running,
                queued = queue.entries.len(),
                "scheduler pumped"
            );
        }

        for job in ready {
            tokio::spawn(job);
        }
    }

    fn finish_running(&self) {
        lock(&self.queue).running -= 1;
        self.release();
        self.pump();
    }
}

/// Bounded-concurrency FIFO scheduler. Cloning shares the same queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler admitting up to `limit` concurrent tasks (at least one)
    pub fn new(limit: usize) -> Self {
        Self::with_discipline(limit, Discipline::default())
    }

    /// The serializing configuration used for per-file setup and teardown
    pub fn serial() -> Self {
        Self::new(1)
    }

    pub fn with_discipline(limit: usize, discipline: Discipline) -> Self {
        let (drains, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                limit: limit.max(1),
                discipline,
                queue: Mutex::new(Queue::default()),
                drains,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    pub fn discipline(&self) -> Discipline {
        self.shared.discipline
    }

    /// Tasks queued or running, plus held guards
    pub fn outstanding(&self) -> usize {
        lock(&self.shared.queue).outstanding
    }

    #[cfg(test)]
    pub fn running(&self) -> usize {
        lock(&self.shared.queue).running
    }

    /// How many times the scheduler has drained so far
    #[cfg(test)]
    pub fn drain_count(&self) -> u64 {
        *self.shared.drains.borrow()
    }

    /// Register a callback fired every time the outstanding count returns to zero
    pub fn on_drain(&self, callback: impl Fn() + Send + Sync + 'static) {
        lock(&self.shared.callbacks).push(Arc::new(callback));
    }

    /// Resolves once nothing is outstanding. Resolves immediately when already drained.
    pub async fn drained(&self) {
        let mut drains = self.shared.drains.subscribe();
        if self.outstanding() == 0 {
            return;
        }
        let _ = drains.changed().await;
    }

    /// Count as outstanding without taking a slot, keeping the scheduler from
    /// draining while more work may still be enqueued.
    pub fn hold(&self) -> DrainGuard {
        self.shared.acquire();
        DrainGuard {
            shared: Some(self.shared.clone()),
        }
    }

    /// Wrap a task for later invocation. Under [`Discipline::AtRegistration`]
    /// its queue position is reserved now.
    pub fn wrap<F>(&self, f: F) -> Queued<F> {
        let reserved = match self.shared.discipline {
            Discipline::AtRegistration => Some(self.shared.push(None)),
            Discipline::AtInvocation => None,
        };
        Queued {
            f,
            ticket: Ticket {
                shared: self.shared.clone(),
                reserved,
            },
        }
    }

    /// Enqueue a task right away
    pub fn enqueue<Fut, T>(&self, task: Fut) -> TaskHandle<T>
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.wrap(move || task).call()
    }
}

/// Keeps the scheduler from draining while alive
pub struct DrainGuard {
    shared: Option<Arc<Shared>>,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }
}

struct Ticket {
    shared: Arc<Shared>,
    reserved: Option<u64>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // A reservation that is never invoked gives its place back.
        if let Some(id) = self.reserved.take() {
            self.shared.remove(id);
            self.shared.release();
            self.shared.pump();
        }
    }
}

/// A task wrapped by a [`Scheduler`], waiting to be invoked
pub struct Queued<F> {
    f: F,
    ticket: Ticket,
}

impl<F, Fut, T> Queued<F>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    /// Invoke the task: it runs once admitted, and the handle settles with its outcome
    pub fn call(self) -> TaskHandle<T> {
        let Queued { f, mut ticket } = self;
        let (tx, rx) = oneshot::channel();
        let shared = ticket.shared.clone();
        let task = f();

        let job = async move {
            let settled = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                // A task failing with a scheduler error, such as a timeout
                // applied after admission, settles with that error as is.
                Ok(Err(err)) => Err(err
                    .downcast::<SchedulerError>()
                    .unwrap_or_else(SchedulerError::Task)),
                Err(payload) => Err(SchedulerError::Panicked(
                    TestError::panic(payload.as_ref()).message,
                )),
            };
            let _ = tx.send(settled);
            shared.finish_running();
        }
        .boxed();

        match ticket.reserved.take() {
            Some(id) => ticket.shared.fill(id, job),
            None => {
                ticket.shared.push(Some(job));
            }
        }
        ticket.shared.pump();

        TaskHandle { rx }
    }
}

/// Single-settlement completion handle of a scheduled task
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|settled| settled.unwrap_or(Err(SchedulerError::Abandoned)))
    }
}
