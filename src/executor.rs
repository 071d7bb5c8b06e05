//! Executor capabilities consumed by promises.
//!
//! A [`WorkExecutor`] runs background bodies, timeout checks and uncaught
//! error polling. A [`UiExecutor`] runs continuations registered with the
//! `*_on_ui` operators. Both are injected through
//! [`PromiseOptions`](crate::PromiseOptions); the defaults are a
//! [`CachedThreadPool`] and a [`PoolUiExecutor`] posting back onto it.
use crate::error::panic_message;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks in the background.
pub trait WorkExecutor: Send + Sync {
    fn submit(&self, task: Task) -> TaskHandle;

    /// Runs `task` after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        self.submit(Box::new(move || {
            thread::sleep(delay);
            task()
        }))
    }
}

/// Runs tasks on a designated thread.
pub trait UiExecutor: Send + Sync {
    fn post(&self, task: Task);
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

/// Cancellation handle for a submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<AtomicU8>,
}

impl TaskHandle {
    /// Wraps `task` so it only runs if the returned handle was not cancelled
    /// first. Executors hand the wrapped task to their threads.
    pub fn guard(task: Task) -> (TaskHandle, Task) {
        let handle = TaskHandle {
            state: Arc::new(AtomicU8::new(QUEUED)),
        };
        let state = handle.state.clone();
        let guarded: Task = Box::new(move || {
            if state
                .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let _finished = Finish(&state);
            task();
        });
        (handle, guarded)
    }

    /// Stops the task if it has not started yet.
    ///
    /// Returns `false` when the task is already running; running tasks are
    /// never interrupted.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current != RUNNING,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == FINISHED
    }
}

struct Finish<'a>(&'a AtomicU8);

impl Drop for Finish<'_> {
    fn drop(&mut self) {
        self.0.store(FINISHED, Ordering::Release);
    }
}

fn run_contained(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        tracing::error!(
            panic = %panic_message(payload.as_ref()),
            "promise worker task panicked"
        );
    }
}

/// A pool that grows a thread whenever no idle worker is available and lets
/// idle workers exit after `keep_alive`.
///
/// Bodies that block for a long time therefore never starve timeout checks.
#[derive(Clone)]
pub struct CachedThreadPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    // idle workers minus jobs already promised to them
    idle: AtomicUsize,
    spawned: AtomicUsize,
    keep_alive: Duration,
    name: String,
}

impl CachedThreadPool {
    pub fn new() -> Self {
        Self::with_keep_alive("promise-worker", Duration::from_secs(60))
    }

    pub fn with_keep_alive(name: impl Into<String>, keep_alive: Duration) -> Self {
        let (sender, receiver) = unbounded();
        CachedThreadPool {
            shared: Arc::new(PoolShared {
                sender,
                receiver,
                idle: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
                keep_alive,
                name: name.into(),
            }),
        }
    }

    /// Number of worker threads started so far.
    pub fn spawned_threads(&self) -> usize {
        self.shared.spawned.load(Ordering::Relaxed)
    }

    fn execute(&self, job: Task) {
        let claimed = self
            .shared
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idle| idle.checked_sub(1))
            .is_ok();
        if claimed {
            // the pool owns the receiver, so sending cannot fail
            if let Err(err) = self.shared.sender.send(job) {
                self.spawn_worker(err.into_inner());
            }
        } else {
            self.spawn_worker(job);
        }
    }

    fn spawn_worker(&self, first: Task) {
        let shared = self.shared.clone();
        let index = shared.spawned.fetch_add(1, Ordering::Relaxed);
        let builder = thread::Builder::new().name(format!("{}-{}", shared.name, index));
        let started = launch(first, |job| {
            builder.spawn(move || worker_loop(shared, job)).map(drop)
        });
        if !started {
            self.shared.spawned.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// Hands `first` to a thread started by `spawn`, or runs it on the calling
/// thread when no thread could be started. Returns whether a thread started.
fn launch<S>(first: Task, spawn: S) -> bool
where
    S: FnOnce(Task) -> io::Result<()>,
{
    let slot = Arc::new(Mutex::new(Some(first)));
    let handed = slot.clone();
    let started = spawn(Box::new(move || {
        if let Some(job) = handed.lock().take() {
            job();
        }
    }));
    match started {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(%err, "failed to spawn promise worker thread, running task inline");
            if let Some(job) = slot.lock().take() {
                run_contained(job);
            }
            false
        }
    }
}

impl Default for CachedThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CachedThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedThreadPool")
            .field("name", &self.shared.name)
            .field("spawned", &self.spawned_threads())
            .field("keep_alive", &self.shared.keep_alive)
            .finish()
    }
}

fn worker_loop(shared: Arc<PoolShared>, first: Task) {
    run_contained(first);
    loop {
        shared.idle.fetch_add(1, Ordering::AcqRel);
        match shared.receiver.recv_timeout(shared.keep_alive) {
            Ok(job) => run_contained(job),
            Err(RecvTimeoutError::Timeout) => {
                let retired = shared
                    .idle
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idle| {
                        idle.checked_sub(1)
                    })
                    .is_ok();
                if retired {
                    return;
                }
                // a submitter already counted on this worker; its job is in flight
                match shared.receiver.recv() {
                    Ok(job) => run_contained(job),
                    Err(_) => return,
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

impl WorkExecutor for CachedThreadPool {
    fn submit(&self, task: Task) -> TaskHandle {
        let (handle, job) = TaskHandle::guard(task);
        self.execute(job);
        handle
    }
}

/// UI executor for headless processes: "UI" work goes to the work pool.
#[derive(Clone)]
pub struct PoolUiExecutor {
    executor: Arc<dyn WorkExecutor>,
}

impl PoolUiExecutor {
    pub fn new(executor: Arc<dyn WorkExecutor>) -> Self {
        PoolUiExecutor { executor }
    }
}

impl UiExecutor for PoolUiExecutor {
    fn post(&self, task: Task) {
        self.executor.submit(task);
    }
}

/// A single dedicated thread that runs posted tasks in order, standing in for
/// an application's main loop.
#[derive(Clone)]
pub struct UiThread {
    sender: Sender<Task>,
    thread_id: ThreadId,
}

impl UiThread {
    pub fn spawn(name: impl Into<String>) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<Task>();
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            for task in receiver {
                run_contained(task);
            }
        })?;
        Ok(UiThread {
            sender,
            thread_id: handle.thread().id(),
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

impl UiExecutor for UiThread {
    fn post(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::error!("ui thread has stopped, dropping posted task");
        }
    }
}

impl fmt::Debug for UiThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UiThread")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
