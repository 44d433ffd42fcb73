//! A bounded worker pool built on `crossbeam-channel`.
//!
//! Jobs are queued on a bounded channel (senders block while the queue is
//! full) and run by a fixed set of named threads. Shutdown lets queued jobs
//! drain and waits up to a deadline; a timeout is logged, never raised.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::error::{CanopyError, Result};
use crate::util::interrupt::Interrupt;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with a bounded job queue.
pub struct WorkerPool {
    name: String,
    threads: usize,
    sender: Mutex<Option<Sender<Job>>>,
    /// Disconnects once every worker thread has exited.
    finished: Receiver<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `threads` workers fed by a queue holding at most `queue_capacity` jobs.
    pub fn new(name: impl Into<String>, threads: usize, queue_capacity: usize) -> Result<Self> {
        let name = name.into();
        if threads == 0 {
            return Err(CanopyError::invalid_argument(format!(
                "worker pool '{name}' needs at least one thread"
            )));
        }
        if queue_capacity == 0 {
            return Err(CanopyError::invalid_argument(format!(
                "worker pool '{name}' needs a queue capacity of at least one"
            )));
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Job>(queue_capacity);
        let (finished_tx, finished) = crossbeam_channel::bounded::<()>(0);
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let finished_tx = finished_tx.clone();
            let thread_name = format!("{name}-{i}");
            let handle = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    // Held until the thread exits.
                    let _finished = finished_tx;
                    while let Ok(job) = receiver.recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!("job panicked on worker thread '{thread_name}'");
                        }
                    }
                })?;
            handles.push(handle);
        }
        debug!("started worker pool '{name}' with {threads} threads");

        Ok(WorkerPool {
            name,
            threads,
            sender: Mutex::new(Some(sender)),
            finished,
            handles: Mutex::new(handles),
        })
    }

    /// A pool sized to the number of available CPUs.
    pub fn with_default_threads(name: impl Into<String>, queue_capacity: usize) -> Result<Self> {
        Self::new(name, num_cpus::get().max(1), queue_capacity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Queue a job without waiting for its result.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Clone the sender so a full queue does not block other submitters
        // or a concurrent shutdown.
        let sender = self.sender.lock().clone().ok_or_else(|| {
            CanopyError::illegal_state(format!("worker pool '{}' is shut down", self.name))
        })?;
        sender.send(Box::new(job)).map_err(|_| {
            CanopyError::illegal_state(format!("worker pool '{}' has no workers", self.name))
        })
    }

    /// Queue a job and return a handle to wait for its result.
    pub fn submit<T, F>(&self, job: F) -> Result<Task<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.execute(move || {
            let _ = tx.send(job());
        })?;
        Ok(Task {
            state: TaskState::Pending(rx),
        })
    }

    /// Stop accepting jobs, let queued jobs finish and wait up to `timeout`
    /// for the workers to exit. Returns false (and logs) on timeout.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return true;
        }
        drop(sender);

        let deadline = Instant::now() + timeout;
        match self.finished.recv_deadline(deadline) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                for handle in self.handles.lock().drain(..) {
                    let _ = handle.join();
                }
                debug!("worker pool '{}' shut down", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "worker pool '{}' did not terminate within {:?}; continuing",
                    self.name, timeout
                );
                false
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.threads)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit on their own once the sender is gone.
        self.sender.lock().take();
    }
}

enum TaskState<T> {
    Ready(Result<T>),
    Pending(Receiver<Result<T>>),
}

/// Handle to the result of a submitted job.
pub struct Task<T> {
    state: TaskState<T>,
}

impl<T> Task<T> {
    /// A task that has already completed on the calling thread.
    pub fn ready(result: Result<T>) -> Self {
        Task {
            state: TaskState::Ready(result),
        }
    }

    /// Block until the job completes.
    ///
    /// When `interrupt` is raised while waiting, the wait aborts with
    /// `Cancelled` and the flag is cleared; the job itself keeps running.
    pub fn wait(self, interrupt: Option<&Interrupt>) -> Result<T> {
        let rx = match self.state {
            TaskState::Ready(result) => return result,
            TaskState::Pending(rx) => rx,
        };
        let abandoned = || CanopyError::cancelled("task was dropped before it completed");
        match interrupt {
            Some(interrupt) => select! {
                recv(rx) -> msg => msg.map_err(|_| abandoned())?,
                recv(interrupt.receiver()) -> _ => Err(CanopyError::cancelled("wait was interrupted")),
            },
            None => rx.recv().map_err(|_| abandoned())?,
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            TaskState::Ready(_) => "ready",
            TaskState::Pending(_) => "pending",
        };
        f.debug_struct("Task").field("state", &state).finish()
    }
}

/// Submit `job` to `pool`, or run it inline when there is no pool.
pub fn run_or_submit<T, F>(pool: Option<&WorkerPool>, job: F) -> Result<Task<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match pool {
        Some(pool) => pool.submit(job),
        None => Ok(Task::ready(job())),
    }
}
