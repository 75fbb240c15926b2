//! Single-writer persistence queue.
//!
//! One dedicated thread owns the SQLite connection and runs submitted jobs
//! strictly in submission order (global FIFO, not per player). Callers never
//! touch the connection and never block on a database round-trip: they
//! either await a oneshot reply ([`PersistenceQueue::execute`]) or register
//! callbacks that are handed to a [`CallbackDispatcher`] for the caller's own
//! loop to run ([`PersistenceQueue::submit`]).
//!
//! Submission is the only place with a timeout. A job that is accepted
//! runs to completion or failure, unless a shutdown gives up waiting for
//! it, in which case its submitter is told [`TaskError::QueueClosed`].
//! Nothing is retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use rusqlite::Connection;
use tracing::{debug, error, info, trace, warn};

use crate::config::QueueConfig;
use crate::error::{Result, TaskError};

/// Poll interval while an async submitter waits for queue room.
const ENQUEUE_BACKOFF: Duration = Duration::from_millis(5);

/// A callback marshalled back to the submitter's context.
pub type Callback = Box<dyn FnOnce() + Send>;

/// Delivers completion callbacks to wherever the caller wants them run.
pub trait CallbackDispatcher: Send + Sync {
    /// Schedule `callback` on the target context.
    fn dispatch(&self, callback: Callback);
}

/// Runs callbacks immediately on the queue thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl CallbackDispatcher for InlineDispatcher {
    fn dispatch(&self, callback: Callback) {
        callback();
    }
}

/// Buffers callbacks until the owning loop calls [`CallbackPump::run_pending`].
///
/// This is how results get back onto a host's main loop.
pub struct CallbackPump {
    tx: Sender<Callback>,
    rx: Receiver<Callback>,
}

impl CallbackPump {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Run every callback queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(callback) = self.rx.try_recv() {
            callback();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one callback, then run it and anything else
    /// already queued.
    pub fn run_pending_timeout(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(callback) => {
                callback();
                1 + self.run_pending()
            }
            Err(_) => 0,
        }
    }
}

impl Default for CallbackPump {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackDispatcher for CallbackPump {
    fn dispatch(&self, callback: Callback) {
        if self.tx.send(callback).is_err() {
            debug!("callback pump closed, dropping callback");
        }
    }
}

/// Tunables for [`PersistenceQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Prefix for the consumer thread name (`<name>-db-queue`).
    pub name: String,
    pub capacity: usize,
    pub submit_timeout: Duration,
    pub slow_threshold: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            name: "questline".to_owned(),
            capacity: config.capacity.max(1),
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
            slow_threshold: Duration::from_millis(config.slow_query_ms),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }
}

/// Rejection path for a job that will never run.
type Reject = Box<dyn FnOnce(TaskError) + Send>;

struct QueuedJob {
    name: String,
    run: Box<dyn FnOnce(&mut Connection) + Send>,
    /// `None` when dropping `run` already reports the failure.
    reject: Option<Reject>,
}

/// Serialized executor owning the only write connection of this process.
pub struct PersistenceQueue {
    options: QueueOptions,
    sender: Mutex<Option<Sender<QueuedJob>>>,
    accepting: AtomicBool,
    abort: Arc<AtomicBool>,
    finished: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Arc<dyn CallbackDispatcher>,
}

impl PersistenceQueue {
    /// Spawn the consumer thread around an already-open connection.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Io`] if the thread cannot be spawned.
    pub fn start(
        conn: Connection,
        options: QueueOptions,
        dispatcher: Arc<dyn CallbackDispatcher>,
    ) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<QueuedJob>(options.capacity);
        let (finished_tx, finished_rx) = crossbeam_channel::bounded::<()>(1);
        let abort = Arc::new(AtomicBool::new(false));

        let thread_abort = Arc::clone(&abort);
        let slow = options.slow_threshold;
        let worker = std::thread::Builder::new()
            .name(format!("{}-db-queue", options.name))
            .spawn(move || {
                consume(conn, &rx, &thread_abort, slow);
                let _ = finished_tx.send(());
            })?;

        info!(
            queue = %options.name,
            capacity = options.capacity,
            "persistence queue started"
        );

        Ok(Self {
            options,
            sender: Mutex::new(Some(tx)),
            accepting: AtomicBool::new(true),
            abort,
            finished: finished_rx,
            worker: Mutex::new(Some(worker)),
            dispatcher,
        })
    }

    /// The dispatcher used by [`Self::submit`].
    pub fn dispatcher(&self) -> &Arc<dyn CallbackDispatcher> {
        &self.dispatcher
    }

    /// Whether new work is still accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Run `op` on the queue thread and await its result.
    ///
    /// The caller's task is suspended, not its thread. Failures are logged
    /// with the operation name and returned unchanged.
    pub async fn execute<T, F>(&self, name: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        let op_name = name.to_owned();
        let job = QueuedJob {
            name: name.to_owned(),
            run: Box::new(move |conn| {
                let result = op(conn);
                if let Err(e) = &result {
                    warn!(op = %op_name, error = %e, "persistence operation failed");
                }
                let _ = reply_tx.send(result);
            }),
            reject: None,
        };
        self.enqueue_async(job).await?;
        reply_rx
            .await
            .map_err(|_| TaskError::QueueClosed(name.to_owned()))?
    }

    /// Callback-style submission.
    ///
    /// `on_success` / `on_error` are handed to the queue's dispatcher. Blocks
    /// for at most the submit timeout. If the queue stays full the job is
    /// dropped and `on_error` receives [`TaskError::QueueSaturated`].
    pub fn submit<T, F, S, E>(&self, name: &str, op: F, on_success: S, on_error: E)
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(TaskError) + Send + 'static,
    {
        let op_name = name.to_owned();
        let dispatcher = Arc::clone(&self.dispatcher);
        let failure = Arc::new(Mutex::new(Some(on_error)));
        let job_failure = Arc::clone(&failure);
        let reject_failure = Arc::clone(&failure);
        let reject_dispatcher = Arc::clone(&self.dispatcher);
        let job = QueuedJob {
            name: name.to_owned(),
            run: Box::new(move |conn| match op(conn) {
                Ok(value) => dispatcher.dispatch(Box::new(move || on_success(value))),
                Err(e) => {
                    warn!(op = %op_name, error = %e, "persistence operation failed");
                    if let Some(on_error) = take_callback(&job_failure) {
                        dispatcher.dispatch(Box::new(move || on_error(e)));
                    }
                }
            }),
            reject: Some(Box::new(move |e| {
                if let Some(on_error) = take_callback(&reject_failure) {
                    reject_dispatcher.dispatch(Box::new(move || on_error(e)));
                }
            })),
        };

        if let Err(e) = self.enqueue_blocking(job) {
            if let Some(on_error) = take_callback(&failure) {
                self.dispatcher.dispatch(Box::new(move || on_error(e)));
            }
        }
    }

    /// Stop accepting work, drain the backlog, then stop the consumer.
    ///
    /// Waits up to the configured shutdown timeout. After that the job in
    /// flight is left to finish, and everything still queued behind it is
    /// rejected with [`TaskError::QueueClosed`] instead of run. Returns
    /// `true` if the backlog fully drained.
    pub fn shutdown(&self) -> bool {
        if !self.accepting.swap(false, Ordering::AcqRel) {
            return true;
        }
        info!(queue = %self.options.name, "persistence queue shutting down");

        // Dropping the last sender lets the consumer exit once the backlog is empty.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let drained = match self.finished.recv_timeout(self.options.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };

        let handle = self.worker.lock().ok().and_then(|mut w| w.take());
        if drained {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(queue = %self.options.name, "persistence queue thread panicked");
                }
            }
            info!(queue = %self.options.name, "persistence queue drained");
        } else {
            self.abort.store(true, Ordering::Release);
            warn!(
                queue = %self.options.name,
                timeout_ms = self.options.shutdown_timeout.as_millis() as u64,
                "persistence queue did not drain in time, forcing stop"
            );
        }
        drained
    }

    fn live_sender(&self, name: &str) -> Result<Sender<QueuedJob>> {
        if !self.is_accepting() {
            return Err(TaskError::QueueClosed(name.to_owned()));
        }
        self.sender
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or_else(|| TaskError::QueueClosed(name.to_owned()))
    }

    fn enqueue_blocking(&self, job: QueuedJob) -> Result<()> {
        let name = job.name.clone();
        let sender = self.live_sender(&name)?;
        match sender.send_timeout(job, self.options.submit_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(op = %name, "persistence queue saturated, dropping operation");
                Err(TaskError::QueueSaturated(name))
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(TaskError::QueueClosed(name)),
        }
    }

    async fn enqueue_async(&self, job: QueuedJob) -> Result<()> {
        let name = job.name.clone();
        let sender = self.live_sender(&name)?;
        let deadline = Instant::now() + self.options.submit_timeout;
        let mut pending = job;
        loop {
            match sender.try_send(pending) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(TaskError::QueueClosed(name)),
                Err(TrySendError::Full(back)) => {
                    if Instant::now() >= deadline {
                        warn!(op = %name, "persistence queue saturated, dropping operation");
                        return Err(TaskError::QueueSaturated(name));
                    }
                    pending = back;
                    tokio::time::sleep(ENQUEUE_BACKOFF).await;
                }
            }
        }
    }
}

impl Drop for PersistenceQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_callback<E>(slot: &Mutex<Option<E>>) -> Option<E> {
    slot.lock().ok().and_then(|mut s| s.take())
}

fn consume(mut conn: Connection, rx: &Receiver<QueuedJob>, abort: &AtomicBool, slow: Duration) {
    while let Ok(job) = rx.recv() {
        if abort.load(Ordering::Acquire) {
            debug!(op = %job.name, "queue aborted, rejecting job");
            if let Some(reject) = job.reject {
                reject(TaskError::QueueClosed(job.name));
            }
            continue;
        }
        let started = Instant::now();
        (job.run)(&mut conn);
        let elapsed = started.elapsed();
        if elapsed > slow {
            warn!(
                op = %job.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow persistence operation"
            );
        } else {
            trace!(op = %job.name, elapsed_us = elapsed.as_micros() as u64, "persistence op done");
        }
    }
}
