//! Worker Pool - Bounded Task Dispatch
//!
//! Every storage operation in the process, whether it came from the broker
//! consume loop or from an RPC, runs as a [`Task`] on one shared pool.
//!
//! ## Model
//!
//! - a fixed-capacity queue (`queue_capacity`)
//! - a fixed number of long-lived workers (`workers`), each pulling one task
//!   at a time and running it to completion
//!
//! [`WorkerPool::submit`] never waits. When the queue is full it returns
//! [`PoolError::QueueFull`] immediately; that is the only backpressure signal
//! the system has.
//!
//! ## Worker Lifecycle
//!
//! ```text
//! Idle ──recv──▶ Executing ──done/panic──▶ Idle ── ... ──queue closed──▶ Stopped
//! ```
//!
//! A task that panics is caught and logged; the worker keeps going.
//!
//! ## Shutdown
//!
//! [`WorkerPool::shutdown`] closes the queue and waits for every worker.
//! Tasks that were already queued still run; running tasks are not
//! interrupted. Callers bound the wait with their own timeout.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::PoolError;

/// A unit of work. Results travel back through whatever channel the task
/// captured, never through the pool.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_workers() -> usize {
    10
}

fn default_queue_capacity() -> usize {
    100
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active: Arc<AtomicUsize>,
    capacity: usize,
}

impl WorkerPool {
    /// Start the workers. Must be called from within a Tokio runtime.
    ///
    /// Zero workers or zero capacity are raised to 1.
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        let rx: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let active = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, Arc::clone(&rx), Arc::clone(&active))))
            .collect();

        info!(workers, queue_capacity = capacity, "Worker pool started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            active,
            capacity,
        }
    }

    /// Enqueue `task` without waiting.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.as_ref().ok_or(PoolError::ShutDown)?;
        sender.try_send(Box::pin(task)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
        })
    }

    /// Tasks currently executing.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Tasks waiting in the queue.
    pub fn queued_tasks(&self) -> usize {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Close the queue and wait for every worker to drain it and exit.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_none() {
            return;
        }
        let queued = sender
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        drop(sender);

        info!(
            active = self.active_tasks(),
            queued, "Worker pool shutting down, draining queue"
        );

        let handles: Vec<_> = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker exited abnormally");
            }
        }

        info!("Worker pool stopped");
    }
}

async fn worker_loop(id: usize, rx: SharedReceiver, active: Arc<AtomicUsize>) {
    debug!(worker = id, "Worker started");
    loop {
        // Only one idle worker waits on the queue; the rest wait on the lock.
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else { break };

        active.fetch_add(1, Ordering::Relaxed);
        let outcome = AssertUnwindSafe(task).catch_unwind().await;
        active.fetch_sub(1, Ordering::Relaxed);

        if let Err(panic) = outcome {
            error!(worker = id, panic = %panic_message(panic.as_ref()), "Task panicked");
        }
    }
    debug!(worker = id, "Worker stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
