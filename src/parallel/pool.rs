//! Fixed-size worker pool with an idle barrier.
//!
//! Workers drain a single FIFO channel of boxed tasks. `wait_idle` is the
//! barrier the tick pipeline uses between phases: it returns only once the
//! queue is empty and no task is running, and the mutex it synchronizes on
//! makes every write performed by those tasks visible to the caller.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Sender};
use log::warn;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue-empty / in-flight accounting shared with the workers.
struct PoolState {
    /// Submitted tasks that have not yet finished running.
    outstanding: Mutex<usize>,
    idle: Condvar,
}

impl PoolState {
    fn task_submitted(&self) {
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding += 1;
    }

    fn task_finished(&self) {
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding -= 1;
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Decrements the outstanding count even if the task panics, so a bad task
/// cannot wedge `wait_idle` forever.
struct FinishGuard<'a>(&'a PoolState);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

/// A fixed set of worker threads draining one FIFO task queue.
pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Spawn a pool of `threads` workers. `threads` must be at least 1.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Task>();
        let state = Arc::new(PoolState {
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let receiver = receiver.clone();
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("petri-worker-{i}"))
                .spawn(move || {
                    // Runs until every sender is dropped. A panicking task
                    // is contained so the pool keeps its full width.
                    while let Ok(task) = receiver.recv() {
                        let _guard = FinishGuard(&state);
                        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
                        if outcome.is_err() {
                            warn!("worker task panicked; continuing");
                        }
                    }
                })
                .context("failed to spawn worker thread")?;
            workers.push(handle);
        }

        Ok(WorkerPool {
            sender: Some(sender),
            workers,
            state,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task. FIFO submission order; completion order is unspecified.
    ///
    /// Safe to call from any thread. After `shutdown` this is a no-op.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => {
                self.state.task_submitted();
                if sender.send(Box::new(task)).is_err() {
                    // Channel closed under us; undo the accounting.
                    self.state.task_finished();
                    warn!("task submitted to a stopped worker pool, dropping");
                }
            }
            None => warn!("task submitted after pool shutdown, dropping"),
        }
    }

    /// Block until the queue is empty and no task is in flight.
    ///
    /// Establishes happens-before with every task that ran: their writes are
    /// visible once this returns.
    pub fn wait_idle(&self) {
        let mut outstanding = self.state.outstanding.lock().unwrap();
        while *outstanding > 0 {
            outstanding = self.state.idle.wait(outstanding).unwrap();
        }
    }

    /// Finish queued work and join every worker.
    pub fn shutdown(&mut self) {
        // Dropping the sender closes the channel; workers exit after
        // draining what was already queued.
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
