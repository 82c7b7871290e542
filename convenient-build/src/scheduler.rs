//! Fixed-size worker pool
//!
//! Workers pull boxed closures from one shared FIFO queue. A worker sleeps
//! on a condition variable only while the queue is empty and the pool is not
//! stopping; each submit wakes one sleeper. Shutdown stops intake, lets the
//! workers drain everything already queued and joins them.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Worker pool executing fire-and-forget tasks
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
}

impl TaskScheduler {
    /// Start a pool with `workers` threads (at least one)
    pub fn new(workers: usize) -> SchedulerResult<Self> {
        let worker_count = workers.max(1);
        let shared = Arc::new(Shared::default());

        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("build-worker-{index}"))
                .spawn(move || worker_loop(&shared, index))
                .map_err(SchedulerError::Spawn)?;
            handles.push(handle);
        }

        info!("Started task scheduler with {} workers", worker_count);
        Ok(Self {
            shared,
            workers: handles,
            worker_count,
        })
    }

    /// Start a pool sized to the host's hardware parallelism
    pub fn with_default_workers() -> SchedulerResult<Self> {
        Self::new(num_cpus::get())
    }

    /// Queue `task` for execution on some worker
    pub fn submit<F>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut queue = self.shared.lock();
            if queue.stopping {
                return Err(SchedulerError::ShuttingDown);
            }
            queue.jobs.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Tasks waiting for a worker
    pub fn queue_depth(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Whether shutdown has begun
    pub fn is_stopping(&self) -> bool {
        self.shared.lock().stopping
    }

    /// Stop accepting work, run everything already queued and join the
    /// workers. Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        self.shared.lock().stopping = true;
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        debug!("Task scheduler shut down");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("worker_count", &self.worker_count)
            .field("queue_depth", &self.queue_depth())
            .finish_non_exhaustive()
    }
}

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let job = {
            let mut queue = shared
                .available
                .wait_while(shared.lock(), |q| q.jobs.is_empty() && !q.stopping)
                .unwrap_or_else(PoisonError::into_inner);

            match queue.jobs.pop_front() {
                Some(job) => job,
                // Empty and stopping
                None => return,
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Task panicked on worker {}", index);
        }
    }
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The pool no longer accepts work
    #[error("Task scheduler is shutting down")]
    ShuttingDown,

    /// A worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_runs_all_submitted_tasks() {
        let mut scheduler = TaskScheduler::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            scheduler
                .submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        scheduler.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let mut scheduler = TaskScheduler::new(1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let finished = Arc::new(AtomicUsize::new(0));

        // Park the only worker so the rest queue up behind it
        scheduler
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        for _ in 0..5 {
            let finished = Arc::clone(&finished);
            scheduler
                .submit(move || {
                    finished.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        assert!(scheduler.queue_depth() >= 5);

        release_tx.send(()).unwrap();
        scheduler.shutdown();

        assert_eq!(finished.load(Ordering::SeqCst), 5);
        assert_eq!(scheduler.queue_depth(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let mut scheduler = TaskScheduler::new(2).unwrap();
        scheduler.shutdown();

        assert!(scheduler.is_stopping());
        assert!(matches!(
            scheduler.submit(|| {}),
            Err(SchedulerError::ShuttingDown)
        ));
        // Second shutdown is harmless
        scheduler.shutdown();
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let mut scheduler = TaskScheduler::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        scheduler.submit(|| panic!("compiler exploded")).unwrap();
        let after = Arc::clone(&counter);
        scheduler
            .submit(move || {
                after.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        scheduler.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(TaskScheduler::new(3).unwrap().worker_count(), 3);
        assert_eq!(TaskScheduler::new(0).unwrap().worker_count(), 1);
        assert!(TaskScheduler::with_default_workers().unwrap().worker_count() >= 1);
    }

    #[test]
    fn test_tasks_run_in_parallel() {
        let mut scheduler = TaskScheduler::new(2).unwrap();
        let (tx, rx) = mpsc::channel();

        // Each task waits for the other: only completes if both run at once
        let (a_tx, a_rx) = mpsc::channel::<()>();
        let (b_tx, b_rx) = mpsc::channel::<()>();
        let tx_a = tx.clone();
        scheduler
            .submit(move || {
                a_tx.send(()).unwrap();
                let ok = b_rx.recv_timeout(Duration::from_secs(5)).is_ok();
                tx_a.send(ok).unwrap();
            })
            .unwrap();
        scheduler
            .submit(move || {
                b_tx.send(()).unwrap();
                let ok = a_rx.recv_timeout(Duration::from_secs(5)).is_ok();
                tx.send(ok).unwrap();
            })
            .unwrap();
        scheduler.shutdown();

        let results: Vec<bool> = rx.iter().collect();
        assert_eq!(results, vec![true, true]);
    }
}
