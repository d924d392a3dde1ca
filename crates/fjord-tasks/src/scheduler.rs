use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Queue {
    tasks: VecDeque<Task>,
    running: bool,
    /// Bumped by every stop; workers from an older pool exit on mismatch
    epoch: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Worker pool with a shared FIFO queue.
///
/// Tasks scheduled while the pool is stopped stay queued until the next
/// [`start`](Self::start). Stopping does not drain the queue: workers exit as
/// soon as they observe the stop, and undequeued tasks wait for a restart.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl TaskScheduler {
    /// Process-wide scheduler, created on first use and started lazily by the caller
    pub fn global() -> &'static TaskScheduler {
        static GLOBAL: OnceLock<TaskScheduler> = OnceLock::new();
        GLOBAL.get_or_init(TaskScheduler::new)
    }

    /// One worker per available CPU
    pub fn new() -> Self {
        let workers = thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_workers(workers)
    }

    pub fn with_workers(count: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    tasks: VecDeque::new(),
                    running: false,
                    epoch: 0,
                }),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
            worker_count: count.max(1),
        }
    }

    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.lock().tasks.push_back(Box::new(task));
        self.shared.available.notify_one();
    }

    /// Spawn the workers. No-op if already running.
    pub fn start(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = {
            let mut queue = self.shared.lock();
            if queue.running {
                return;
            }
            queue.running = true;
            queue.epoch
        };

        for id in 0..self.worker_count {
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name(format!("fjord-worker-{}", id))
                .spawn(move || worker_loop(&shared, epoch))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!("Failed to spawn worker {}: {}", id, e),
            }
        }
        info!("Task scheduler started with {} workers", workers.len());
    }

    /// Signal the workers and wait for all of them. No-op if not running.
    ///
    /// Called from a scheduled task, this waits for every other worker; the
    /// calling worker exits once its task returns.
    pub fn stop(&self) {
        let workers = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            let mut queue = self.shared.lock();
            if !queue.running {
                return;
            }
            queue.running = false;
            queue.epoch = queue.epoch.wrapping_add(1);
            std::mem::take(&mut *workers)
        };
        self.shared.available.notify_all();

        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
        info!("Task scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    /// Live worker threads
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Tasks queued but not yet picked up
    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("running", &self.is_running())
            .field("workers", &self.worker_count)
            .field("pending", &self.pending())
            .finish()
    }
}

fn worker_loop(shared: &Shared, epoch: u64) {
    loop {
        let task = {
            let mut queue = shared.lock();
            loop {
                if !queue.running || queue.epoch != epoch {
                    debug!("Worker exiting");
                    return;
                }
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            warn!("Scheduled task panicked");
        }
    }
}
