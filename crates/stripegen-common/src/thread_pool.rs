//! A small fixed-size worker pool used to run expensive work (weight
//! compression) in the background while the plan search continues.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    tasks: VecDeque<Task>,
    shutting_down: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    /// Wakes worker threads when a task is queued or shutdown starts.
    task_ready: Condvar,
}

/// Manages a set of background threads executing tasks from a queue.
///
/// A pool created with zero threads runs every task synchronously inside
/// [`ThreadPool::execute`], which keeps single-threaded callers (and tests)
/// free of any cross-thread scheduling.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Creates a pool with `num_threads` workers. `0` means synchronous mode.
    pub fn new(num_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                shutting_down: false,
            }),
            task_ready: Condvar::new(),
        });

        let workers = (0..num_threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Creates a pool sized from the `STRIPEGEN_NUM_THREADS` environment
    /// variable, falling back to the number of available CPUs.
    pub fn with_default_size() -> Self {
        let num_threads = std::env::var("STRIPEGEN_NUM_THREADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            });
        log::debug!("Creating thread pool with {num_threads} thread(s)");
        Self::new(num_threads)
    }

    /// Queues `task` for execution and returns a handle that can be waited
    /// on for completion.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, task: F) -> TaskHandle {
        let handle = TaskHandle::pending();

        if self.workers.is_empty() {
            task();
            handle.mark_done();
            return handle;
        }

        let done = handle.clone();
        let mut queue = self.shared.queue.lock().unwrap();
        queue.tasks.push_back(Box::new(move || {
            task();
            done.mark_done();
        }));
        drop(queue);
        self.shared.task_ready.notify_one();

        handle
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.shutting_down = true;
        }
        self.shared.task_ready.notify_all();
        for worker in self.workers.drain(..) {
            // A panicking task already poisoned the result its waiters see.
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.shutting_down {
                    return;
                }
                queue = shared.task_ready.wait(queue).unwrap();
            }
        };
        task();
    }
}

/// Completion handle for a queued task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl TaskHandle {
    fn pending() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn mark_done(&self) {
        let (done, cvar) = &*self.state;
        *done.lock().unwrap() = true;
        cvar.notify_all();
    }

    /// Blocks until the task has finished executing.
    pub fn wait(&self) {
        let (done, cvar) = &*self.state;
        let mut done = done.lock().unwrap();
        while !*done {
            done = cvar.wait(done).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn synchronous_mode_runs_inline() {
        let pool = ThreadPool::new(0);
        let counter = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&counter);
        let handle = pool.execute(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        // Already complete before wait in synchronous mode.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        handle.wait();
    }

    #[test]
    fn background_tasks_all_run() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..64)
            .map(|_| {
                let c = Arc::clone(&counter);
                pool.execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in &handles {
            handle.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn drop_waits_for_queued_tasks() {
        let counter = Arc::new(AtomicU32::new(0));
        {
            let pool = ThreadPool::new(2);
            for _ in 0..16 {
                let c = Arc::clone(&counter);
                pool.execute(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
