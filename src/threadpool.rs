//! Fixed pool of pinned worker threads. A batch is an array of tasks; idle
//! workers claim the next task by decrementing a shared counter, so no
//! central dispatcher is needed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};

use crate::config::SessionConfig;
use crate::error::PoolError;

pub type Task = Box<dyn Fn() + Send + Sync>;

/// Auto-reset event: a `wait` consumes the `set` that released it.
#[derive(Default)]
struct Signal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    fn set(&self) {
        *self.raised.lock() = true;
        self.condvar.notify_one();
    }

    fn wait(&self) {
        let mut raised = self.raised.lock();
        while !*raised {
            self.condvar.wait(&mut raised);
        }
        *raised = false;
    }
}

#[derive(Default)]
struct Batch {
    tasks: Mutex<Option<Arc<[Task]>>>,
    remaining: AtomicIsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    shutdown: AtomicBool,
}

struct Worker {
    go: Arc<Signal>,
    done: Arc<Signal>,
    handle: Option<JoinHandle<()>>,
}

pub struct ThreadPool {
    workers: Vec<Worker>,
    batch: Arc<Batch>,
    in_flight: AtomicBool,
    batch_size: AtomicUsize,
    tasks_per_thread: usize,
}

fn worker_loop(batch: Arc<Batch>, go: Arc<Signal>, done: Arc<Signal>) {
    loop {
        go.wait();
        if batch.shutdown.load(Ordering::Acquire) {
            done.set();
            return;
        }
        let tasks = batch.tasks.lock().clone();
        if let Some(tasks) = tasks {
            loop {
                let index = batch.remaining.fetch_sub(1, Ordering::AcqRel) - 1;
                if index < 0 {
                    break;
                }
                if catch_unwind(AssertUnwindSafe(|| (tasks[index as usize])())).is_err() {
                    batch.panicked.fetch_add(1, Ordering::AcqRel);
                }
                batch.completed.fetch_add(1, Ordering::AcqRel);
            }
        }
        done.set();
    }
}

impl ThreadPool {
    pub fn new(config: &SessionConfig) -> Result<ThreadPool, PoolError> {
        let thread_count = if config.thread_count > 0 {
            config.thread_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        let core_ids = if config.pin_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            vec![]
        };
        // built up front so that a failed spawn drops the workers started so far
        let mut pool = ThreadPool {
            workers: Vec::with_capacity(thread_count),
            batch: Arc::new(Batch::default()),
            in_flight: AtomicBool::new(false),
            batch_size: AtomicUsize::new(0),
            tasks_per_thread: config.tasks_per_thread.max(1),
        };
        for i in 0..thread_count {
            let go = Arc::new(Signal::default());
            let done = Arc::new(Signal::default());
            let core = (!core_ids.is_empty()).then(|| core_ids[i % core_ids.len()]);
            let handle = {
                let (batch, go, done) = (pool.batch.clone(), go.clone(), done.clone());
                std::thread::Builder::new()
                    .name(format!("render-worker-{i}"))
                    .spawn(move || {
                        if let Some(core) = core {
                            if !core_affinity::set_for_current(core) {
                                warn!("could not pin worker {i} to core {}", core.id);
                            }
                        }
                        worker_loop(batch, go, done)
                    })
                    .map_err(|e| PoolError::Spawn(e.to_string()))?
            };
            pool.workers.push(Worker {
                go,
                done,
                handle: Some(handle),
            });
        }
        debug!(
            "thread pool started with {} workers, pinned: {}",
            thread_count,
            !core_ids.is_empty()
        );
        Ok(pool)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of tasks a batch should be cut into to keep every worker busy.
    pub fn task_count(&self) -> usize {
        self.thread_count() * self.tasks_per_thread
    }

    /// Starts a batch and returns immediately. Fails if the previous batch has
    /// not been waited for.
    pub fn do_tasks(&self, tasks: Vec<Task>) -> Result<(), PoolError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(PoolError::Busy);
        }
        let count = tasks.len();
        *self.batch.tasks.lock() = Some(Arc::from(tasks));
        self.batch.completed.store(0, Ordering::Release);
        self.batch.panicked.store(0, Ordering::Release);
        self.batch.remaining.store(count as isize, Ordering::Release);
        self.batch_size.store(count, Ordering::Release);
        for worker in &self.workers {
            worker.go.set();
        }
        Ok(())
    }

    /// Blocks until every worker has run out of tasks.
    pub fn wait_till_done(&self) -> Result<(), PoolError> {
        if !self.in_flight.load(Ordering::Acquire) {
            return Ok(());
        }
        for worker in &self.workers {
            worker.done.wait();
        }
        *self.batch.tasks.lock() = None;
        self.in_flight.store(false, Ordering::Release);
        match self.batch.panicked.load(Ordering::Acquire) {
            0 => Ok(()),
            panicked => Err(PoolError::TasksPanicked(panicked)),
        }
    }

    pub fn work_done(&self) -> bool {
        self.batch.completed.load(Ordering::Acquire) >= self.batch_size.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.wait_till_done() {
            warn!("thread pool dropped after a failed batch: {e}");
        }
        self.batch.shutdown.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.go.set();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!("worker thread exited with a panic");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threads: usize) -> ThreadPool {
        ThreadPool::new(&SessionConfig {
            thread_count: threads,
            tasks_per_thread: 4,
            pin_threads: false,
            seed: 0,
        })
        .unwrap()
    }

    #[test]
    fn every_task_runs_once() {
        let pool = pool(4);
        assert_eq!(pool.task_count(), 16);
        let hits = Arc::new((0..100).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
        for _ in 0..3 {
            let tasks = (0..100)
                .map(|i| {
                    let hits = hits.clone();
                    Box::new(move || {
                        hits[i].fetch_add(1, Ordering::Relaxed);
                    }) as Task
                })
                .collect();
            pool.do_tasks(tasks).unwrap();
            pool.wait_till_done().unwrap();
            assert!(pool.work_done());
        }
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 3));
    }

    #[test]
    fn second_batch_while_busy_is_rejected() {
        let pool = pool(2);
        let gate = Arc::new(Mutex::new(()));
        let guard = gate.lock();
        let task_gate = gate.clone();
        pool.do_tasks(vec![Box::new(move || drop(task_gate.lock()))])
            .unwrap();
        assert_eq!(pool.do_tasks(vec![]), Err(PoolError::Busy));
        drop(guard);
        pool.wait_till_done().unwrap();
        pool.do_tasks(vec![]).unwrap();
        pool.wait_till_done().unwrap();
    }

    #[test]
    fn panicking_task_is_reported() {
        let pool = pool(2);
        let tasks: Vec<Task> = vec![Box::new(|| panic!("boom")), Box::new(|| {})];
        pool.do_tasks(tasks).unwrap();
        assert_eq!(pool.wait_till_done(), Err(PoolError::TasksPanicked(1)));
        pool.do_tasks(vec![Box::new(|| {})]).unwrap();
        assert_eq!(pool.wait_till_done(), Ok(()));
    }
}
