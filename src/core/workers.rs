//! Background loader pool.
//!
//! Runs the bulk pre-scan of freshly opened recordings off the scheduler
//! thread. Jobs go through a global injector; idle workers steal from each
//! other so a long stream scan never starves the other stream's scan.
//!
//! Each job carries the epoch it was queued under. Opening another recording
//! bumps the epoch, and jobs from the old one are skipped (or stop between
//! windows when they poll `is_current`).

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared loader epoch
#[derive(Debug, Clone, Default)]
pub struct Epoch(Arc<AtomicU64>);

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Invalidate everything queued so far; returns the new epoch
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}

/// Work-stealing pool for loader jobs
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    epoch: Epoch,
    /// Queued or running jobs
    pending: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` loader threads (at least one).
    pub fn new(num_threads: usize, epoch: Epoch) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let pending = Arc::clone(&pending);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("depthplay-loader-{}", worker_id))
                .spawn(move || {
                    trace!("Loader {} started", worker_id);
                    loop {
                        let job = local
                            .pop()
                            .or_else(|| injector.steal_batch_and_pop(&local).success())
                            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

                        if let Some(job) = job {
                            job();
                            pending.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    trace!("Loader {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!("Failed to spawn loader thread {}: {}", worker_id, e),
            }
        }

        trace!("Loader pool ready: {} threads", handles.len());
        Self {
            injector,
            handles,
            epoch,
            pending,
            shutdown,
        }
    }

    pub fn epoch(&self) -> &Epoch {
        &self.epoch
    }

    /// Queue `f`; it is skipped if the epoch moved on before a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current = self.epoch.clone();
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.injector.push(Box::new(move || {
            if current.is_current(epoch) {
                f();
            } else {
                trace!("Skipping stale loader job (epoch {})", epoch);
            }
        }));
    }

    /// No job queued or running
    pub fn is_idle(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // Queued jobs see a new epoch and return immediately
        self.epoch.advance();
        self.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Loader shutdown timed out, detaching");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("Loader pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_idle(workers: &Workers) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !workers.is_idle() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_jobs_run() {
        let workers = Workers::new(2, Epoch::new());
        let done = Arc::new(AtomicUsize::new(0));
        let epoch = workers.epoch().current();
        for _ in 0..10 {
            let done = Arc::clone(&done);
            workers.execute_with_epoch(epoch, move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        wait_idle(&workers);
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_stale_jobs_skipped() {
        let epoch = Epoch::new();
        let workers = Workers::new(1, epoch.clone());
        let done = Arc::new(AtomicUsize::new(0));

        let stale = epoch.current();
        epoch.advance();
        let d = Arc::clone(&done);
        workers.execute_with_epoch(stale, move || {
            d.fetch_add(1, Ordering::SeqCst);
        });
        wait_idle(&workers);
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }
}
