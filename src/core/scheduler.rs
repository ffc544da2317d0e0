//! Self-tuning repeating task.
//!
//! Runs a task on a dedicated thread. After every run the next wait is
//! recomputed as `overhead + average execution time`, where the average is an
//! EWMA seeded with the initial period. The wait is armed only after the
//! previous run returned, so there is never more than one invocation in
//! flight and the tick rate settles just above the real cost of the work.
//!
//! # States
//!
//! `Idle -> Scheduled -> Running -> Scheduled -> ...`, with `Stopped`
//! reachable from anywhere through `cancel()`.
//!
//! Waits are interruptible: control messages (`Cancel`, `Reassign`) arrive
//! over a channel the thread blocks on with a deadline.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, trace, warn};
use serde::{Deserialize, Serialize};

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seed of the execution average and first wait (ms)
    pub initial_period_ms: u64,
    /// Added to the average to get the next wait (ms)
    pub overhead_ms: u64,
    /// EWMA window `k`
    pub window: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_period_ms: 33,
            overhead_ms: 2,
            window: 8,
        }
    }
}

/// Exponentially weighted average of execution times.
///
/// `avg' = (avg * (k - 1) + sample) / k`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionAverage {
    average_ms: f64,
    window: f64,
}

impl ExecutionAverage {
    pub fn new(seed_ms: f64, window: u32) -> Self {
        Self {
            average_ms: seed_ms.max(0.0),
            window: window.max(1) as f64,
        }
    }

    pub fn record(&mut self, sample_ms: f64) {
        self.average_ms = (self.average_ms * (self.window - 1.0) + sample_ms.max(0.0)) / self.window;
    }

    pub fn average_ms(&self) -> f64 {
        self.average_ms
    }

    /// Wait before the next run
    pub fn next_delay(&self, overhead: Duration) -> Duration {
        overhead + Duration::from_secs_f64(self.average_ms / 1000.0)
    }
}

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Running,
    Stopped,
}

enum Control {
    Cancel,
    Reassign(Duration),
}

#[derive(Debug)]
struct Shared {
    state: SchedulerState,
    average: ExecutionAverage,
    /// Replaces the next adaptive wait once
    forced_delay: Option<Duration>,
    cycles: u64,
}

type Task = Box<dyn FnMut() -> anyhow::Result<()> + Send + 'static>;

/// Repeating task with adaptive period
pub struct AdaptiveScheduler {
    name: String,
    config: SchedulerConfig,
    shared: Arc<Mutex<Shared>>,
    control: Option<Sender<Control>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl AdaptiveScheduler {
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        let shared = Shared {
            state: SchedulerState::Idle,
            average: ExecutionAverage::new(config.initial_period_ms as f64, config.window),
            forced_delay: None,
            cycles: 0,
        };
        Self {
            name: name.into(),
            config,
            shared: Arc::new(Mutex::new(shared)),
            control: None,
            handle: None,
        }
    }

    /// Start running `task`, first after `initial_period`.
    ///
    /// Errors returned (or panics raised) by the task are logged and count
    /// as completed cycles. A scheduler can be started once.
    pub fn start<F>(&mut self, task: F, initial_period: Duration) -> anyhow::Result<()>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        {
            let mut shared = lock(&self.shared);
            if shared.state != SchedulerState::Idle {
                anyhow::bail!("scheduler '{}' already started", self.name);
            }
            shared.average = ExecutionAverage::new(initial_period.as_secs_f64() * 1000.0, self.config.window);
            shared.state = SchedulerState::Scheduled;
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::clone(&self.shared);
        let overhead = Duration::from_millis(self.config.overhead_ms);
        let task: Task = Box::new(task);

        let handle = thread::Builder::new()
            .name(format!("depthplay-{}", self.name))
            .spawn(move || run_loop(task, shared, rx, initial_period, overhead))
            .context("failed to spawn scheduler thread")?;

        debug!(
            "Scheduler '{}' started: period={:?}, overhead={:?}, window={}",
            self.name, initial_period, overhead, self.config.window
        );
        self.control = Some(tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop scheduling. No run begins after this returns; a run already in
    /// progress completes.
    pub fn cancel(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.state == SchedulerState::Stopped {
                return;
            }
            shared.state = SchedulerState::Stopped;
        }
        if let Some(tx) = &self.control {
            let _ = tx.send(Control::Cancel);
        }
        debug!("Scheduler '{}' cancelled", self.name);
    }

    /// Force the next wait to `period` without touching the average.
    ///
    /// A wait in progress is re-armed to `period` from now.
    pub fn reassign_period(&self, period: Duration) {
        let mut shared = lock(&self.shared);
        match shared.state {
            SchedulerState::Scheduled => {
                if let Some(tx) = &self.control {
                    let _ = tx.send(Control::Reassign(period));
                }
            }
            SchedulerState::Idle | SchedulerState::Running => shared.forced_delay = Some(period),
            SchedulerState::Stopped => {}
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.shared).state
    }

    /// Current execution average (ms)
    pub fn average_ms(&self) -> f64 {
        lock(&self.shared).average.average_ms()
    }

    /// Completed runs
    pub fn cycles(&self) -> u64 {
        lock(&self.shared).cycles
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state(), SchedulerState::Idle | SchedulerState::Stopped)
    }
}

impl Drop for AdaptiveScheduler {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Scheduler '{}' thread panicked", self.name);
            }
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

fn run_loop(mut task: Task, shared: Arc<Mutex<Shared>>, rx: Receiver<Control>, first_delay: Duration, overhead: Duration) {
    let mut deadline = Instant::now() + first_delay;

    loop {
        // Scheduled: wait for the deadline or a control message
        match rx.recv_deadline(deadline) {
            Ok(Control::Cancel) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Control::Reassign(period)) => {
                trace!("Wait re-armed to {:?}", period);
                deadline = Instant::now() + period;
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        {
            let mut state = lock(&shared);
            if state.state == SchedulerState::Stopped {
                break;
            }
            state.state = SchedulerState::Running;
        }

        let started = Instant::now();
        match catch_unwind(AssertUnwindSafe(&mut task)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Scheduled task failed: {:#}", e),
            Err(_) => error!("Scheduled task panicked"),
        }
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let delay = {
            let mut state = lock(&shared);
            state.cycles += 1;
            state.average.record(elapsed_ms);
            if state.state == SchedulerState::Stopped {
                break;
            }
            state.state = SchedulerState::Scheduled;
            let forced = state.forced_delay.take();
            forced.unwrap_or_else(|| state.average.next_delay(overhead))
        };
        trace!("Task took {:.2} ms, next run in {:?}", elapsed_ms, delay);
        deadline = Instant::now() + delay;
    }

    lock(&shared).state = SchedulerState::Stopped;
    trace!("Scheduler thread exiting");
}
