//! Settle timer.
//!
//! A port that was just powered on or reset is parked in `NOT_POWERED`
//! until its registers become reliable. The settle timer is a background
//! thread that wakes every tick and releases parked ports into `POWERED`
//! once the settle delay has elapsed. It exits as soon as nothing is
//! parked and is started again on demand.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::config::TimingConfig;
use crate::production::ShutdownCoordinator;
use crate::state::{ModuleState, PortTable};

#[derive(Debug, Default)]
struct WaitingInner {
    ports: BTreeSet<usize>,
    timer_alive: bool,
}

/// Ports parked for the settle timer.
///
/// Every member has a record with `awaiting_power_settle` set. The timer's
/// liveness flag lives under the same lock so that "set is empty, timer
/// exits" and "port parked, timer needed" cannot interleave.
///
/// Lock order: a port lock is always taken before this one.
#[derive(Debug, Default)]
pub struct WaitingSet {
    inner: Mutex<WaitingInner>,
}

impl WaitingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, port: usize) -> bool {
        self.inner.lock().ports.insert(port)
    }

    pub fn remove(&self, port: usize) -> bool {
        self.inner.lock().ports.remove(&port)
    }

    pub fn contains(&self, port: usize) -> bool {
        self.inner.lock().ports.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ports.is_empty()
    }

    pub fn snapshot(&self) -> Vec<usize> {
        self.inner.lock().ports.iter().copied().collect()
    }

    pub fn timer_alive(&self) -> bool {
        self.inner.lock().timer_alive
    }

    /// Marks the timer as running if it is needed and not running yet.
    fn claim_timer(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.timer_alive || inner.ports.is_empty() {
            return false;
        }
        inner.timer_alive = true;
        true
    }

    /// Marks the timer as stopped if nothing is parked.
    fn release_timer_if_idle(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.ports.is_empty() {
            inner.timer_alive = false;
            return true;
        }
        false
    }

    fn release_timer(&self) {
        self.inner.lock().timer_alive = false;
    }
}

/// Runs one timer pass at `now` and returns the ports released to `POWERED`.
///
/// Entries whose port is no longer parked in `NOT_POWERED` (reset by an
/// unplug event) are dropped.
pub fn settle_pass(
    ports: &PortTable,
    waiting: &WaitingSet,
    settle_delay: Duration,
    now: Instant,
) -> Vec<usize> {
    let mut released = Vec::new();

    for index in waiting.snapshot() {
        let mut port = ports.lock(index);

        if port.current_state() != ModuleState::NotPowered || !port.awaiting_power_settle() {
            debug!(port = index, state = %port.current_state(), "Dropping stale settle entry");
            waiting.remove(index);
            continue;
        }

        match port.settle_elapsed(now) {
            Some(elapsed) if elapsed >= settle_delay => {
                port.complete_settle();
                waiting.remove(index);
                debug!(port = index, ?elapsed, "STATE_LOG settle done, advanced to POWERED");
                released.push(index);
            }
            _ => {}
        }
    }

    released
}

/// Starts and tracks the settle timer thread.
#[derive(Debug)]
pub struct SettleTimer {
    ports: Arc<PortTable>,
    waiting: Arc<WaitingSet>,
    interval: Duration,
    settle_delay: Duration,
    shutdown: ShutdownCoordinator,
    handle: Option<JoinHandle<()>>,
}

impl SettleTimer {
    pub fn new(
        ports: Arc<PortTable>,
        waiting: Arc<WaitingSet>,
        timing: &TimingConfig,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            ports,
            waiting,
            interval: timing.timer_interval(),
            settle_delay: timing.settle_delay(),
            shutdown,
            handle: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.waiting.timer_alive()
    }

    /// Starts the timer thread if ports are parked and none is running.
    ///
    /// Returns true if a new thread was started.
    pub fn ensure_running(&mut self) -> bool {
        if !self.waiting.claim_timer() {
            return false;
        }

        // A previous run has already released its claim, reap it.
        if let Some(previous) = self.handle.take() {
            let _ = previous.join();
        }

        let ports = Arc::clone(&self.ports);
        let waiting = Arc::clone(&self.waiting);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        let settle_delay = self.settle_delay;

        let spawned = thread::Builder::new()
            .name("settle-timer".to_string())
            .spawn(move || run(&ports, &waiting, interval, settle_delay, &shutdown));

        match spawned {
            Ok(handle) => {
                info!(parked = self.waiting.len(), "Settle timer started");
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to start settle timer");
                self.waiting.release_timer();
                false
            }
        }
    }

    /// Waits for a running timer thread to exit.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Settle timer thread panicked");
            }
        }
    }
}

fn run(
    ports: &PortTable,
    waiting: &WaitingSet,
    interval: Duration,
    settle_delay: Duration,
    shutdown: &ShutdownCoordinator,
) {
    let mut iteration = 0u64;
    loop {
        thread::sleep(interval);
        if shutdown.should_shutdown() {
            waiting.release_timer();
            break;
        }

        let released = settle_pass(ports, waiting, settle_delay, Instant::now());
        debug!(iteration, ?released, "Settle timer pass");
        iteration += 1;

        if waiting.release_timer_if_idle() {
            debug!("Settle timer exiting, no parked ports");
            break;
        }
    }
}
