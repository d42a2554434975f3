//! Clocks and timer services used by the scheduler and the poll policy.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::SchedError;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock based on `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Expiry notification. Captures whatever user data it needs.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies an armed timer within the service that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Single-shot and repeating timers.
///
/// Callbacks may run on another thread (or, on a target, in interrupt
/// context). They fire at or after the requested duration and never while
/// the service holds its own lock, so a callback may call back into
/// [`TimerService::stop`].
pub trait TimerService: Send + Sync {
    fn start_one_shot(
        &self,
        duration_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError>;

    fn start_repeating(
        &self,
        period_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError>;

    /// Disarm a timer. Unknown or already expired ids are ignored.
    fn stop(&self, id: TimerId);
}

struct ArmedTimer {
    id: TimerId,
    deadline: u64,
    period: Option<u32>,
    callback: TimerCallback,
}

#[derive(Default)]
struct TimerTable {
    next_id: u64,
    armed: Vec<ArmedTimer>,
}

impl TimerTable {
    fn arm(
        &mut self,
        now: u64,
        duration_ms: u32,
        period: Option<u32>,
        callback: TimerCallback,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.armed.push(ArmedTimer {
            id,
            deadline: now.saturating_add(u64::from(duration_ms)),
            period,
            callback,
        });
        id
    }

    fn disarm(&mut self, id: TimerId) {
        self.armed.retain(|timer| timer.id != id);
    }

    fn earliest_deadline(&self) -> Option<u64> {
        self.armed.iter().map(|timer| timer.deadline).min()
    }

    /// Pop the earliest timer due at or before `now`, re-arming repeating ones.
    fn take_due(&mut self, now: u64) -> Option<(u64, TimerCallback)> {
        let pos = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.deadline <= now)
            .min_by_key(|(_, timer)| (timer.deadline, timer.id.0))
            .map(|(pos, _)| pos)?;
        let timer = &mut self.armed[pos];
        let deadline = timer.deadline;
        let callback = timer.callback.clone();
        match timer.period {
            Some(period) => timer.deadline = deadline.saturating_add(u64::from(period)),
            None => {
                self.armed.swap_remove(pos);
            }
        }
        Some((deadline, callback))
    }
}

fn nonzero_period(period_ms: u32) -> Result<u32, SchedError> {
    if period_ms == 0 {
        return Err(SchedError::Timer("repeating timer period must be nonzero".into()));
    }
    Ok(period_ms)
}

#[derive(Default)]
struct ManualTimerState {
    now: u64,
    table: TimerTable,
}

/// Deterministic clock and timer service for tests and simulations.
///
/// Time only moves when [`ManualTimer::advance`] is called; due callbacks
/// fire on the calling thread in deadline order.
#[derive(Clone, Default)]
pub struct ManualTimer {
    inner: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance time by `delta_ms`, firing every timer that comes due.
    /// Returns the number of callbacks fired.
    pub fn advance(&self, delta_ms: u64) -> usize {
        let target = self.inner.lock().now.saturating_add(delta_ms);
        let mut fired = 0;
        loop {
            let due = {
                let mut state = self.inner.lock();
                let due = state.table.take_due(target);
                if let Some((deadline, _)) = due.as_ref() {
                    state.now = state.now.max(*deadline);
                }
                due
            };
            let Some((_, callback)) = due else {
                break;
            };
            callback();
            fired += 1;
        }
        self.inner.lock().now = target;
        fired
    }

    /// Number of timers currently armed.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        self.inner.lock().table.armed.len()
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ManualTimer")
            .field("now", &state.now)
            .field("armed", &state.table.armed.len())
            .finish()
    }
}

impl Clock for ManualTimer {
    fn now_ms(&self) -> u64 {
        self.inner.lock().now
    }
}

impl TimerService for ManualTimer {
    fn start_one_shot(
        &self,
        duration_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        let mut state = self.inner.lock();
        let now = state.now;
        Ok(state.table.arm(now, duration_ms, None, callback))
    }

    fn start_repeating(
        &self,
        period_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        let period = nonzero_period(period_ms)?;
        let mut state = self.inner.lock();
        let now = state.now;
        Ok(state.table.arm(now, period, Some(period), callback))
    }

    fn stop(&self, id: TimerId) {
        self.inner.lock().table.disarm(id);
    }
}

#[derive(Default)]
struct WorkerState {
    table: TimerTable,
    shutdown: bool,
}

struct WorkerShared {
    start: Instant,
    state: Mutex<WorkerState>,
    cvar: Condvar,
}

impl WorkerShared {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Timer service backed by one background thread.
///
/// Callbacks run on the worker thread, concurrently with whatever context
/// drives the scheduler. Dropping the service stops the worker.
pub struct ThreadTimer {
    shared: Arc<WorkerShared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn spawn() -> Result<Self, SchedError> {
        let shared = Arc::new(WorkerShared {
            start: Instant::now(),
            state: Mutex::new(WorkerState::default()),
            cvar: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("appsched-timer".into())
            .spawn(move || run_timer_worker(&worker_shared))
            .map_err(|err| {
                SchedError::Timer(format!("failed to spawn timer thread: {err}").into())
            })?;
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    fn arm(&self, duration_ms: u32, period: Option<u32>, callback: TimerCallback) -> TimerId {
        let now = self.shared.now_ms();
        let id = self
            .shared
            .state
            .lock()
            .table
            .arm(now, duration_ms, period, callback);
        self.shared.cvar.notify_all();
        id
    }
}

fn run_timer_worker(shared: &WorkerShared) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = shared.now_ms();
        if let Some((_, callback)) = state.table.take_due(now) {
            MutexGuard::unlocked(&mut state, || callback());
            continue;
        }
        match state.table.earliest_deadline() {
            Some(deadline) => {
                let wait = Duration::from_millis(deadline.saturating_sub(now));
                shared.cvar.wait_for(&mut state, wait);
            }
            None => shared.cvar.wait(&mut state),
        }
    }
}

impl Clock for ThreadTimer {
    fn now_ms(&self) -> u64 {
        self.shared.now_ms()
    }
}

impl TimerService for ThreadTimer {
    fn start_one_shot(
        &self,
        duration_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        Ok(self.arm(duration_ms, None, callback))
    }

    fn start_repeating(
        &self,
        period_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        let period = nonzero_period(period_ms)?;
        Ok(self.arm(period, Some(period), callback))
    }

    fn stop(&self, id: TimerId) {
        self.shared.state.lock().table.disarm(id);
        self.shared.cvar.notify_all();
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.cvar.notify_all();
        if let Some(worker) = self.worker.take() {
            // a callback may drop the last owner from the worker itself
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTimer")
            .field("armed", &self.shared.state.lock().table.armed.len())
            .finish_non_exhaustive()
    }
}
