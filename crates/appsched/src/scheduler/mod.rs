//! Cooperative run-to-completion task scheduler.
//!
//! Tasks live in a fixed pool of records linked into a FIFO run queue. A
//! record becomes *triggered* when its timer expires (or immediately, for a
//! zero-delay task); [`Scheduler::step`] runs triggered tasks from the
//! caller's main loop. Timer notifications may arrive from another thread,
//! so every access to the queue goes through a [`CriticalCell`] that is
//! never held while a task callback runs.

mod queue;
mod record;

use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use crate::config::SchedulerConfig;
use crate::critical::CriticalCell;
use crate::error::SchedError;
use crate::pool::{SlotId, SlotPool};
use crate::timer::{TimerCallback, TimerId, TimerService};

use queue::TaskQueue;
use record::{Job, TaskRecord};

pub use record::{TaskCallback, TaskFilter, TaskHandle, TaskInfo};

/// Answer given to the power manager when an interrupt handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsrExitAction {
    /// Triggered work is pending; stay awake.
    Wakeup,
    /// Nothing pending; the power manager may go back to sleep.
    Ignore,
}

struct QueueState {
    pool: SlotPool,
    queue: TaskQueue,
    records: Box<[TaskRecord]>,
    running: bool,
}

impl QueueState {
    fn record_mut(&mut self, id: SlotId) -> Option<&mut TaskRecord> {
        if self.pool.is_live(id) {
            self.records.get_mut(id.index())
        } else {
            None
        }
    }

    /// Unlink and free a live record, returning its timer if one was armed.
    fn release(&mut self, id: SlotId) -> Result<Option<TimerId>, SchedError> {
        if !self.pool.is_live(id) || !self.queue.unlink(id.index()) {
            return Err(SchedError::invalid_parameter("task not queued"));
        }
        let record = &mut self.records[id.index()];
        let timer = record.timer.take();
        record.clear();
        self.pool.free(id)?;
        Ok(timer)
    }

    fn any_triggered(&self) -> bool {
        self.queue
            .iter()
            .any(|index| self.records[index].triggered)
    }

    /// First triggered record in queue order, with its flag cleared.
    fn take_triggered(&mut self) -> Option<Job> {
        let index = self
            .queue
            .iter()
            .find(|index| self.records[*index].triggered)?;
        let id = self.pool.live_id(index)?;
        let record = &mut self.records[index];
        record.triggered = false;
        record.job(TaskHandle(id))
    }

    fn handles(&self) -> impl Iterator<Item = (SlotId, &TaskRecord)> + '_ {
        self.queue.iter().filter_map(|index| {
            let id = self.pool.live_id(index)?;
            Some((id, &self.records[index]))
        })
    }
}

struct Shared {
    config: SchedulerConfig,
    timers: Arc<dyn TimerService>,
    state: CriticalCell<QueueState>,
}

/// Handle to a cooperative scheduler instance.
///
/// Cloning is cheap and yields another handle to the same queue, so task
/// callbacks may capture a clone to add or remove tasks.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("tasks", &self.task_count(TaskFilter::All))
            .field("running", &self.is_running())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler with every slot preallocated.
    pub fn new(
        config: SchedulerConfig,
        timers: Arc<dyn TimerService>,
    ) -> Result<Self, SchedError> {
        config.validate()?;
        let pool = SlotPool::new(config.max_queue_size)?;
        let records = (0..config.max_queue_size)
            .map(|_| TaskRecord::default())
            .collect();
        let state = QueueState {
            pool,
            queue: TaskQueue::new(config.max_queue_size),
            records,
            running: config.enable_on_startup,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                timers,
                state: CriticalCell::new(state),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> SchedulerConfig {
        self.shared.config
    }

    /// Queue a task for the next [`Scheduler::step`].
    ///
    /// No handle is produced, so the task cannot be removed before it runs.
    pub fn add(&self, callback: TaskCallback, data: &[u8]) -> Result<(), SchedError> {
        self.add_delayed(callback, 0, data).map(|_| ())
    }

    /// Queue a one-shot task that becomes runnable after `delay_ms`.
    ///
    /// A zero delay triggers the task immediately and returns `None`;
    /// otherwise the handle can be used to cancel the task before it runs.
    pub fn add_delayed(
        &self,
        callback: TaskCallback,
        delay_ms: u32,
        data: &[u8],
    ) -> Result<Option<TaskHandle>, SchedError> {
        let handle = self.insert(callback, data, false, delay_ms)?;
        Ok((delay_ms != 0).then_some(handle))
    }

    /// Queue a task that runs every `period_ms` until removed.
    pub fn add_periodic(
        &self,
        callback: TaskCallback,
        period_ms: u32,
        data: &[u8],
    ) -> Result<TaskHandle, SchedError> {
        if period_ms == 0 {
            return Err(SchedError::invalid_parameter("period must be nonzero"));
        }
        self.insert(callback, data, true, period_ms)
    }

    fn insert(
        &self,
        callback: TaskCallback,
        data: &[u8],
        periodic: bool,
        delay_ms: u32,
    ) -> Result<TaskHandle, SchedError> {
        let max_data_size = self.shared.config.max_data_size;
        if data.len() > max_data_size {
            return Err(SchedError::invalid_parameter(format!(
                "payload of {} bytes exceeds {max_data_size}",
                data.len()
            )));
        }
        let max_queue_size = self.shared.config.max_queue_size;
        let immediate = !periodic && delay_ms == 0;
        let id = self.shared.state.with(|state| {
            if state.queue.len() >= max_queue_size {
                return Err(SchedError::ResourceExhausted);
            }
            let id = state.pool.allocate()?;
            let record = &mut state.records[id.index()];
            record.activate(callback, data, periodic);
            record.triggered = immediate;
            state.queue.push_back(id.index());
            Ok(id)
        })?;
        let handle = TaskHandle(id);
        debug!(slot = id.index(), periodic, delay_ms, "task added");
        if immediate {
            return Ok(handle);
        }

        let notify = trigger_notification(Arc::downgrade(&self.shared), id);
        let started = if periodic {
            self.shared.timers.start_repeating(delay_ms, notify)
        } else {
            self.shared.timers.start_one_shot(delay_ms, notify)
        };
        match started {
            Ok(timer) => {
                let attached = self.shared.state.with(|state| match state.record_mut(id) {
                    Some(record) => {
                        record.timer = Some(timer);
                        true
                    }
                    None => false,
                });
                if !attached {
                    self.shared.timers.stop(timer);
                }
                Ok(handle)
            }
            Err(err) => {
                let _ = self.shared.state.with(|state| state.release(id));
                Err(err)
            }
        }
    }

    /// Cancel a queued task and return its slot to the pool.
    pub fn remove(&self, handle: TaskHandle) -> Result<(), SchedError> {
        let timer = self.shared.state.with(|state| state.release(handle.0))?;
        if let Some(timer) = timer {
            self.shared.timers.stop(timer);
        }
        debug!(slot = handle.slot(), "task removed");
        Ok(())
    }

    /// Run triggered tasks. Returns how many ran.
    ///
    /// Runs at most one task per call, or every triggered task (including
    /// tasks triggered by the ones that ran) when eager mode is configured.
    /// Does nothing while paused.
    pub fn step(&self) -> usize {
        let mut executed = 0;
        loop {
            let job = self.shared.state.with(|state| {
                if state.running {
                    state.take_triggered()
                } else {
                    None
                }
            });
            let Some(job) = job else {
                break;
            };
            debug!(slot = job.handle.slot(), "executing task");
            job.run();
            executed += 1;
            let id = job.handle.0;
            let finished_timer = self.shared.state.with(|state| {
                let one_shot = state.record_mut(id).is_some_and(|record| !record.periodic);
                if one_shot {
                    state.release(id).ok().flatten()
                } else {
                    None
                }
            });
            if let Some(timer) = finished_timer {
                self.shared.timers.stop(timer);
            }
            if !self.shared.config.eager_mode {
                break;
            }
        }
        executed
    }

    #[must_use]
    pub fn task_count(&self, filter: TaskFilter) -> usize {
        self.shared.state.with(|state| {
            state
                .handles()
                .filter(|(_, record)| filter.matches(record.triggered))
                .count()
        })
    }

    /// Visit every queued task in queue order and sum what the visitor
    /// returns. The visitor sees a snapshot taken before the first call.
    pub fn foreach_task(&self, mut visit: impl FnMut(&TaskInfo) -> u32) -> u32 {
        let snapshot: Vec<TaskInfo> = self.shared.state.with(|state| {
            state
                .handles()
                .filter_map(|(id, record)| record.info(TaskHandle(id)))
                .collect()
        });
        snapshot
            .iter()
            .fold(0_u32, |total, info| total.saturating_add(visit(info)))
    }

    /// Human readable table of the queue, one task per line.
    #[must_use]
    pub fn dump_tasks(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{:<4} {:<11} {:<8} data", "slot", "state", "kind");
        self.foreach_task(|task| {
            let state = if task.triggered { "triggered" } else { "waiting" };
            let kind = if task.periodic { "periodic" } else { "one-shot" };
            let _ = writeln!(
                out,
                "{:<4} {:<11} {:<8} {:02x?}",
                task.handle.slot(),
                state,
                kind,
                task.data()
            );
            1
        });
        out
    }

    pub fn pause(&self) {
        self.shared.state.with(|state| state.running = false);
        info!("scheduler paused");
    }

    pub fn resume(&self) {
        self.shared.state.with(|state| state.running = true);
        info!("scheduler resumed");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.state.with(|state| state.running)
    }

    /// Whether the system may enter a low-power state: no task is waiting
    /// to be executed.
    #[must_use]
    pub fn is_ok_to_sleep(&self) -> bool {
        !self.shared.state.with(|state| state.any_triggered())
    }

    #[must_use]
    pub fn sleep_on_isr_exit(&self) -> IsrExitAction {
        if self.is_ok_to_sleep() {
            IsrExitAction::Ignore
        } else {
            IsrExitAction::Wakeup
        }
    }
}

/// Timer expiry hook: marks the record triggered if it is still the same task.
fn trigger_notification(shared: Weak<Shared>, id: SlotId) -> TimerCallback {
    Arc::new(move || {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.state.with(|state| {
            if let Some(record) = state.record_mut(id) {
                record.triggered = true;
            }
        });
    })
}
