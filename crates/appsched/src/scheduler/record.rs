//! Task records, handles and the diagnostic view of a queued task.

use std::sync::Arc;

use crate::config::MAX_DATA_SIZE_LIMIT;
use crate::pool::SlotId;
use crate::timer::TimerId;

/// Task body. Receives the payload copied in when the task was added.
pub type TaskCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Opaque reference to a queued task.
///
/// Handles are generation-tagged: once the task is removed or has run to
/// completion, the handle is rejected instead of addressing a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub(super) SlotId);

impl TaskHandle {
    /// Pool slot backing this task.
    #[must_use]
    pub fn slot(self) -> usize {
        self.0.index()
    }
}

/// Selects which tasks [`crate::Scheduler::task_count`] counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    All,
    Triggered,
    Untriggered,
}

impl TaskFilter {
    pub(super) fn matches(self, triggered: bool) -> bool {
        match self {
            Self::All => true,
            Self::Triggered => triggered,
            Self::Untriggered => !triggered,
        }
    }
}

/// Snapshot of a queued task handed to [`crate::Scheduler::foreach_task`].
#[derive(Clone)]
pub struct TaskInfo {
    pub handle: TaskHandle,
    pub callback: TaskCallback,
    pub triggered: bool,
    pub periodic: bool,
    data: [u8; MAX_DATA_SIZE_LIMIT],
    len: usize,
}

impl TaskInfo {
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl std::fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInfo")
            .field("handle", &self.handle)
            .field("triggered", &self.triggered)
            .field("periodic", &self.periodic)
            .field("data", &self.data())
            .finish_non_exhaustive()
    }
}

pub(super) struct TaskRecord {
    pub(super) callback: Option<TaskCallback>,
    pub(super) timer: Option<TimerId>,
    pub(super) triggered: bool,
    pub(super) periodic: bool,
    data: [u8; MAX_DATA_SIZE_LIMIT],
    len: usize,
}

impl Default for TaskRecord {
    fn default() -> Self {
        Self {
            callback: None,
            timer: None,
            triggered: false,
            periodic: false,
            data: [0; MAX_DATA_SIZE_LIMIT],
            len: 0,
        }
    }
}

impl TaskRecord {
    /// Fill a freshly allocated record. `data` is already length-checked.
    pub(super) fn activate(&mut self, callback: TaskCallback, data: &[u8], periodic: bool) {
        self.callback = Some(callback);
        self.timer = None;
        self.triggered = false;
        self.periodic = periodic;
        self.data[..data.len()].copy_from_slice(data);
        self.len = data.len();
    }

    pub(super) fn clear(&mut self) {
        self.callback = None;
        self.timer = None;
        self.triggered = false;
        self.periodic = false;
        self.len = 0;
    }

    pub(super) fn job(&self, handle: TaskHandle) -> Option<Job> {
        Some(Job {
            handle,
            callback: self.callback.clone()?,
            data: self.data,
            len: self.len,
        })
    }

    pub(super) fn info(&self, handle: TaskHandle) -> Option<TaskInfo> {
        Some(TaskInfo {
            handle,
            callback: self.callback.clone()?,
            triggered: self.triggered,
            periodic: self.periodic,
            data: self.data,
            len: self.len,
        })
    }
}

/// A task selected for execution, copied out of the critical section.
pub(super) struct Job {
    pub(super) handle: TaskHandle,
    pub(super) callback: TaskCallback,
    data: [u8; MAX_DATA_SIZE_LIMIT],
    len: usize,
}

impl Job {
    pub(super) fn run(&self) {
        (self.callback)(&self.data[..self.len]);
    }
}
