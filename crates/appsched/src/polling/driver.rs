//! Adapters that carry out the poll schedule chosen by the policy.

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::error::SchedError;
use crate::scheduler::{Scheduler, TaskCallback, TaskHandle};

/// Schedules the repeating MAC data poll for one network.
pub trait PollDriver {
    /// Replace any existing poll schedule for `network` with one that polls
    /// every `interval_ms`.
    fn schedule_poll(
        &mut self,
        network: usize,
        interval_ms: u32,
        report_completion: bool,
    ) -> Result<(), SchedError>;
}

/// Payload handed to the poll task scheduled by [`ScheduledPoller`]:
/// `[network, report_completion]`.
pub const POLL_TASK_DATA_LEN: usize = 2;

/// SoC adapter: polls run as periodic tasks on the cooperative scheduler.
pub struct ScheduledPoller {
    scheduler: Scheduler,
    poll: TaskCallback,
    tasks: Vec<Option<TaskHandle>>,
}

impl ScheduledPoller {
    /// `poll` issues one data request; it receives `[network, report]`.
    #[must_use]
    pub fn new(scheduler: Scheduler, poll: TaskCallback) -> Self {
        Self {
            scheduler,
            poll,
            tasks: Vec::new(),
        }
    }

    /// Handle of the periodic poll task for `network`, if scheduled.
    #[must_use]
    pub fn task(&self, network: usize) -> Option<TaskHandle> {
        self.tasks.get(network).copied().flatten()
    }
}

impl PollDriver for ScheduledPoller {
    fn schedule_poll(
        &mut self,
        network: usize,
        interval_ms: u32,
        report_completion: bool,
    ) -> Result<(), SchedError> {
        let tag = u8::try_from(network)
            .map_err(|_| SchedError::invalid_parameter("network index exceeds 255"))?;
        if self.tasks.len() <= network {
            self.tasks.resize(network + 1, None);
        }
        if let Some(previous) = self.tasks[network].take() {
            // already gone if someone else removed it
            let _ = self.scheduler.remove(previous);
        }
        let data = [tag, u8::from(report_completion)];
        let handle = self
            .scheduler
            .add_periodic(self.poll.clone(), interval_ms, &data)?;
        self.tasks[network] = Some(handle);
        debug!(network, interval_ms, slot = handle.slot(), "poll task scheduled");
        Ok(())
    }
}

/// Poll schedule request forwarded to a network co-processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub network: usize,
    pub interval_ms: u32,
    pub report_completion: bool,
}

/// Host adapter: the co-processor runs the polls, the host only tells it
/// the interval.
#[derive(Debug, Clone)]
pub struct HostPoller {
    link: Sender<PollRequest>,
}

impl HostPoller {
    #[must_use]
    pub fn new(link: Sender<PollRequest>) -> Self {
        Self { link }
    }

    /// Poller plus the receiving end of its link.
    #[must_use]
    pub fn channel() -> (Self, Receiver<PollRequest>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }
}

impl PollDriver for HostPoller {
    fn schedule_poll(
        &mut self,
        network: usize,
        interval_ms: u32,
        report_completion: bool,
    ) -> Result<(), SchedError> {
        self.link
            .send(PollRequest {
                network,
                interval_ms,
                report_completion,
            })
            .map_err(|_| SchedError::LinkClosed)
    }
}
