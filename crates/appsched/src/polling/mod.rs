//! End-device poll interval policy.
//!
//! Producers across the stack raise and clear [`AppTasks`] bits to say they
//! need fast polling. The policy turns the outstanding demand into a short or
//! long poll interval per network, reacts to poll results, and asks the
//! network layer to find a new parent after repeated missing acks.

mod driver;
mod state;
mod status;

use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::error::SchedError;
use crate::timer::Clock;

pub use driver::{HostPoller, PollDriver, PollRequest, ScheduledPoller, POLL_TASK_DATA_LEN};
pub use state::{AppTasks, NodeType, PollControl, PollingState};
pub use status::PollStatus;

/// Quarter-second unit used by poll control intervals.
const MS_PER_QS: u32 = 250;

/// Network layer queries and recovery hooks used by the policy.
pub trait EndDeviceNetwork {
    fn node_type(&self, network: usize) -> NodeType;

    /// Key establishment can leave the parent silent for a long time; missed
    /// acks during it are not counted.
    fn key_establishment_in_progress(&self, _network: usize) -> bool {
        false
    }

    /// Called once the failure limit is reached. Return true if the
    /// application handled the loss itself and no network move is wanted.
    fn lost_parent_connectivity(&mut self, _network: usize) -> bool {
        false
    }

    /// Start looking for a new parent (rejoin).
    fn start_move(&mut self, network: usize) -> Result<(), SchedError>;
}

pub struct PollPolicy<N, C> {
    network: N,
    clock: C,
    config: PollConfig,
    states: Box<[PollingState]>,
    long_poll_inhibited: bool,
    completion_reporting: bool,
}

impl<N: EndDeviceNetwork, C: Clock> PollPolicy<N, C> {
    pub fn new(config: PollConfig, network: N, clock: C) -> Result<Self, SchedError> {
        config.validate()?;
        let states = vec![PollingState::default(); config.networks].into_boxed_slice();
        let mut policy = Self {
            network,
            clock,
            config,
            states,
            long_poll_inhibited: false,
            completion_reporting: false,
        };
        policy.reinit_defaults(config)?;
        Ok(policy)
    }

    /// Apply configured defaults. Intervals set explicitly through the
    /// setters survive.
    pub fn reinit_defaults(&mut self, config: PollConfig) -> Result<(), SchedError> {
        config.validate()?;
        if config.networks != self.states.len() {
            return Err(SchedError::InvalidConfig(
                "polling.networks cannot change after startup".into(),
            ));
        }
        self.config = config;
        for state in self.states.iter_mut() {
            if !state.long_poll_interval_set {
                state.long_poll_interval_ms = config.long_poll_interval_ms;
            }
            if !state.short_poll_interval_set {
                state.short_poll_interval_ms = config.short_poll_interval_ms;
            }
            state.wake_timeout_ms = config.wake_timeout_ms;
            state.wake_timeout_bitmask = config.wake_timeout_bitmask;
        }
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn network_mut(&mut self) -> &mut N {
        &mut self.network
    }

    pub fn state(&self, network: usize) -> Result<&PollingState, SchedError> {
        self.states
            .get(network)
            .ok_or_else(|| SchedError::invalid_parameter(format!("unknown network {network}")))
    }

    fn state_mut(&mut self, network: usize) -> Result<&mut PollingState, SchedError> {
        self.states
            .get_mut(network)
            .ok_or_else(|| SchedError::invalid_parameter(format!("unknown network {network}")))
    }

    /// Raise demand bits. Ignored for node types that do not poll, except
    /// for the parent connectivity bit.
    pub fn add_task(&mut self, network: usize, tasks: AppTasks) -> Result<(), SchedError> {
        self.state(network)?;
        let polls_parent = self.network.node_type(network).polls_parent();
        let now = self.clock.now_ms();
        let state = self.state_mut(network)?;
        let accepted = if polls_parent {
            tasks
        } else {
            tasks & AppTasks::SHORT_POLL_FOR_PARENT_CONNECTIVITY
        };
        if accepted.is_empty() {
            return Ok(());
        }
        state.current_app_tasks.insert(accepted);
        if accepted.intersects(state.wake_timeout_bitmask) {
            state.last_app_task_schedule_time = now;
        }
        debug!(network, tasks = accepted.bits(), "app tasks added");
        Ok(())
    }

    pub fn remove_task(&mut self, network: usize, tasks: AppTasks) -> Result<(), SchedError> {
        self.state_mut(network)?.current_app_tasks.remove(tasks);
        Ok(())
    }

    /// Effective poll interval given the outstanding demand.
    ///
    /// Wake-timeout bits that have been pending longer than the wake
    /// timeout are dropped first.
    pub fn current_poll_interval_ms(&mut self, network: usize) -> Result<u32, SchedError> {
        self.state(network)?;
        let polls_parent = self.network.node_type(network).polls_parent();
        let now = self.clock.now_ms();
        let long_poll_inhibited = self.long_poll_inhibited;
        let state = self.state_mut(network)?;
        let elapsed = now.saturating_sub(state.last_app_task_schedule_time);
        if elapsed > u64::from(state.wake_timeout_ms)
            && state.current_app_tasks.intersects(state.wake_timeout_bitmask)
        {
            let expired = state.wake_timeout_bitmask;
            state.current_app_tasks.remove(expired);
            debug!(network, tasks = expired.bits(), "wake timeout cleared app tasks");
        }
        let short = polls_parent
            && (long_poll_inhibited
                || !state.current_app_tasks.is_empty()
                || state.poll_control == PollControl::Short);
        Ok(if short {
            state.short_poll_interval_ms
        } else {
            state.long_poll_interval_ms
        })
    }

    pub fn set_long_poll_interval_ms(
        &mut self,
        network: usize,
        interval_ms: u32,
    ) -> Result<(), SchedError> {
        if interval_ms == 0 {
            return Err(SchedError::invalid_parameter("poll interval must be nonzero"));
        }
        let state = self.state_mut(network)?;
        state.long_poll_interval_ms = interval_ms;
        state.long_poll_interval_set = true;
        Ok(())
    }

    pub fn set_short_poll_interval_ms(
        &mut self,
        network: usize,
        interval_ms: u32,
    ) -> Result<(), SchedError> {
        if interval_ms == 0 {
            return Err(SchedError::invalid_parameter("poll interval must be nonzero"));
        }
        let state = self.state_mut(network)?;
        state.short_poll_interval_ms = interval_ms;
        state.short_poll_interval_set = true;
        Ok(())
    }

    pub fn long_poll_interval_qs(&self, network: usize) -> Result<u32, SchedError> {
        Ok(self.state(network)?.long_poll_interval_ms / MS_PER_QS)
    }

    pub fn set_long_poll_interval_qs(
        &mut self,
        network: usize,
        interval_qs: u32,
    ) -> Result<(), SchedError> {
        self.set_long_poll_interval_ms(network, interval_qs.saturating_mul(MS_PER_QS))
    }

    pub fn set_wake_timeout_ms(
        &mut self,
        network: usize,
        timeout_ms: u32,
    ) -> Result<(), SchedError> {
        self.state_mut(network)?.wake_timeout_ms = timeout_ms;
        Ok(())
    }

    pub fn set_wake_timeout_bitmask(
        &mut self,
        network: usize,
        bitmask: AppTasks,
    ) -> Result<(), SchedError> {
        let now = self.clock.now_ms();
        let state = self.state_mut(network)?;
        let newly_covered = bitmask & !state.wake_timeout_bitmask;
        state.wake_timeout_bitmask = bitmask;
        // pending bits that just became wake bits start their timeout now
        if state.current_app_tasks.intersects(newly_covered) {
            state.last_app_task_schedule_time = now;
        }
        Ok(())
    }

    pub fn set_poll_control(
        &mut self,
        network: usize,
        control: PollControl,
    ) -> Result<(), SchedError> {
        self.state_mut(network)?.poll_control = control;
        Ok(())
    }

    /// Force short polling on every network regardless of demand.
    pub fn set_long_poll_inhibited(&mut self, inhibited: bool) {
        self.long_poll_inhibited = inhibited;
    }

    /// Whether the poll driver should report each completed poll.
    pub fn set_completion_reporting(&mut self, enabled: bool) {
        self.completion_reporting = enabled;
    }

    /// React to the result of one data poll.
    ///
    /// Missing acks are counted. Once the count is at or above
    /// `failure_limit`, [`EndDeviceNetwork::lost_parent_connectivity`] is
    /// called and, unless that handled it, a network move starts. This
    /// happens once per failure streak; a success or no-data result ends
    /// the streak.
    pub fn on_poll_complete(
        &mut self,
        network: usize,
        status: PollStatus,
        failure_limit: u8,
    ) -> Result<(), SchedError> {
        self.state(network)?;
        match status {
            PollStatus::Success => {
                self.remove_task(network, AppTasks::SHORT_POLL_FOR_PARENT_CONNECTIVITY)?;
                self.add_task(network, AppTasks::LAST_POLL_GOT_DATA)?;
                self.state_mut(network)?.clear_failures();
            }
            PollStatus::NoData => {
                self.remove_task(
                    network,
                    AppTasks::SHORT_POLL_FOR_PARENT_CONNECTIVITY | AppTasks::LAST_POLL_GOT_DATA,
                )?;
                self.state_mut(network)?.clear_failures();
            }
            status if status.is_channel_busy() => {
                debug!(network, ?status, "poll not sent, channel busy");
                self.remove_task(network, AppTasks::LAST_POLL_GOT_DATA)?;
            }
            PollStatus::NoAckReceived => {
                if self.network.key_establishment_in_progress(network) {
                    debug!(network, "missing poll ack ignored during key establishment");
                    return Ok(());
                }
                let (failing, lost) = {
                    let state = self.state_mut(network)?;
                    state.num_polls_failing = state.num_polls_failing.saturating_add(1);
                    let lost = state.num_polls_failing >= u32::from(failure_limit)
                        && !state.lost_parent_reported;
                    if lost {
                        state.lost_parent_reported = true;
                    }
                    (state.num_polls_failing, lost)
                };
                self.remove_task(network, AppTasks::LAST_POLL_GOT_DATA)?;
                self.add_task(network, AppTasks::SHORT_POLL_FOR_PARENT_CONNECTIVITY)?;
                warn!(network, failing, "poll not acknowledged by parent");
                if lost {
                    self.parent_lost(network);
                }
            }
            other => debug!(network, status = ?other, "poll completed"),
        }
        Ok(())
    }

    fn parent_lost(&mut self, network: usize) {
        warn!(network, "lost connectivity to parent");
        if self.network.lost_parent_connectivity(network) {
            return;
        }
        if let Err(err) = self.network.start_move(network) {
            warn!(network, "network move failed to start: {err}");
        }
    }

    /// Forget the schedule handed to the co-processor after it reset, so
    /// the next tick re-issues it.
    pub fn reset_on_ncp_restart(&mut self) {
        for state in self.states.iter_mut() {
            state.poll_interval_ms = 0;
            state.clear_failures();
        }
        info!("poll state reset after co-processor restart");
    }

    /// Reconcile the poll schedule with the current demand. Returns true if
    /// the driver was asked to reschedule.
    pub fn tick(
        &mut self,
        network: usize,
        driver: &mut dyn PollDriver,
    ) -> Result<bool, SchedError> {
        let interval_ms = self.current_poll_interval_ms(network)?;
        let reporting = self.completion_reporting;
        let state = self.state(network)?;
        if state.poll_interval_ms == interval_ms && state.completion_reporting == reporting {
            return Ok(false);
        }
        driver.schedule_poll(network, interval_ms, reporting)?;
        let state = self.state_mut(network)?;
        state.poll_interval_ms = interval_ms;
        state.completion_reporting = reporting;
        info!(network, interval_ms, reporting, "poll interval rescheduled");
        Ok(true)
    }
}

impl<N, C> std::fmt::Debug for PollPolicy<N, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollPolicy")
            .field("config", &self.config)
            .field("states", &self.states)
            .field("long_poll_inhibited", &self.long_poll_inhibited)
            .field("completion_reporting", &self.completion_reporting)
            .finish_non_exhaustive()
    }
}
