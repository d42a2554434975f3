//! Per-network poll state and the demand bits that drive it.

use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Reasons an application needs the device to poll at the short interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AppTasks(u32);

impl AppTasks {
    pub const NONE: Self = Self(0);
    pub const WAITING_FOR_DATA_ACK: Self = Self(0x0001);
    pub const LAST_POLL_GOT_DATA: Self = Self(0x0002);
    pub const WAITING_FOR_SERVICE_DISCOVERY: Self = Self(0x0004);
    pub const WAITING_FOR_ZDO_RESPONSE: Self = Self(0x0008);
    pub const WAITING_FOR_ZCL_RESPONSE: Self = Self(0x0010);
    pub const WAITING_FOR_REGISTRATION: Self = Self(0x0020);
    pub const WAITING_FOR_PARTNER_LINK_KEY: Self = Self(0x0040);
    pub const FORCE_SHORT_POLL: Self = Self(0x0080);
    pub const FRAGMENTING: Self = Self(0x0100);
    /// Set while polls go unanswered; honoured for every node type.
    pub const SHORT_POLL_FOR_PARENT_CONNECTIVITY: Self = Self(0x0200);

    /// Bits cleared automatically once the wake timeout elapses.
    pub const DEFAULT_WAKE_TIMEOUT: Self =
        Self(Self::WAITING_FOR_ZDO_RESPONSE.0 | Self::WAITING_FOR_ZCL_RESPONSE.0);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for AppTasks {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AppTasks {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for AppTasks {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for AppTasks {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// Requested polling mode, independent of outstanding demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollControl {
    #[default]
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Unknown,
    Coordinator,
    Router,
    EndDevice,
    SleepyEndDevice,
}

impl NodeType {
    /// End devices poll their parent; routers and coordinators do not.
    #[must_use]
    pub fn polls_parent(self) -> bool {
        matches!(self, Self::EndDevice | Self::SleepyEndDevice)
    }
}

/// Poll cadence policy state for one logical network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollingState {
    pub current_app_tasks: AppTasks,
    pub wake_timeout_bitmask: AppTasks,
    pub long_poll_interval_ms: u32,
    pub short_poll_interval_ms: u32,
    pub long_poll_interval_set: bool,
    pub short_poll_interval_set: bool,
    pub wake_timeout_ms: u32,
    pub last_app_task_schedule_time: u64,
    pub poll_control: PollControl,
    pub num_polls_failing: u32,
    /// Lost-parent handling already ran for the current failure streak.
    pub lost_parent_reported: bool,
    /// Interval last handed to the poll driver, zero if none.
    pub poll_interval_ms: u32,
    /// Completion reporting flag last handed to the poll driver.
    pub completion_reporting: bool,
}

impl PollingState {
    pub(crate) fn clear_failures(&mut self) {
        self.num_polls_failing = 0;
        self.lost_parent_reported = false;
    }
}
