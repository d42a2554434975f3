//! `appsched` - cooperative application task scheduler and end-device poll
//! interval policy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Scheduler and poll policy configuration.
pub mod config;
/// Scoped critical sections for shared state.
pub mod critical;
/// Error types.
pub mod error;
/// Poll interval policy for sleepy end devices.
#[allow(missing_docs)]
pub mod polling;
/// Fixed-capacity slot allocator.
#[allow(missing_docs)]
pub mod pool;
/// Cooperative task scheduler.
#[allow(missing_docs)]
pub mod scheduler;
/// Clocks and timer services.
#[allow(missing_docs)]
pub mod timer;

pub use config::{AppConfig, PollConfig, SchedulerConfig};
pub use error::SchedError;
pub use polling::{AppTasks, PollPolicy, PollStatus};
pub use scheduler::{IsrExitAction, Scheduler, TaskCallback, TaskFilter, TaskHandle, TaskInfo};
pub use timer::{Clock, ManualTimer, StdClock, ThreadTimer, TimerService};
