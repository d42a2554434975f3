//! Drive the scheduler and poll policy against a simulated parent.
//!
//! Time is simulated: a [`ManualTimer`] advances in fixed ticks, polls run as
//! periodic scheduler tasks, and the simulated parent answers each poll
//! according to the command line script.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use appsched::polling::{EndDeviceNetwork, NodeType, ScheduledPoller};
use appsched::{
    AppConfig, AppTasks, ManualTimer, PollPolicy, PollStatus, SchedError, Scheduler, TaskCallback,
};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "appsched-sim",
    version,
    about = "Simulate a sleepy end device polling its parent"
)]
struct Args {
    /// TOML file with `[scheduler]` and `[polling]` tables.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Simulated run time in milliseconds.
    #[arg(long, default_value = "30000")]
    duration_ms: u64,
    /// Simulated clock step in milliseconds.
    #[arg(long, default_value = "50")]
    tick_ms: u64,
    /// Number of polls, starting with the first, the parent leaves unacknowledged.
    #[arg(long, default_value = "0")]
    failing_polls: u32,
    /// Every n-th acknowledged poll carries data (0 = never).
    #[arg(long, default_value = "4")]
    data_every: u32,
    /// Raise a ZCL response wait at this time to exercise the wake timeout.
    #[arg(long, value_name = "MS")]
    zcl_request_at: Option<u64>,
    /// Report each completed poll.
    #[arg(long)]
    report_completion: bool,
    /// Show debug logging.
    #[arg(long, short)]
    verbose: bool,
}

/// Work produced by scheduler tasks for the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimEvent {
    Poll { network: usize },
    ZclRequest,
}

#[derive(Debug, Default)]
struct SimNetwork {
    moves: usize,
}

impl EndDeviceNetwork for SimNetwork {
    fn node_type(&self, _network: usize) -> NodeType {
        NodeType::SleepyEndDevice
    }

    fn start_move(&mut self, network: usize) -> Result<(), SchedError> {
        self.moves += 1;
        info!(network, moves = self.moves, "searching for a new parent");
        Ok(())
    }
}

/// Scripted parent answering polls.
#[derive(Debug)]
struct SimParent {
    failing_polls: u32,
    data_every: u32,
    polls: u32,
    acked: u32,
}

impl SimParent {
    fn answer(&mut self) -> PollStatus {
        self.polls += 1;
        if self.polls <= self.failing_polls {
            return PollStatus::NoAckReceived;
        }
        self.acked += 1;
        if self.data_every != 0 && self.acked % self.data_every == 0 {
            PollStatus::Success
        } else {
            PollStatus::NoData
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => {
            AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => AppConfig::default(),
    };
    run(&args, config)
}

fn event_task(
    events: &Sender<SimEvent>,
    event: impl Fn(&[u8]) -> SimEvent + Send + Sync + 'static,
) -> TaskCallback {
    let events = events.clone();
    Arc::new(move |data: &[u8]| {
        // receiver outlives the scheduler
        let _ = events.send(event(data));
    })
}

fn run(args: &Args, config: AppConfig) -> anyhow::Result<()> {
    anyhow::ensure!(args.tick_ms > 0, "--tick-ms must be nonzero");
    info!(?config, "starting simulation");

    let timer = ManualTimer::new();
    let scheduler = Scheduler::new(config.scheduler, Arc::new(timer.clone()))
        .context("creating scheduler")?;
    let (events, inbox): (Sender<SimEvent>, Receiver<SimEvent>) = crossbeam_channel::unbounded();

    let poll = event_task(&events, |data| SimEvent::Poll {
        network: data.first().copied().map_or(0, usize::from),
    });
    let mut poller = ScheduledPoller::new(scheduler.clone(), poll);
    let mut policy = PollPolicy::new(config.polling, SimNetwork::default(), timer.clone())
        .context("creating poll policy")?;
    policy.set_completion_reporting(args.report_completion);

    if let Some(at_ms) = args.zcl_request_at {
        let delay = u32::try_from(at_ms).context("--zcl-request-at out of range")?;
        scheduler
            .add_delayed(event_task(&events, |_| SimEvent::ZclRequest), delay, &[])
            .context("queueing ZCL request")?;
    }

    let mut parent = SimParent {
        failing_polls: args.failing_polls,
        data_every: args.data_every,
        polls: 0,
        acked: 0,
    };
    let networks = config.polling.networks;
    let failure_limit = config.polling.failure_limit;
    let mut reschedules = 0_usize;

    for network in 0..networks {
        if policy.tick(network, &mut poller)? {
            reschedules += 1;
        }
    }

    let mut elapsed = 0;
    while elapsed < args.duration_ms {
        timer.advance(args.tick_ms);
        elapsed += args.tick_ms;
        while scheduler.step() > 0 {}

        for event in inbox.try_iter() {
            match event {
                SimEvent::Poll { network } => {
                    let status = parent.answer();
                    debug!(network, ?status, at_ms = elapsed, "poll answered");
                    policy.on_poll_complete(network, status, failure_limit)?;
                }
                SimEvent::ZclRequest => {
                    info!(at_ms = elapsed, "waiting for ZCL response");
                    policy.add_task(0, AppTasks::WAITING_FOR_ZCL_RESPONSE)?;
                }
            }
        }

        for network in 0..networks {
            if policy.tick(network, &mut poller)? {
                reschedules += 1;
            }
        }
    }

    let moves = policy.network_mut().moves;
    if moves > 0 {
        warn!(moves, "parent connectivity was lost during the run");
    }
    println!(
        "polls: {} acked: {} reschedules: {reschedules} moves: {moves}",
        parent.polls, parent.acked
    );
    print!("{}", scheduler.dump_tasks());
    Ok(())
}
