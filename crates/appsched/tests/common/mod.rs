#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use appsched::polling::{EndDeviceNetwork, NodeType};
use appsched::{ManualTimer, SchedError, Scheduler, SchedulerConfig, TaskCallback};

pub fn scheduler_with(config: SchedulerConfig) -> (Scheduler, ManualTimer) {
    let timer = ManualTimer::new();
    let scheduler = Scheduler::new(config, Arc::new(timer.clone())).expect("scheduler");
    (scheduler, timer)
}

pub fn scheduler() -> (Scheduler, ManualTimer) {
    scheduler_with(SchedulerConfig::default())
}

/// Task callback that counts its invocations.
pub fn counting_task() -> (Arc<AtomicUsize>, TaskCallback) {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = count.clone();
    let callback: TaskCallback = Arc::new(move |_: &[u8]| {
        hits.fetch_add(1, Ordering::SeqCst);
    });
    (count, callback)
}

/// Task callback that records every payload it receives.
pub fn recording_task() -> (Arc<Mutex<Vec<Vec<u8>>>>, TaskCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: TaskCallback = Arc::new(move |data: &[u8]| {
        sink.lock().unwrap().push(data.to_vec());
    });
    (seen, callback)
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Network stub recording the recovery hooks the policy calls.
#[derive(Debug)]
pub struct FakeNetwork {
    pub node_type: NodeType,
    pub key_establishment: bool,
    pub handle_lost_parent: bool,
    pub fail_move: bool,
    pub lost_parent_calls: usize,
    pub move_calls: usize,
}

impl FakeNetwork {
    pub fn sleepy() -> Self {
        Self::with_node_type(NodeType::SleepyEndDevice)
    }

    pub fn with_node_type(node_type: NodeType) -> Self {
        Self {
            node_type,
            key_establishment: false,
            handle_lost_parent: false,
            fail_move: false,
            lost_parent_calls: 0,
            move_calls: 0,
        }
    }
}

impl EndDeviceNetwork for FakeNetwork {
    fn node_type(&self, _network: usize) -> NodeType {
        self.node_type
    }

    fn key_establishment_in_progress(&self, _network: usize) -> bool {
        self.key_establishment
    }

    fn lost_parent_connectivity(&mut self, _network: usize) -> bool {
        self.lost_parent_calls += 1;
        self.handle_lost_parent
    }

    fn start_move(&mut self, _network: usize) -> Result<(), SchedError> {
        self.move_calls += 1;
        if self.fail_move {
            return Err(SchedError::InvalidParameter("move refused".into()));
        }
        Ok(())
    }
}
