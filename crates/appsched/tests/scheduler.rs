mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use appsched::timer::{TimerCallback, TimerId};
use appsched::{
    IsrExitAction, ManualTimer, SchedError, Scheduler, SchedulerConfig, TaskCallback, TaskFilter,
    ThreadTimer, TimerService,
};
use common::{count, counting_task, recording_task, scheduler, scheduler_with};
use expect_test::expect;

fn config_with_capacity(max_queue_size: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_queue_size,
        ..SchedulerConfig::default()
    }
}

#[test]
fn add_delayed_grows_queue_by_one() {
    let (scheduler, _timer) = scheduler();
    let (_, task) = counting_task();
    for expected in 1..=3 {
        let handle = scheduler.add_delayed(task.clone(), 100, &[]).unwrap();
        assert!(handle.is_some());
        assert_eq!(scheduler.task_count(TaskFilter::All), expected);
    }
}

#[test]
fn full_queue_rejects_every_add_variant() {
    let (scheduler, _timer) = scheduler_with(config_with_capacity(2));
    let (_, task) = counting_task();
    scheduler.add_delayed(task.clone(), 10, &[]).unwrap();
    scheduler.add_periodic(task.clone(), 10, &[]).unwrap();

    assert_eq!(
        scheduler.add(task.clone(), &[]),
        Err(SchedError::ResourceExhausted)
    );
    assert_eq!(
        scheduler.add_delayed(task.clone(), 5, &[]),
        Err(SchedError::ResourceExhausted)
    );
    assert_eq!(
        scheduler.add_periodic(task, 5, &[]),
        Err(SchedError::ResourceExhausted)
    );
    assert_eq!(scheduler.task_count(TaskFilter::All), 2);
}

#[test]
fn remove_twice_reports_invalid_parameter() {
    let (scheduler, _timer) = scheduler();
    let (_, task) = counting_task();
    let handle = scheduler.add_periodic(task, 50, &[]).unwrap();
    assert_eq!(scheduler.remove(handle), Ok(()));
    assert!(matches!(
        scheduler.remove(handle),
        Err(SchedError::InvalidParameter(_))
    ));
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
}

#[test]
fn periodic_task_survives_execution() {
    let (scheduler, timer) = scheduler();
    let (hits, task) = counting_task();
    scheduler.add_periodic(task, 10, &[]).unwrap();
    for cycle in 1..=20 {
        timer.advance(10);
        assert_eq!(scheduler.task_count(TaskFilter::Triggered), 1);
        assert_eq!(scheduler.step(), 1);
        assert_eq!(scheduler.task_count(TaskFilter::All), 1);
        assert_eq!(count(&hits), cycle);
    }
}

#[test]
fn one_shot_task_is_freed_after_running() {
    let (scheduler, timer) = scheduler();
    let (hits, task) = counting_task();
    let handle = scheduler.add_delayed(task, 25, &[]).unwrap().unwrap();

    timer.advance(24);
    assert_eq!(scheduler.step(), 0);
    timer.advance(1);
    assert_eq!(scheduler.step(), 1);

    assert_eq!(count(&hits), 1);
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
    assert!(matches!(
        scheduler.remove(handle),
        Err(SchedError::InvalidParameter(_))
    ));
    timer.advance(100);
    assert_eq!(scheduler.step(), 0);
}

#[test]
fn zero_delay_runs_on_next_step_without_time_passing() {
    let (scheduler, _timer) = scheduler();
    let (hits, task) = counting_task();
    assert_eq!(scheduler.add_delayed(task, 0, &[]).unwrap(), None);
    assert_eq!(scheduler.task_count(TaskFilter::Triggered), 1);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 1);
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
}

#[test]
fn pool_of_five_periodic_tasks() {
    let (scheduler, _timer) = scheduler_with(config_with_capacity(5));
    let (_, task) = counting_task();
    let handles: Vec<_> = [10, 20, 30, 40, 50]
        .into_iter()
        .map(|period| scheduler.add_periodic(task.clone(), period, &[]).unwrap())
        .collect();

    assert_eq!(
        scheduler.add(task.clone(), &[]),
        Err(SchedError::ResourceExhausted)
    );
    assert_eq!(
        scheduler.add_periodic(task.clone(), 60, &[]),
        Err(SchedError::ResourceExhausted)
    );

    scheduler.remove(handles[2]).unwrap();
    let replacement = scheduler.add_periodic(task, 60, &[]).unwrap();
    assert_eq!(replacement.slot(), handles[2].slot());
    assert_ne!(replacement, handles[2]);
    assert_eq!(scheduler.task_count(TaskFilter::All), 5);
}

#[test]
fn payload_is_copied_at_registration() {
    let (scheduler, _timer) = scheduler();
    let (seen, task) = recording_task();
    let mut buffer = vec![1, 2, 3];
    scheduler.add(task, &buffer).unwrap();
    buffer.fill(0);
    drop(buffer);

    scheduler.step();
    assert_eq!(*seen.lock().unwrap(), vec![vec![1, 2, 3]]);
}

#[test]
fn oversized_payload_leaves_queue_untouched() {
    let (scheduler, _timer) = scheduler();
    let (_, task) = counting_task();
    let payload = [0_u8; 17];
    assert!(matches!(
        scheduler.add(task, &payload),
        Err(SchedError::InvalidParameter(_))
    ));
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
}

#[test]
fn zero_period_rejected() {
    let (scheduler, timer) = scheduler();
    let (_, task) = counting_task();
    assert!(matches!(
        scheduler.add_periodic(task, 0, &[]),
        Err(SchedError::InvalidParameter(_))
    ));
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
    assert_eq!(timer.armed_count(), 0);
}

#[test]
fn paused_scheduler_runs_nothing() {
    let (scheduler, _timer) = scheduler();
    let (hits, task) = counting_task();
    scheduler.add(task, &[]).unwrap();

    scheduler.pause();
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.step(), 0);
    assert_eq!(count(&hits), 0);

    scheduler.resume();
    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 1);
}

#[test]
fn disabled_on_startup_until_resumed() {
    let (scheduler, _timer) = scheduler_with(SchedulerConfig {
        enable_on_startup: false,
        ..SchedulerConfig::default()
    });
    let (hits, task) = counting_task();
    scheduler.add(task, &[]).unwrap();
    assert_eq!(scheduler.step(), 0);
    scheduler.resume();
    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 1);
}

#[test]
fn default_mode_runs_one_task_per_step_in_fifo_order() {
    let (scheduler, _timer) = scheduler();
    let (seen, task) = recording_task();
    for tag in 0..3_u8 {
        scheduler.add(task.clone(), &[tag]).unwrap();
    }
    assert_eq!(scheduler.step(), 1);
    assert_eq!(scheduler.task_count(TaskFilter::Triggered), 2);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(scheduler.step(), 0);
    assert_eq!(*seen.lock().unwrap(), vec![vec![0], vec![1], vec![2]]);
}

#[test]
fn eager_mode_drains_tasks_added_by_callbacks() {
    let (scheduler, _timer) = scheduler_with(SchedulerConfig {
        eager_mode: true,
        ..SchedulerConfig::default()
    });
    let (hits, follow_up) = counting_task();
    let chained = scheduler.clone();
    let spawner: TaskCallback = Arc::new(move |_: &[u8]| {
        chained.add(follow_up.clone(), &[]).unwrap();
    });
    scheduler.add(spawner, &[]).unwrap();

    assert_eq!(scheduler.step(), 2);
    assert_eq!(count(&hits), 1);
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
}

#[test]
fn task_added_by_callback_waits_for_next_step_in_default_mode() {
    let (scheduler, _timer) = scheduler();
    let (hits, follow_up) = counting_task();
    let chained = scheduler.clone();
    let spawner: TaskCallback = Arc::new(move |_: &[u8]| {
        chained.add(follow_up.clone(), &[]).unwrap();
    });
    scheduler.add(spawner, &[]).unwrap();

    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 0);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 1);
}

#[test]
fn periodic_task_can_remove_itself() {
    let (scheduler, timer) = scheduler();
    let handle_slot = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));
    let task: TaskCallback = {
        let scheduler = scheduler.clone();
        let handle_slot = handle_slot.clone();
        let runs = runs.clone();
        Arc::new(move |_: &[u8]| {
            if runs.fetch_add(1, Ordering::SeqCst) == 1 {
                if let Some(handle) = handle_slot.lock().unwrap().take() {
                    scheduler.remove(handle).unwrap();
                }
            }
        })
    };
    let handle = scheduler.add_periodic(task, 10, &[]).unwrap();
    *handle_slot.lock().unwrap() = Some(handle);

    timer.advance(10);
    scheduler.step();
    timer.advance(10);
    scheduler.step();
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
    assert_eq!(timer.armed_count(), 0);
    timer.advance(50);
    assert_eq!(scheduler.step(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn removed_task_timer_is_stopped() {
    let (scheduler, timer) = scheduler();
    let (hits, task) = counting_task();
    let handle = scheduler.add_delayed(task, 10, &[]).unwrap().unwrap();
    assert_eq!(timer.armed_count(), 1);
    scheduler.remove(handle).unwrap();
    assert_eq!(timer.armed_count(), 0);
    timer.advance(20);
    assert_eq!(scheduler.step(), 0);
    assert_eq!(count(&hits), 0);
}

#[test]
fn sleep_queries_follow_triggered_tasks() {
    let (scheduler, timer) = scheduler();
    let (_, task) = counting_task();
    scheduler.add_delayed(task, 10, &[]).unwrap();
    assert!(scheduler.is_ok_to_sleep());
    assert_eq!(scheduler.sleep_on_isr_exit(), IsrExitAction::Ignore);

    timer.advance(10);
    assert!(!scheduler.is_ok_to_sleep());
    assert_eq!(scheduler.sleep_on_isr_exit(), IsrExitAction::Wakeup);

    scheduler.step();
    assert!(scheduler.is_ok_to_sleep());
}

#[test]
fn task_count_filters() {
    let (scheduler, timer) = scheduler();
    let (_, task) = counting_task();
    scheduler.add(task.clone(), &[]).unwrap();
    scheduler.add_delayed(task.clone(), 10, &[]).unwrap();
    scheduler.add_periodic(task, 30, &[]).unwrap();
    timer.advance(10);
    assert_eq!(scheduler.task_count(TaskFilter::All), 3);
    assert_eq!(scheduler.task_count(TaskFilter::Triggered), 2);
    assert_eq!(scheduler.task_count(TaskFilter::Untriggered), 1);
}

#[test]
fn foreach_task_sums_visitor_results() {
    let (scheduler, _timer) = scheduler();
    let (_, task) = counting_task();
    scheduler.add(task.clone(), &[1, 2, 3]).unwrap();
    scheduler.add_periodic(task, 10, &[4]).unwrap();

    let mut periodic = 0;
    let bytes = scheduler.foreach_task(|info| {
        if info.periodic {
            periodic += 1;
        }
        u32::try_from(info.data().len()).unwrap()
    });
    assert_eq!(bytes, 4);
    assert_eq!(periodic, 1);
}

#[test]
fn dump_tasks_lists_queue() {
    let (scheduler, _timer) = scheduler();
    let (_, task) = counting_task();
    scheduler.add_periodic(task.clone(), 10, &[1, 2]).unwrap();
    scheduler.add(task.clone(), &[0xff]).unwrap();
    scheduler.add_delayed(task, 40, &[]).unwrap();

    expect![[r#"
        slot state       kind     data
        0    waiting     periodic [01, 02]
        1    triggered   one-shot [ff]
        2    waiting     one-shot []
    "#]]
    .assert_eq(&scheduler.dump_tasks());
}

/// Manual timer that records every `stop` it receives.
#[derive(Clone, Default)]
struct StopTracking {
    inner: ManualTimer,
    stopped: Arc<Mutex<Vec<TimerId>>>,
}

impl TimerService for StopTracking {
    fn start_one_shot(
        &self,
        duration_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        self.inner.start_one_shot(duration_ms, callback)
    }

    fn start_repeating(
        &self,
        period_ms: u32,
        callback: TimerCallback,
    ) -> Result<TimerId, SchedError> {
        self.inner.start_repeating(period_ms, callback)
    }

    fn stop(&self, id: TimerId) {
        self.stopped.lock().unwrap().push(id);
        self.inner.stop(id);
    }
}

#[test]
fn executed_one_shot_releases_its_timer() {
    let timers = StopTracking::default();
    let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(timers.clone())).unwrap();
    let (hits, task) = counting_task();
    scheduler.add_delayed(task.clone(), 10, &[]).unwrap();
    scheduler.add_periodic(task, 10, &[]).unwrap();

    timers.inner.advance(10);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(timers.stopped.lock().unwrap().len(), 1);
    assert_eq!(scheduler.step(), 1);
    assert_eq!(count(&hits), 2);
    assert_eq!(timers.stopped.lock().unwrap().len(), 1);
    assert_eq!(timers.inner.armed_count(), 1);
}

#[test]
fn thread_timer_triggers_tasks_concurrently() {
    let timer = Arc::new(ThreadTimer::spawn().unwrap());
    let scheduler = Scheduler::new(SchedulerConfig::default(), timer).unwrap();
    let (hits, task) = counting_task();
    let handle = scheduler.add_periodic(task, 1, &[]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while count(&hits) < 5 && Instant::now() < deadline {
        scheduler.step();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(count(&hits) >= 5);
    scheduler.remove(handle).unwrap();
    assert_eq!(scheduler.task_count(TaskFilter::All), 0);
}
