//! Worker lifecycle (spec §4.5, C5): one thread per active task, looping
//! pause/collect/sleep until killed.

use std::sync::Arc;
use std::time::Duration;

use crate::collector::Collector;
use crate::control::TaskControl;
use crate::error::CollectOutcome;
use crate::registry::Registry;
use crate::stats::Stats;
use crate::task::{Report, TaskDescriptor};

/// Runs on its own OS thread for the lifetime of one task. Returns once
/// `control.kill()` is observed or the collector reports a terminal outcome.
///
/// The control mutex is only ever held across the pause-wait and the
/// sleep — never across the [`Collector::collect_once`] call, so a slow
/// collection (e.g. the 1-second CPU sample) can't block a PAUSE/DELETE
/// from taking effect on another task.
pub fn run(
    descriptor: TaskDescriptor,
    control: Arc<TaskControl>,
    registry: Arc<Registry>,
    reports: Arc<crate::container::FrozenQueue<Report>>,
    stats: Arc<Stats>,
    collector: Arc<dyn Collector>,
) {
    stats.increment(descriptor.task_type);

    loop {
        if control.wait_while_paused() {
            break;
        }

        let (outcome, sample) = collector.collect_once(&descriptor, &registry);
        let report = build_report(&descriptor, outcome, &sample);
        let _ = reports.push(report);

        match outcome {
            CollectOutcome::TaskFatal | CollectOutcome::GenericError | CollectOutcome::UnsupportedTask => {
                control.mark_dropped();
                break;
            }
            _ => {}
        }

        if control.is_killed() {
            break;
        }

        control.sleep_for(Duration::from_secs(descriptor.frequency_secs));
        if control.is_killed() {
            break;
        }
    }

    stats.decrement(descriptor.task_type);
}

fn build_report(
    descriptor: &TaskDescriptor,
    outcome: CollectOutcome,
    sample: &crate::collector::CollectSample,
) -> Report {
    let base = Report::new(descriptor.id.clone(), descriptor.task_type, descriptor.metric);
    match outcome {
        CollectOutcome::TaskFatal => base.fatal(sample.cause.unwrap_or("UNKNOWN")),
        CollectOutcome::GenericError => base.fatal("INVALID_TASK"),
        CollectOutcome::UnsupportedTask => base.fatal("UNSUPPORTED_TASK"),
        CollectOutcome::UnsupportedDistro => base.fatal("UNSUPPORTED_DISTRO"),
        CollectOutcome::NoProc => base.error(sample.cause.unwrap_or("PROC_NOT_RUNNING")),
        CollectOutcome::Success => match sample.cause {
            Some(cause) => base.error(cause),
            None => Report {
                value: sample.value,
                percentage: sample.percentage,
                time_taken: sample.time_taken,
                ..base
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectSample;
    use crate::container::FrozenQueue;
    use crate::task::{MetricType, TaskId, TaskType};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingCollector(AtomicUsize);

    impl Collector for CountingCollector {
        fn collect_once(&self, _descriptor: &TaskDescriptor, _registry: &Registry) -> (CollectOutcome, CollectSample) {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            if n >= 2 {
                (CollectOutcome::TaskFatal, CollectSample { cause: Some("TEST_DONE"), ..Default::default() })
            } else {
                (CollectOutcome::Success, CollectSample { value: n as f64, ..Default::default() })
            }
        }
    }

    #[test]
    fn worker_stops_on_task_fatal_and_marks_dropped() {
        let descriptor = TaskDescriptor {
            id: TaskId::new("w1"),
            task_type: TaskType::Process,
            metric: MetricType::Memory,
            frequency_secs: 0,
            options: vec![],
        };
        let control = Arc::new(TaskControl::new());
        let registry = Arc::new(Registry::new());
        let reports: Arc<FrozenQueue<Report>> = Arc::new(FrozenQueue::new(0));
        let stats = Arc::new(Stats::new());
        let collector: Arc<dyn Collector> = Arc::new(CountingCollector(AtomicUsize::new(0)));

        let handle = {
            let control = control.clone();
            let registry = registry.clone();
            let reports = reports.clone();
            let stats = stats.clone();
            thread::spawn(move || run(descriptor, control, registry, reports, stats, collector))
        };
        handle.join().unwrap();

        assert!(control.is_dropped());
        assert_eq!(stats.snapshot().num_tasks, 0);
        assert_eq!(reports.len(), 3);
    }
}
