//! Timer registration.
//!
//! Timers do not carry callbacks. A registered [`TimerTask`] is handed back
//! from [`Scheduler::due`] once its deadline passes and the coordinator
//! dispatches it like any other event, which keeps every reaction on one
//! logical thread and makes timer behaviour reproducible under a manual clock.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Work a timer triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerTask {
    /// Idle/timeout evaluation.
    ActivityCheck,
    /// Periodic backup while a session is running.
    PeriodicBackup,
    /// End of a debounce window for bursty backup triggers.
    DebouncedBackup,
}

/// Handle returned by registration, used to cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Register and cancel recurring and delayed tasks.
pub trait Scheduler {
    /// Fire `task` every `period`, first at `now + period`.
    fn schedule_repeating(
        &mut self,
        task: TimerTask,
        period: Duration,
        now: DateTime<Utc>,
    ) -> TimerId;

    /// Fire `task` once at `now + delay`.
    fn schedule_once(&mut self, task: TimerTask, delay: Duration, now: DateTime<Utc>) -> TimerId;

    /// Cancel a timer. Returns false if it was not registered.
    fn cancel(&mut self, id: TimerId) -> bool;

    /// Cancel every timer.
    fn cancel_all(&mut self);

    /// Pop every task whose deadline is at or before `now`, ordered by
    /// deadline then registration. Repeating timers are re-armed and may
    /// appear several times if `now` skipped over multiple periods.
    fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerTask>;

    /// Whether a timer is registered.
    fn is_scheduled(&self, id: TimerId) -> bool;
}

#[derive(Debug, Clone)]
struct Entry {
    task: TimerTask,
    deadline: DateTime<Utc>,
    period: Option<Duration>,
}

/// Deterministic in-process scheduler.
#[derive(Debug, Default)]
pub struct TimerWheel {
    next_id: u64,
    entries: BTreeMap<TimerId, Entry>,
}

impl TimerWheel {
    /// Create an empty wheel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no timers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: Entry) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }
}

impl Scheduler for TimerWheel {
    fn schedule_repeating(
        &mut self,
        task: TimerTask,
        period: Duration,
        now: DateTime<Utc>,
    ) -> TimerId {
        self.insert(Entry {
            task,
            deadline: now + period,
            period: Some(period),
        })
    }

    fn schedule_once(&mut self, task: TimerTask, delay: Duration, now: DateTime<Utc>) -> TimerId {
        self.insert(Entry {
            task,
            deadline: now + delay,
            period: None,
        })
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    fn cancel_all(&mut self) {
        self.entries.clear();
    }

    fn due(&mut self, now: DateTime<Utc>) -> Vec<TimerTask> {
        let mut fired: Vec<(DateTime<Utc>, TimerId, TimerTask)> = Vec::new();
        let mut finished = Vec::new();

        for (id, entry) in &mut self.entries {
            match entry.period {
                Some(period) if period > Duration::zero() => {
                    while entry.deadline <= now {
                        fired.push((entry.deadline, *id, entry.task));
                        entry.deadline += period;
                    }
                }
                _ => {
                    if entry.deadline <= now {
                        fired.push((entry.deadline, *id, entry.task));
                        finished.push(*id);
                    }
                }
            }
        }
        for id in finished {
            self.entries.remove(&id);
        }

        fired.sort_by_key(|(deadline, id, _)| (*deadline, *id));
        fired.into_iter().map(|(_, _, task)| task).collect()
    }

    fn is_scheduled(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_once_fires_once_and_unregisters() {
        let mut wheel = TimerWheel::new();
        let id = wheel.schedule_once(TimerTask::DebouncedBackup, Duration::seconds(5), at(0));

        assert!(wheel.due(at(4_999)).is_empty());
        assert_eq!(wheel.due(at(5_000)), vec![TimerTask::DebouncedBackup]);
        assert!(!wheel.is_scheduled(id));
        assert!(wheel.due(at(60_000)).is_empty());
    }

    #[test]
    fn test_repeating_catches_up_missed_periods() {
        let mut wheel = TimerWheel::new();
        wheel.schedule_repeating(TimerTask::ActivityCheck, Duration::seconds(30), at(0));

        let fired = wheel.due(at(95_000));
        assert_eq!(fired, vec![TimerTask::ActivityCheck; 3]);
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn test_due_orders_by_deadline() {
        let mut wheel = TimerWheel::new();
        wheel.schedule_repeating(TimerTask::PeriodicBackup, Duration::seconds(120), at(0));
        wheel.schedule_repeating(TimerTask::ActivityCheck, Duration::seconds(30), at(0));

        let fired = wheel.due(at(120_000));
        assert_eq!(
            fired,
            vec![
                TimerTask::ActivityCheck,
                TimerTask::ActivityCheck,
                TimerTask::ActivityCheck,
                TimerTask::PeriodicBackup,
                TimerTask::ActivityCheck,
            ]
        );
    }

    #[test]
    fn test_cancel() {
        let mut wheel = TimerWheel::new();
        let id = wheel.schedule_repeating(TimerTask::PeriodicBackup, Duration::seconds(1), at(0));
        assert!(wheel.cancel(id));
        assert!(!wheel.cancel(id));
        assert!(wheel.due(at(10_000)).is_empty());
    }
}
