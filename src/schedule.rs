//! Cooperative task queue and the daily backup schedule.

use std::collections::VecDeque;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone};
use thiserror::Error;

use crate::config::BackupConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid backup time {0:?}, expected HH:MM")]
    BadTime(String),
}

type Step<'a> = Box<dyn FnMut() -> bool + 'a>;

/// Round-robin queue of repeatable steps. Each step does a bounded unit
/// of work and returns `true` while it has more to do.
#[derive(Default)]
pub struct TaskQueue<'a> {
    tasks: VecDeque<(String, Step<'a>)>,
}

impl<'a> TaskQueue<'a> {
    pub fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub fn push(&mut self, name: &str, step: impl FnMut() -> bool + 'a) {
        log::debug!("Queued task {name}");
        self.tasks.push_back((name.to_string(), Box::new(step)));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run the front task once, requeueing it if it has more work.
    /// Returns whether any task is still pending.
    pub fn run_once(&mut self) -> bool {
        if let Some((name, mut step)) = self.tasks.pop_front() {
            if step() {
                self.tasks.push_back((name, step));
            } else {
                log::debug!("Task {name} done");
            }
        }
        !self.tasks.is_empty()
    }

    /// Run until every task is done. Returns the number of steps taken.
    pub fn run_until_idle(&mut self) -> usize {
        let mut steps = 0;
        while !self.tasks.is_empty() {
            self.run_once();
            steps += 1;
        }
        steps
    }
}

/// Parse `HH:MM` (24-hour).
pub fn parse_time(text: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M").map_err(|_| ScheduleError::BadTime(text.to_string()))
}

/// Daily backup at a fixed local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSchedule {
    pub time: NaiveTime,
    pub last_run: Option<DateTime<Local>>,
    due_at: DateTime<Local>,
}

impl BackupSchedule {
    /// A schedule whose first run is the next occurrence of `time` after `now`.
    pub fn new(time: NaiveTime, now: DateTime<Local>) -> Self {
        let mut schedule = Self {
            time,
            last_run: None,
            due_at: now,
        };
        schedule.due_at = schedule.next_run(now);
        schedule
    }

    /// `None` when scheduled backups are turned off.
    pub fn from_config(config: &BackupConfig, now: DateTime<Local>) -> Result<Option<Self>, ScheduleError> {
        if !config.scheduled {
            return Ok(None);
        }
        let time = parse_time(&config.time)?;
        Ok(Some(Self::new(time, now)))
    }

    /// First occurrence of the backup time strictly after `now`.
    pub fn next_run(&self, now: DateTime<Local>) -> DateTime<Local> {
        let today = self.at(now.date_naive());
        if today > now {
            return today;
        }
        let tomorrow = now.date_naive().checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
        self.at(tomorrow)
    }

    pub fn due_at(&self) -> DateTime<Local> {
        self.due_at
    }

    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now >= self.due_at
    }

    pub fn mark_run(&mut self, now: DateTime<Local>) {
        self.last_run = Some(now);
        self.due_at = self.next_run(now);
        log::info!("Next scheduled backup at {}", self.due_at.format("%Y-%m-%d %H:%M"));
    }

    fn at(&self, date: NaiveDate) -> DateTime<Local> {
        let naive = date.and_time(self.time);
        // Inside a DST gap the wall-clock time does not exist
        Local
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| Local.from_utc_datetime(&naive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_round_robin_until_idle() {
        let a = Cell::new(0);
        let b = Cell::new(0);
        let order = std::cell::RefCell::new(Vec::new());
        let mut queue = TaskQueue::new();
        queue.push("a", || {
            a.set(a.get() + 1);
            order.borrow_mut().push('a');
            a.get() < 3
        });
        queue.push("b", || {
            b.set(b.get() + 1);
            order.borrow_mut().push('b');
            false
        });
        assert_eq!(queue.len(), 2);
        let steps = queue.run_until_idle();
        drop(queue);
        assert_eq!(steps, 4);
        assert_eq!((a.get(), b.get()), (3, 1));
        assert_eq!(*order.borrow(), vec!['a', 'b', 'a', 'a']);
    }

    #[test]
    fn test_run_once_reports_pending() {
        let mut queue = TaskQueue::new();
        assert!(!queue.run_once());
        let mut left = 2;
        queue.push("countdown", move || {
            left -= 1;
            left > 0
        });
        assert!(queue.run_once());
        assert!(!queue.run_once());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("03:30"), Ok(NaiveTime::from_hms_opt(3, 30, 0).unwrap()));
        assert_eq!(parse_time(" 23:05 "), Ok(NaiveTime::from_hms_opt(23, 5, 0).unwrap()));
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("3.30").is_err());
    }

    #[test]
    fn test_next_run_today_or_tomorrow() {
        let time = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let schedule = BackupSchedule::new(time, local(2024, 5, 1, 1, 0));
        assert_eq!(schedule.due_at(), local(2024, 5, 1, 3, 30));
        assert_eq!(schedule.next_run(local(2024, 5, 1, 3, 30)), local(2024, 5, 2, 3, 30));
        assert_eq!(schedule.next_run(local(2024, 5, 1, 12, 0)), local(2024, 5, 2, 3, 30));
    }

    #[test]
    fn test_due_then_mark_run() {
        let time = NaiveTime::from_hms_opt(3, 30, 0).unwrap();
        let mut schedule = BackupSchedule::new(time, local(2024, 5, 1, 12, 0));
        assert!(!schedule.is_due(local(2024, 5, 1, 23, 59)));
        assert!(schedule.is_due(local(2024, 5, 2, 3, 30)));
        schedule.mark_run(local(2024, 5, 2, 3, 31));
        assert_eq!(schedule.last_run, Some(local(2024, 5, 2, 3, 31)));
        assert!(!schedule.is_due(local(2024, 5, 2, 4, 0)));
        assert_eq!(schedule.due_at(), local(2024, 5, 3, 3, 30));
    }

    #[test]
    fn test_from_config() {
        let now = local(2024, 5, 1, 12, 0);
        let mut config = BackupConfig::default();
        assert_eq!(BackupSchedule::from_config(&config, now), Ok(None));
        config.scheduled = true;
        assert!(BackupSchedule::from_config(&config, now).unwrap().is_some());
        config.time = "noon".into();
        assert!(BackupSchedule::from_config(&config, now).is_err());
    }
}
