use tracing::debug;

use crate::session::TimerHandler;
use crate::{Error, Result};

pub(crate) struct TimerTask {
    pub(crate) id: i64,
    pub(crate) due_at: i64,
    pub(crate) order: i64,
    pub(crate) interval_ms: Option<i64>,
    pub(crate) handler: TimerHandler,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTimer {
    pub id: i64,
    pub due_at: i64,
    pub order: i64,
    pub interval_ms: Option<i64>,
}

/// Page-observable time. While frozen, reads return exactly the pinned
/// instant until `advance` moves it; unfrozen clocks move by a fixed step
/// per session tick so runs stay reproducible either way. Timers fire only
/// when the clock reaches their due instant, ordered by `(due_at, order)`.
pub struct VirtualClock {
    now_ms: i64,
    frozen: bool,
    tick_step_ms: i64,
    timers: Vec<TimerTask>,
    next_timer_id: i64,
    next_order: i64,
    step_limit: usize,
    running_timer_id: Option<i64>,
    running_timer_canceled: bool,
}

impl VirtualClock {
    pub(crate) fn new() -> Self {
        Self {
            now_ms: 0,
            frozen: true,
            tick_step_ms: 0,
            timers: Vec::new(),
            next_timer_id: 1,
            next_order: 0,
            step_limit: 10_000,
            running_timer_id: None,
            running_timer_canceled: false,
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub(crate) fn freeze(&mut self, epoch_ms: i64) {
        self.now_ms = epoch_ms;
        self.frozen = true;
        debug!(epoch_ms, "clock frozen");
    }

    pub(crate) fn unfreeze(&mut self, tick_step_ms: i64) {
        self.frozen = false;
        self.tick_step_ms = tick_step_ms.max(0);
        debug!(tick_step_ms = self.tick_step_ms, "clock unfrozen");
    }

    /// Called once per session tick; frozen clocks ignore it.
    pub(crate) fn on_tick(&mut self) {
        if !self.frozen {
            self.now_ms = self.now_ms.saturating_add(self.tick_step_ms);
        }
    }

    pub(crate) fn advance_now(&mut self, delta_ms: i64) -> Result<()> {
        if delta_ms < 0 {
            return Err(Error::InvalidCommand(
                "advance requires non-negative milliseconds".into(),
            ));
        }
        let from = self.now_ms;
        self.now_ms = self.now_ms.saturating_add(delta_ms);
        debug!(from, to = self.now_ms, "clock advance");
        Ok(())
    }

    /// `YYYY-MM-DD` of the current instant, UTC.
    pub fn today_utc(&self) -> String {
        let days = self.now_ms.div_euclid(86_400_000);
        let (y, m, d) = civil_from_days(days);
        format!("{y:04}-{m:02}-{d:02}")
    }

    pub(crate) fn schedule(
        &mut self,
        delay_ms: i64,
        interval_ms: Option<i64>,
        handler: TimerHandler,
    ) -> i64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        let order = self.next_order;
        self.next_order += 1;
        let due_at = self.now_ms.saturating_add(delay_ms.max(0));
        debug!(id, due_at, ?interval_ms, "timer scheduled");
        self.timers.push(TimerTask {
            id,
            due_at,
            order,
            interval_ms,
            handler,
        });
        id
    }

    pub(crate) fn clear(&mut self, timer_id: i64) -> bool {
        let before = self.timers.len();
        self.timers.retain(|task| task.id != timer_id);
        let removed = self.timers.len() != before;
        if self.running_timer_id == Some(timer_id) {
            self.running_timer_canceled = true;
            return true;
        }
        removed
    }

    pub(crate) fn clear_all(&mut self) -> usize {
        let cleared = self.timers.len();
        self.timers.clear();
        if self.running_timer_id.is_some() {
            self.running_timer_canceled = true;
        }
        cleared
    }

    pub fn pending_timers(&self) -> Vec<PendingTimer> {
        let mut timers = self
            .timers
            .iter()
            .map(|task| PendingTimer {
                id: task.id,
                due_at: task.due_at,
                order: task.order,
                interval_ms: task.interval_ms,
            })
            .collect::<Vec<_>>();
        timers.sort_by_key(|timer| (timer.due_at, timer.order));
        timers
    }

    pub(crate) fn take_due_task(&mut self) -> Option<TimerTask> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, task)| task.due_at <= self.now_ms)
            .min_by_key(|(_, task)| (task.due_at, task.order))
            .map(|(idx, _)| idx)?;
        Some(self.timers.remove(idx))
    }

    pub(crate) fn step_limit(&self) -> usize {
        self.step_limit
    }

    pub(crate) fn set_step_limit(&mut self, max_steps: usize) -> Result<()> {
        if max_steps == 0 {
            return Err(Error::InvalidCommand(
                "timer step limit requires at least 1 step".into(),
            ));
        }
        self.step_limit = max_steps;
        Ok(())
    }

    pub(crate) fn begin_task(&mut self, timer_id: i64) {
        self.running_timer_id = Some(timer_id);
        self.running_timer_canceled = false;
    }

    /// Ends the running task; returns whether it was canceled mid-run.
    pub(crate) fn finish_task(&mut self) -> bool {
        let canceled = self.running_timer_canceled;
        self.running_timer_id = None;
        self.running_timer_canceled = false;
        canceled
    }

    pub(crate) fn requeue_interval(&mut self, task: TimerTask, interval_ms: i64) {
        let delay_ms = interval_ms.max(0);
        let due_at = task.due_at.saturating_add(delay_ms);
        let order = self.next_order;
        self.next_order += 1;
        debug!(id = task.id, due_at, "interval requeued");
        self.timers.push(TimerTask {
            id: task.id,
            due_at,
            order,
            interval_ms: Some(delay_ms),
            handler: task.handler,
        });
    }
}

/// Utc midnight for a civil date, in epoch milliseconds.
pub fn utc_midnight_ms(year: i64, month: u32, day: u32) -> i64 {
    days_from_civil(year, month, day) * 86_400_000
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (y + i64::from(m <= 2), m, d)
}

fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = year - i64::from(month <= 2);
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = u64::from(if month > 2 { month - 3 } else { month + 9 });
    let doy = (153 * mp + 2) / 5 + u64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}
