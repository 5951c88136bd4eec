//! Timer scheduling for the capture controller.
//!
//! The controller never sleeps. It asks a [`Ticker`] for repeating timers and
//! reacts to fires delivered back to it. [`IntervalSchedule`] keeps those timers
//! on an elapsed-time axis, so tests advance it by hand and the session driver
//! advances it from the tokio clock.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Timer purposes, in the order same-instant fires are delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    Session,
    Countdown,
    Detection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerId(u64);

/// A timer that came due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFire {
    pub id: TimerId,
    pub kind: TimerKind,
    pub at: Duration,
}

/// Scheduler capability injected into the controller
pub trait Ticker {
    /// Start a timer that fires every `period`, first after one period
    fn start_interval(&mut self, kind: TimerKind, period: Duration) -> TimerId;

    /// Stop a timer. Clearing an unknown or already cleared id is a no-op.
    fn clear(&mut self, id: TimerId);
}

#[derive(Debug, Clone)]
struct ScheduledTimer {
    kind: TimerKind,
    period: Duration,
    next_due: Duration,
}

/// Repeating timers on a manually advanced time axis
#[derive(Debug, Default)]
pub struct IntervalSchedule {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<TimerId, ScheduledTimer>,
}

impl IntervalSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position on the time axis
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Earliest pending due time, if any timer is active
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers.values().map(|t| t.next_due).min()
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }

    pub fn active_of_kind(&self, kind: TimerKind) -> usize {
        self.timers.values().filter(|t| t.kind == kind).count()
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.timers.contains_key(&id)
    }

    /// Move the clock forward without delivering anything. Never moves backwards.
    pub fn advance_to(&mut self, at: Duration) {
        if at > self.now {
            self.now = at;
        }
    }

    /// Deliver the earliest fire due at or before `until`.
    ///
    /// Fires come out one at a time so that whatever the caller does in
    /// response (clearing other timers) is seen by the next call. Ties are
    /// broken by [`TimerKind`] order, then by id.
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerFire> {
        let (id, due, kind) = self
            .timers
            .iter()
            .filter(|(_, t)| t.next_due <= until)
            .map(|(id, t)| (*id, t.next_due, t.kind))
            .min_by_key(|(id, due, kind)| (*due, *kind, *id))?;

        if let Some(timer) = self.timers.get_mut(&id) {
            timer.next_due = due + timer.period;
        }
        self.advance_to(due);

        Some(TimerFire { id, kind, at: due })
    }
}

impl Ticker for IntervalSchedule {
    fn start_interval(&mut self, kind: TimerKind, period: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        // A zero period would fire forever at the same instant
        let period = period.max(Duration::from_millis(1));
        self.timers.insert(
            id,
            ScheduledTimer {
                kind,
                period,
                next_due: self.now + period,
            },
        );
        id
    }

    fn clear(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }
}
