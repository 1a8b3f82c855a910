//! Time sources and timers.
//!
//! Everything the controller schedules is measured against a [`Clock`].
//! [`TimerQueue`] holds one-shot and repeating timers in deadline order and
//! hands them out as the clock passes them.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// Monotonic time source. Values are measured from an arbitrary epoch fixed
/// when the clock was created.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Manually advanced clock. Clones share the same underlying time, so a test
/// can keep one handle while the controller and audio backend hold others.
#[derive(Debug, Default, Clone)]
pub struct PlaybackClock {
    micros: Arc<AtomicU64>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.micros.store(0, Ordering::SeqCst);
    }

    /// Moves every clone of the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        self.micros
            .fetch_add(delta.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jumps forward to an absolute time. Earlier values are ignored.
    pub fn set(&self, at: Duration) {
        let target = at.as_micros() as u64;
        self.micros.fetch_max(target, Ordering::SeqCst);
    }
}

impl Clock for PlaybackClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }
}

/// Handle returned when a timer is scheduled; used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Timer<T> {
    task: T,
    repeat: Option<Duration>,
}

/// A timer that came due.
#[derive(Debug, Clone, PartialEq)]
pub struct Fired<T> {
    pub id: TimerId,
    pub deadline: Duration,
    pub task: T,
}

/// Cooperative timer queue: one-shot and repeating timers, fired in deadline
/// order by whoever polls [`TimerQueue::pop_due`]. Timers with equal deadlines
/// fire in scheduling order.
#[derive(Debug)]
pub struct TimerQueue<T> {
    pending: BTreeMap<(Duration, TimerId), Timer<T>>,
    deadlines: HashMap<TimerId, Duration>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_id: 0,
        }
    }
}

impl<T: Clone> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to fire once at `deadline`.
    pub fn schedule_once(&mut self, deadline: Duration, task: T) -> TimerId {
        self.insert(deadline, task, None)
    }

    /// Schedules `task` to fire at `first` and then every `interval` until
    /// cancelled. A zero interval is treated as one microsecond.
    pub fn schedule_repeating(&mut self, first: Duration, interval: Duration, task: T) -> TimerId {
        let interval = interval.max(Duration::from_micros(1));
        self.insert(first, task, Some(interval))
    }

    /// Cancels a timer. Returns `false` when it already fired or was never
    /// scheduled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.deadlines.remove(&id) {
            Some(deadline) => self.pending.remove(&(deadline, id)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.deadlines.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Deadline of the earliest pending timer.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Number of pending timers whose task satisfies `predicate`.
    pub fn count_matching(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        self.pending
            .values()
            .filter(|timer| predicate(&timer.task))
            .count()
    }

    /// Removes and returns the earliest timer whose deadline is at or before
    /// `now`. Repeating timers are re-armed one interval later, so a caller
    /// that polls late sees every missed tick.
    pub fn pop_due(&mut self, now: Duration) -> Option<Fired<T>> {
        let key = *self.pending.keys().next()?;
        if key.0 > now {
            return None;
        }

        let (deadline, id) = key;
        let timer = self.pending.remove(&key)?;
        self.deadlines.remove(&id);

        if let Some(interval) = timer.repeat {
            let next = deadline + interval;
            self.pending.insert((next, id), timer.clone());
            self.deadlines.insert(id, next);
        }

        Some(Fired {
            id,
            deadline,
            task: timer.task,
        })
    }

    fn insert(&mut self, deadline: Duration, task: T, repeat: Option<Duration>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert((deadline, id), Timer { task, repeat });
        self.deadlines.insert(id, deadline);
        id
    }
}
