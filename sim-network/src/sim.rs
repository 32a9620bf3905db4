//! Discrete-event scheduler
//!
//! Events are closures that get exclusive access to the simulated world and to the scheduler
//! itself, so they can schedule follow-up events. The clock only moves when an event is popped,
//! and jumps straight to that event's timestamp.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A point in simulated time, with nanosecond resolution
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> Self::Output {
        SimTime(self.0.saturating_add(SimTime::from_duration(rhs).0))
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Self::Output {
        Duration::from_nanos(self.0.saturating_sub(rhs.0))
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let secs = self.0 / NANOS_PER_SEC;
        let nanos = self.0 % NANOS_PER_SEC;
        if nanos == 0 {
            write!(f, "+{secs}s")
        } else {
            let fraction = format!("{nanos:09}");
            write!(f, "+{secs}.{}s", fraction.trim_end_matches('0'))
        }
    }
}

/// Identifies a scheduled event, so it can be cancelled before it fires
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventId(u64);

pub type Event<W> = Box<dyn FnOnce(&mut W, &mut Scheduler<W>)>;

pub struct Scheduler<W> {
    now: SimTime,
    next_event_id: u64,
    executed_events: u64,
    pending: BinaryHeap<PendingEvent<W>>,
    cancelled: HashSet<EventId>,
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self {
            now: SimTime::ZERO,
            next_event_id: 0,
            executed_events: 0,
            pending: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }
}

impl<W> Scheduler<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn executed_events(&self) -> u64 {
        self.executed_events
    }

    /// Number of events waiting to fire (cancelled events that were not yet popped included)
    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    /// Schedules `event` to fire `delay` after the current time
    pub fn schedule(
        &mut self,
        delay: Duration,
        event: impl FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    ) -> EventId {
        self.schedule_at(self.now + delay, event)
    }

    /// Schedules `event` to fire at `at`, or right away if `at` is already in the past
    pub fn schedule_at(
        &mut self,
        at: SimTime,
        event: impl FnOnce(&mut W, &mut Scheduler<W>) + 'static,
    ) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id += 1;
        self.pending.push(PendingEvent {
            at: at.max(self.now),
            id,
            event: Box::new(event),
        });

        id
    }

    /// Prevents a pending event from firing
    ///
    /// Cancelled events never advance the clock.
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    /// Discards every pending event, which causes [`Scheduler::run`] to return after the current
    /// event
    pub fn stop(&mut self) {
        self.pending.clear();
        self.cancelled.clear();
    }

    /// Runs events in timestamp order until none are left and returns the time of the last one
    pub fn run(&mut self, world: &mut W) -> SimTime {
        while let Some(next) = self.pending.pop() {
            if self.cancelled.remove(&next.id) {
                continue;
            }

            self.now = next.at;
            (next.event)(world, self);
            self.executed_events += 1;
        }

        self.now
    }
}

// Pending events, sorted by timestamp and then by insertion order
struct PendingEvent<W> {
    at: SimTime,
    id: EventId,
    event: Event<W>,
}

impl<W> Eq for PendingEvent<W> {}

impl<W> PartialEq<Self> for PendingEvent<W> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl<W> PartialOrd<Self> for PendingEvent<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for PendingEvent<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Note: the order is reversed, so the "max" event will be the next one to fire
        other
            .at
            .cmp(&self.at)
            .then(other.id.0.cmp(&self.id.0))
    }
}
