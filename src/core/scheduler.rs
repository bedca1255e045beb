use std::collections::VecDeque;

use crate::clock::SimTime;

/// A pending event: when it is due and what it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent<E> {
    pub time: SimTime,
    pub payload: E,
}

/// Time-ordered list of pending events.
///
/// Independent of the simulation model: the payload type is chosen by the
/// caller and dispatched by pattern matching. Events with equal times fire
/// in the order they were scheduled.
#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    pending: VecDeque<ScheduledEvent<E>>,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Insert after every pending event whose time is `<= time`.
    pub fn schedule(&mut self, time: SimTime, payload: E) {
        let at = self.pending.partition_point(|ev| ev.time <= time);
        self.pending.insert(at, ScheduledEvent { time, payload });
    }

    /// Remove and return the earliest event if it is due at `now`.
    pub fn pop_due(&mut self, now: SimTime) -> Option<ScheduledEvent<E>> {
        match self.pending.front() {
            Some(ev) if ev.time <= now => self.pending.pop_front(),
            _ => None,
        }
    }

    /// Fire every event due at or before `now`, earliest first.
    ///
    /// Each event is unlinked before `fire` runs, so the callback may
    /// schedule more events through the `&mut Self` it receives; any of them
    /// due at or before `now` fire within this same call. Returns the number
    /// of events fired.
    pub fn process_events<F>(&mut self, now: SimTime, mut fire: F) -> usize
    where
        F: FnMut(&mut Self, ScheduledEvent<E>),
    {
        let mut fired = 0;
        while let Some(ev) = self.pop_due(now) {
            fire(self, ev);
            fired += 1;
        }
        fired
    }

    /// Drop every pending event without firing it.
    pub fn clear_events(&mut self) {
        self.pending.clear();
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_time(&self) -> Option<SimTime> {
        self.pending.front().map(|ev| ev.time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledEvent<E>> {
        self.pending.iter()
    }
}
