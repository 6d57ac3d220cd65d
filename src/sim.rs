//! Scheduler Boundary
//!
//! The simulation engine is external; the core only asks for a callback at
//! a simulated time and may later cancel it. [`EventQueue`] is a small
//! deterministic implementation for tests and embedders that have no
//! engine of their own.
//!
//! ## Ordering
//!
//! Events fire in time order. Events scheduled for the same time fire in
//! the order they were scheduled.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Handle to a scheduled callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    /// Create from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event:{}", self.0)
    }
}

/// "Call me back at time T."
pub trait Scheduler<E> {
    /// Schedule `event` to fire at `at_ms`.
    fn schedule_at(&mut self, at_ms: u64, event: E) -> EventId;

    /// Cancel a pending event.
    ///
    /// Returns true if the event was pending. Cancelling an event that
    /// already fired or was already cancelled is a no-op.
    fn cancel(&mut self, id: EventId) -> bool;
}

/// Deterministic time-ordered event queue.
#[derive(Debug)]
pub struct EventQueue<E> {
    /// (time, id) min-heap; ids grow monotonically so equal times are FIFO.
    order: BinaryHeap<Reverse<(u64, EventId)>>,
    /// Pending payloads; cancelled entries are removed here and skipped
    /// when their heap slot surfaces.
    pending: HashMap<EventId, E>,
    next_id: u64,
}

impl<E> EventQueue<E> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            order: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of pending (non-cancelled) events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Check whether an event is still pending.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Time of the next pending event.
    pub fn peek_time(&mut self) -> Option<u64> {
        self.skip_cancelled();
        self.order.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return the next pending event.
    pub fn pop(&mut self) -> Option<(u64, EventId, E)> {
        self.skip_cancelled();
        let Reverse((at, id)) = self.order.pop()?;
        let event = self.pending.remove(&id)?;
        Some((at, id, event))
    }

    /// Remove and return the next event if it is due at or before `now_ms`.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(u64, EventId, E)> {
        match self.peek_time() {
            Some(at) if at <= now_ms => self.pop(),
            _ => None,
        }
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.order.peek() {
            if self.pending.contains_key(id) {
                break;
            }
            self.order.pop();
        }
    }
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Scheduler<E> for EventQueue<E> {
    fn schedule_at(&mut self, at_ms: u64, event: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.order.push(Reverse((at_ms, id)));
        self.pending.insert(id, event);
        id
    }

    fn cancel(&mut self, id: EventId) -> bool {
        self.pending.remove(&id).is_some()
    }
}
