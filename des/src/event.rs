//! Pending events, ordered by `(time, sequence)`.
//!
//! `BinaryHeap` is a max-heap, so `Event` reverses its natural ordering to
//! make the heap pop the earliest event first. The sequence number is handed
//! out by the queue on every `schedule` call, which makes same-time events
//! pop in the order they were scheduled.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use crate::time::SimTime;

/// Tie-break number, strictly increasing in scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sequence(u64);

impl Sequence {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Event<P> {
    pub time: SimTime,
    pub sequence: Sequence,
    pub payload: P,
}

impl<P> PartialEq for Event<P> {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl<P> Eq for Event<P> {}

impl<P> Ord for Event<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<P> PartialOrd for Event<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-queue of timed events.
#[derive(Debug)]
pub struct EventQueue<P> {
    heap: BinaryHeap<Event<P>>,
    next_sequence: u64,
}

impl<P> EventQueue<P> {
    pub fn new() -> EventQueue<P> {
        EventQueue {
            heap: BinaryHeap::new(),
            next_sequence: 0,
        }
    }

    /// Insert `payload` at `time` and return the sequence number it was given.
    pub fn schedule(&mut self, time: SimTime, payload: P) -> Sequence {
        let sequence = Sequence(self.next_sequence);
        self.next_sequence += 1;
        self.heap.push(Event {
            time,
            sequence,
            payload,
        });
        sequence
    }

    /// Remove the event with the smallest `(time, sequence)`.
    pub fn pop_next(&mut self) -> Option<Event<P>> {
        self.heap.pop()
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|event| event.time)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<P> Default for EventQueue<P> {
    fn default() -> Self {
        Self::new()
    }
}
