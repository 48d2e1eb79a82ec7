//! Deterministic discrete-event queue shared by every simulated node

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use beamsim_core::SimTime;
use beamsim_mac::{EventId, Scheduler};
use log::trace;

use crate::medium::Arrival;

/// Position of a node in the simulation's node table.
pub type NodeIndex = usize;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    Timer { node: NodeIndex, event_id: EventId },
    Arrival(Arrival),
}

struct Scheduled {
    at: SimTime,
    seq: u64,
    event: EngineEvent,
}

// earliest first; ties go to the event inserted first
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for Scheduled {}

#[derive(Default)]
pub struct EventQueue {
    now: SimTime,
    next_seq: u64,
    heap: BinaryHeap<Scheduled>,
    cancelled: HashSet<u64>,
    delivered: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of events handed out by `pop` so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn push(&mut self, at: SimTime, event: EngineEvent) -> u64 {
        let at = if at < self.now {
            trace!("event for {:?} scheduled in the past, firing at {:?}", at, self.now);
            self.now
        } else {
            at
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { at, seq, event });
        seq
    }

    pub fn schedule_timer(&mut self, node: NodeIndex, at: SimTime) -> EventId {
        let event_id = EventId(self.next_seq);
        self.push(at, EngineEvent::Timer { node, event_id });
        event_id
    }

    pub fn cancel(&mut self, event_id: EventId) {
        self.cancelled.insert(event_id.0);
    }

    /// Time of the next live event, if any.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        while let Some(next) = self.heap.peek() {
            if self.cancelled.remove(&next.seq) {
                self.heap.pop();
                continue;
            }
            return Some(next.at);
        }
        None
    }

    /// Removes the next live event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(SimTime, EngineEvent)> {
        while let Some(next) = self.heap.pop() {
            if self.cancelled.remove(&next.seq) {
                continue;
            }
            self.now = next.at;
            self.delivered += 1;
            return Some((next.at, next.event));
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.heap
            .iter()
            .filter(|scheduled| !self.cancelled.contains(&scheduled.seq))
            .count()
    }
}

/// One node's view of the shared queue.
#[derive(Clone)]
pub struct EngineScheduler {
    queue: Rc<RefCell<EventQueue>>,
    node: NodeIndex,
}

impl EngineScheduler {
    pub fn new(queue: Rc<RefCell<EventQueue>>, node: NodeIndex) -> Self {
        Self { queue, node }
    }
}

impl Scheduler for EngineScheduler {
    fn now(&self) -> SimTime {
        self.queue.borrow().now()
    }

    fn schedule(&mut self, deadline: SimTime) -> EventId {
        self.queue.borrow_mut().schedule_timer(self.node, deadline)
    }

    fn cancel(&mut self, id: EventId) {
        self.queue.borrow_mut().cancel(id);
    }
}
