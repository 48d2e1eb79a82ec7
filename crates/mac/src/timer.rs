//! Timed event bookkeeping on top of the simulation scheduler

use std::collections::HashMap;

use beamsim_core::SimTime;

#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone, PartialOrd, Ord)]
pub struct EventId(pub u64);

/// The discrete-event engine as seen by one station.
///
/// `schedule` returns a ticket the engine hands back to the station when the
/// deadline is reached. Cancelled tickets may still be delivered; `Timer`
/// filters them out.
pub trait Scheduler {
    fn now(&self) -> SimTime;
    fn schedule(&mut self, deadline: SimTime) -> EventId;
    fn cancel(&mut self, id: EventId);
}

/// Maps outstanding tickets to typed events.
pub struct Timer<E, S> {
    events: HashMap<EventId, E>,
    scheduler: S,
}

impl<E, S: Scheduler> Timer<E, S> {
    pub fn new(scheduler: S) -> Self {
        Self {
            events: HashMap::default(),
            scheduler,
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Returns the event for a fired ticket, at most once.
    pub fn triggered(&mut self, event_id: &EventId) -> Option<E> {
        self.events.remove(event_id)
    }

    pub fn schedule_event(&mut self, deadline: SimTime, event: E) -> EventId {
        let event_id = self.scheduler.schedule(deadline);
        self.events.insert(event_id, event);
        event_id
    }

    pub fn cancel_event(&mut self, event_id: EventId) {
        self.events.remove(&event_id);
        self.scheduler.cancel(event_id);
    }

    /// Arms `slot`, cancelling whatever it held before.
    pub fn reschedule(&mut self, slot: &mut Option<EventId>, deadline: SimTime, event: E) {
        self.cancel_slot(slot);
        *slot = Some(self.schedule_event(deadline, event));
    }

    pub fn cancel_slot(&mut self, slot: &mut Option<EventId>) {
        if let Some(event_id) = slot.take() {
            self.cancel_event(event_id);
        }
    }

    pub fn outstanding(&self) -> usize {
        self.events.len()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }
}
