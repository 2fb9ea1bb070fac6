//! Event Feed
//!
//! Trait definition for sources that can replay a run's decoded veto events.
//! The orchestrator iterates the same stream once per pass, so a feed must
//! support idempotent re-iteration: after `reset()` it reproduces the exact
//! same records in the exact same order.

use crate::veto::event::EventRecord;

/// Trait for veto event sources that provide replay capability.
pub trait EventFeed: Send {
    /// Get the next event from the feed.
    fn next_event(&mut self) -> Option<EventRecord>;

    /// Reset the feed to the beginning (required between passes).
    fn reset(&mut self);

    /// Total number of events in the run, if known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// Feed identifier for logging/diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// A feed backed by an in-memory vector of events.
pub struct VecFeed {
    events: Vec<EventRecord>,
    index: usize,
    name: String,
}

impl VecFeed {
    pub fn new(name: impl Into<String>, events: Vec<EventRecord>) -> Self {
        Self {
            events,
            index: 0,
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventFeed for VecFeed {
    fn next_event(&mut self) -> Option<EventRecord> {
        if self.index < self.events.len() {
            let event = self.events[self.index].clone();
            self.index += 1;
            Some(event)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.index = 0;
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.events.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
