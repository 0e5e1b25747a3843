//! Command queues with flow control
//!
//! Implements the window half of the GRBL streaming protocol: at most
//! `capacity` commands are unacknowledged on the device at once, everything
//! else waits in the backlog.
//!
//! # Queues
//! - `in_flight`: sent and awaiting `ok`/`error`, oldest first
//! - `backlog`: planned but not sent, in send order
//! - `history`: everything dispatched, bounded by `history_limit`

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::command::CommandTracker;

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStats {
    /// Commands awaiting acknowledgement
    pub in_flight: usize,
    /// Commands waiting to be sent
    pub backlog: usize,
    /// Commands retained in history
    pub history: usize,
    /// In-flight window size
    pub capacity: usize,
}

/// The controller's three command queues
#[derive(Debug)]
pub struct CommandQueues {
    capacity: usize,
    history_limit: usize,
    in_flight: VecDeque<Arc<CommandTracker>>,
    backlog: VecDeque<Arc<CommandTracker>>,
    history: VecDeque<Arc<CommandTracker>>,
}

impl CommandQueues {
    /// Create queues with the given in-flight window and history retention
    pub fn new(capacity: usize, history_limit: usize) -> Self {
        Self {
            capacity,
            history_limit,
            in_flight: VecDeque::with_capacity(capacity),
            backlog: VecDeque::new(),
            history: VecDeque::new(),
        }
    }

    /// In-flight window size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots left in the in-flight window
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.in_flight.len())
    }

    /// Whether another command may be sent
    pub fn has_room(&self) -> bool {
        self.free_slots() > 0
    }

    /// Append to the end of the backlog
    pub fn enqueue(&mut self, tracker: Arc<CommandTracker>) {
        self.backlog.push_back(tracker);
    }

    /// Insert at the front of the backlog
    pub fn enqueue_front(&mut self, tracker: Arc<CommandTracker>) {
        self.backlog.push_front(tracker);
    }

    /// Take the oldest backlog entry
    pub fn next_pending(&mut self) -> Option<Arc<CommandTracker>> {
        self.backlog.pop_front()
    }

    /// Remove every backlog entry matching `predicate`, keeping order
    pub fn withdraw<F>(&mut self, mut predicate: F) -> Vec<Arc<CommandTracker>>
    where
        F: FnMut(&CommandTracker) -> bool,
    {
        let mut withdrawn = Vec::new();
        self.backlog.retain(|tracker| {
            if predicate(tracker) {
                withdrawn.push(tracker.clone());
                false
            } else {
                true
            }
        });
        withdrawn
    }

    /// Empty the backlog
    pub fn drain_backlog(&mut self) -> Vec<Arc<CommandTracker>> {
        self.backlog.drain(..).collect()
    }

    /// Record a sent command awaiting acknowledgement
    pub fn push_in_flight(&mut self, tracker: Arc<CommandTracker>) {
        self.in_flight.push_back(tracker);
    }

    /// Take the oldest unacknowledged command
    pub fn acknowledge(&mut self) -> Option<Arc<CommandTracker>> {
        self.in_flight.pop_front()
    }

    /// Drop a command that never reached the device from the window
    pub fn remove_in_flight(&mut self, tracker: &Arc<CommandTracker>) -> bool {
        let before = self.in_flight.len();
        self.in_flight.retain(|t| !Arc::ptr_eq(t, tracker));
        self.in_flight.len() != before
    }

    /// Append to history, dropping the oldest entries beyond the limit
    pub fn record(&mut self, tracker: Arc<CommandTracker>) {
        self.history.push_back(tracker);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Commands awaiting acknowledgement, oldest first
    pub fn in_flight(&self) -> impl Iterator<Item = &Arc<CommandTracker>> {
        self.in_flight.iter()
    }

    /// Commands waiting to be sent, in send order
    pub fn backlog(&self) -> impl Iterator<Item = &Arc<CommandTracker>> {
        self.backlog.iter()
    }

    /// Dispatched commands, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Arc<CommandTracker>> {
        self.history.iter()
    }

    /// Number of commands awaiting acknowledgement
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of commands waiting to be sent
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Current occupancy
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            in_flight: self.in_flight.len(),
            backlog: self.backlog.len(),
            history: self.history.len(),
            capacity: self.capacity,
        }
    }
}
