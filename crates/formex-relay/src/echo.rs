use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use formex_core::ChangeEvent;

/// Events remembered while waiting for them to come back over the bus.
pub const ECHO_CAPACITY: usize = 256;

/// Remembers the events this instance published so its own subscription
/// does not broadcast them a second time to local clients.
///
/// Bounded: if the subscriber is down and echoes never arrive, the oldest
/// entries are evicted.
pub struct EchoFilter {
    pending: Mutex<VecDeque<ChangeEvent>>,
    capacity: usize,
}

impl EchoFilter {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record an event about to be published.
    pub fn remember(&self, event: &ChangeEvent) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.len() == self.capacity {
            pending.pop_front();
        }
        pending.push_back(event.clone());
    }

    /// Consume one remembered copy of `event`. `true` means it is our own echo.
    pub fn take(&self, event: &ChangeEvent) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.iter().position(|e| e == event) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EchoFilter {
    fn default() -> Self {
        Self::new(ECHO_CAPACITY)
    }
}
