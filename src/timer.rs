use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Deadlines keyed by handle, each carrying a payload `K`.
#[derive(Debug)]
pub struct TimerQueue<K> {
    next_handle: u64,
    timers: HashMap<TimerHandle, (Instant, K)>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self { next_handle: 1, timers: HashMap::new() }
    }
}

impl<K> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, now: Instant, after: Duration, payload: K) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.timers.insert(handle, (now + after, payload));
        handle
    }

    /// Returns the payload if the timer was still armed.
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<K> {
        self.timers.remove(&handle).map(|(_, payload)| payload)
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|(deadline, _)| *deadline).min()
    }

    /// Removes and returns all timers due at `now`, earliest first.
    pub fn expire(&mut self, now: Instant) -> Vec<(TimerHandle, K)> {
        let mut due: Vec<TimerHandle> = self
            .timers
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(handle, _)| *handle)
            .collect();
        due.sort_by_key(|handle| (self.timers[handle].0, *handle));
        due.into_iter()
            .filter_map(|handle| self.timers.remove(&handle).map(|(_, payload)| (handle, payload)))
            .collect()
    }
}
