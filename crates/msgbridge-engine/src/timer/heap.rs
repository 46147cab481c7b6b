//! BinaryHeap timer backend
//!
//! Min-heap ordered by deadline with lazy cancellation: cancelled handles
//! go into a set and are skipped when popped. The set is cleared whenever
//! the heap drains.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::{ExpiredTimer, TimerBackend, TimerEntry, TimerHandle};

struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: earliest deadline at the top, ties by handle
        other
            .0
            .deadline
            .cmp(&self.0.deadline)
            .then_with(|| other.0.handle.0.cmp(&self.0.handle.0))
    }
}

#[derive(Default)]
struct HeapInner {
    heap: BinaryHeap<HeapEntry>,
    cancelled: HashSet<TimerHandle>,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

/// Statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct HeapTimerStats {
    /// Entries in the heap, including lazily cancelled ones
    pub active: usize,
    /// Cancelled handles not yet popped
    pub pending_cancellations: usize,
    /// Entries ever inserted
    pub total_inserted: u64,
    /// Entries that expired uncancelled
    pub total_fired: u64,
    /// Successful cancellations
    pub total_cancelled: u64,
}

/// Heap-based timer backend
#[derive(Default)]
pub struct HeapTimerBackend {
    inner: Mutex<HeapInner>,
}

impl HeapTimerBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeapInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> HeapTimerStats {
        let inner = self.lock();
        HeapTimerStats {
            active: inner.heap.len(),
            pending_cancellations: inner.cancelled.len(),
            total_inserted: inner.total_inserted,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        let mut inner = self.lock();
        inner.heap.push(HeapEntry(entry));
        inner.total_inserted += 1;
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.lock();
        let inserted = inner.cancelled.insert(handle);
        if inserted {
            inner.total_cancelled += 1;
        }
        inserted
    }

    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer> {
        let mut inner = self.lock();
        let mut expired = Vec::new();

        while inner.heap.peek().is_some_and(|top| top.0.deadline <= now) {
            let Some(HeapEntry(entry)) = inner.heap.pop() else {
                break;
            };
            if inner.cancelled.remove(&entry.handle) {
                continue;
            }
            inner.total_fired += 1;
            expired.push(ExpiredTimer {
                target: entry.target,
                generation: entry.generation,
            });
        }

        if inner.heap.is_empty() {
            inner.cancelled.clear();
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.lock();
        // Drop cancelled entries sitting at the top
        loop {
            let top = inner.heap.peek().map(|e| (e.0.handle, e.0.deadline));
            match top {
                Some((handle, _)) if inner.cancelled.contains(&handle) => {
                    inner.heap.pop();
                    inner.cancelled.remove(&handle);
                }
                Some((_, deadline)) => return Some(deadline),
                None => {
                    inner.cancelled.clear();
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::time::Duration;

    fn entry(deadline: Instant, generation: u64) -> TimerEntry {
        TimerEntry {
            handle: TimerHandle::next(),
            deadline,
            target: Weak::new(),
            generation,
        }
    }

    #[test]
    fn test_expires_in_deadline_order() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        backend.insert(entry(now + Duration::from_millis(30), 3));
        backend.insert(entry(now + Duration::from_millis(10), 1));
        backend.insert(entry(now + Duration::from_millis(20), 2));

        assert!(backend.poll_expired(now).is_empty());
        let fired = backend.poll_expired(now + Duration::from_millis(25));
        let gens: Vec<u64> = fired.iter().map(|e| e.generation).collect();
        assert_eq!(gens, vec![1, 2]);
        assert_eq!(backend.next_deadline(), Some(now + Duration::from_millis(30)));
    }

    #[test]
    fn test_cancelled_entries_are_skipped() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let early = backend.insert(entry(now + Duration::from_millis(5), 1));
        backend.insert(entry(now + Duration::from_millis(50), 2));

        assert!(backend.cancel(early));
        assert!(!backend.cancel(early));
        assert_eq!(backend.next_deadline(), Some(now + Duration::from_millis(50)));

        let fired = backend.poll_expired(now + Duration::from_secs(1));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].generation, 2);

        let stats = backend.stats();
        assert_eq!(stats.total_inserted, 2);
        assert_eq!(stats.total_fired, 1);
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.pending_cancellations, 0);
    }
}
