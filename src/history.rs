// Fix history store
// Bounded timestamp-ordered trail, latest-fix pointer and sequence de-duplication window

use std::collections::{HashSet, VecDeque};

use crate::constants::{SEQUENCE_WINDOW, TRAIL_CAPACITY};
use crate::fix::{FixSource, LocationFix};

/// FIFO window of recently seen (source, sequence) pairs
///
/// Ordered by insertion, not by sequence value: after a reconnect the
/// durable queue can deliver older sequences behind newer ones.
#[derive(Debug, Clone)]
pub struct SequenceWindow {
    order: VecDeque<(FixSource, u64)>,
    members: HashSet<(FixSource, u64)>,
    capacity: usize,
}

impl SequenceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SequenceWindow {
            order: VecDeque::with_capacity(capacity + 1),
            members: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, source: FixSource, sequence: u64) -> bool {
        self.members.contains(&(source, sequence))
    }

    /// Remember a pair; returns false if it was already present
    pub fn record(&mut self, source: FixSource, sequence: u64) -> bool {
        if !self.members.insert((source, sequence)) {
            return false;
        }
        self.order.push_back((source, sequence));
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

/// Accepted-fix history
///
/// Invariants:
/// - `trail` is sorted ascending by timestamp and never exceeds `capacity`
/// - `latest` only ever moves forward in time
#[derive(Debug, Clone)]
pub struct FixHistoryStore {
    latest: Option<LocationFix>,
    trail: VecDeque<LocationFix>,
    capacity: usize,
    recent: SequenceWindow,
}

impl Default for FixHistoryStore {
    fn default() -> Self {
        Self::new(TRAIL_CAPACITY, SEQUENCE_WINDOW)
    }
}

impl FixHistoryStore {
    pub fn new(trail_capacity: usize, sequence_window: usize) -> Self {
        let capacity = trail_capacity.max(1);
        FixHistoryStore {
            latest: None,
            trail: VecDeque::with_capacity(capacity + 1),
            capacity,
            recent: SequenceWindow::new(sequence_window),
        }
    }

    pub fn latest(&self) -> Option<&LocationFix> {
        self.latest.as_ref()
    }

    pub fn trail(&self) -> &VecDeque<LocationFix> {
        &self.trail
    }

    /// Owned copy of the trail, oldest first
    pub fn trail_snapshot(&self) -> Vec<LocationFix> {
        self.trail.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn recent_sequences(&self) -> &SequenceWindow {
        &self.recent
    }

    pub fn has_seen(&self, source: FixSource, sequence: u64) -> bool {
        self.recent.contains(source, sequence)
    }

    pub fn record_sequence(&mut self, source: FixSource, sequence: u64) -> bool {
        self.recent.record(source, sequence)
    }

    /// Insert at the timestamp-ordered position, then evict the oldest overflow
    ///
    /// Returns false if the fix did not survive: either an identical
    /// (source, sequence, timestamp) entry is already present, or the fix is
    /// older than everything retained in a full trail.
    pub fn insert(&mut self, fix: LocationFix) -> bool {
        // Equal timestamps keep arrival order
        let idx = self.trail.partition_point(|f| f.timestamp <= fix.timestamp);

        let already_present = self
            .trail
            .range(..idx)
            .rev()
            .take_while(|f| f.timestamp == fix.timestamp)
            .any(|f| f.key() == fix.key());
        if already_present {
            return false;
        }

        let evicts_itself = self.trail.len() >= self.capacity && idx == 0;
        if evicts_itself {
            return false;
        }

        self.trail.insert(idx, fix);
        while self.trail.len() > self.capacity {
            self.trail.pop_front();
        }
        true
    }

    /// Replace `latest` only with a strictly newer fix
    pub fn update_latest_if_newer(&mut self, fix: &LocationFix) -> bool {
        let newer = match &self.latest {
            None => true,
            Some(current) => fix.timestamp > current.timestamp,
        };
        if newer {
            self.latest = Some(fix.clone());
        }
        newer
    }

    pub fn reset(&mut self) {
        self.latest = None;
        self.trail.clear();
        self.recent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fix::test_support::fix_at;

    fn is_sorted(store: &FixHistoryStore) -> bool {
        store
            .trail()
            .iter()
            .zip(store.trail().iter().skip(1))
            .all(|(a, b)| a.timestamp <= b.timestamp)
    }

    #[test]
    fn test_sequence_window_evicts_oldest_insertion() {
        let mut w = SequenceWindow::new(3);
        assert!(w.record(FixSource::SensorDevice, 10));
        assert!(w.record(FixSource::SensorDevice, 2));
        assert!(w.record(FixSource::SensorDevice, 7));
        assert!(!w.record(FixSource::SensorDevice, 2));
        assert_eq!(w.len(), 3);

        // Evicts 10 (first inserted), not 2 (smallest)
        assert!(w.record(FixSource::SensorDevice, 11));
        assert!(!w.contains(FixSource::SensorDevice, 10));
        assert!(w.contains(FixSource::SensorDevice, 2));
        assert!(w.contains(FixSource::SensorDevice, 11));
    }

    #[test]
    fn test_sequence_window_keys_by_source() {
        let mut w = SequenceWindow::new(10);
        w.record(FixSource::SensorDevice, 5);
        assert!(!w.contains(FixSource::DisplayDevice, 5));
        assert!(w.record(FixSource::DisplayDevice, 5));
    }

    #[test]
    fn test_insert_keeps_timestamp_order() {
        let mut store = FixHistoryStore::new(100, 150);
        // Arrival order scrambled, e.g. queued batch landing behind live sends
        for (seq, secs) in [(3, 3.0), (1, 1.0), (5, 5.0), (2, 2.0), (4, 4.0), (0, 0.0)] {
            assert!(store.insert(fix_at(seq, secs, 37.0, -122.0)));
            assert!(is_sorted(&store));
        }
        let seqs: Vec<u64> = store.trail().iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_trail_bounded_to_most_recent() {
        let mut store = FixHistoryStore::new(5, 150);
        // Descending then ascending arrivals
        for i in (0..10).rev().chain(10..15) {
            store.insert(fix_at(i, i as f64, 37.0, -122.0));
            assert!(store.trail().len() <= 5);
            assert!(is_sorted(&store));
        }
        let seqs: Vec<u64> = store.trail().iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_insert_older_than_full_trail_is_dropped() {
        let mut store = FixHistoryStore::new(3, 150);
        for i in 10..13 {
            store.insert(fix_at(i, i as f64, 37.0, -122.0));
        }
        assert!(!store.insert(fix_at(1, 1.0, 37.0, -122.0)));
        assert_eq!(store.trail().front().map(|f| f.sequence), Some(10));
    }

    #[test]
    fn test_insert_same_fix_twice_is_idempotent() {
        let mut store = FixHistoryStore::default();
        assert!(store.insert(fix_at(1, 1.0, 37.0, -122.0)));
        assert!(!store.insert(fix_at(1, 1.0, 37.0, -122.0)));
        assert_eq!(store.trail().len(), 1);

        // Same timestamp, different sequence is a distinct fix
        assert!(store.insert(fix_at(2, 1.0, 37.0, -122.0)));
        assert_eq!(store.trail().len(), 2);
    }

    #[test]
    fn test_latest_is_monotonic() {
        let mut store = FixHistoryStore::default();
        let order = [5.0, 2.0, 7.0, 7.0, 1.0, 9.0, 8.0];
        let mut prev: Option<f64> = None;
        for (i, secs) in order.iter().enumerate() {
            store.update_latest_if_newer(&fix_at(i as u64, *secs, 37.0, -122.0));
            let ts = store.latest().unwrap().timestamp.timestamp_micros() as f64;
            if let Some(p) = prev {
                assert!(ts >= p);
            }
            prev = Some(ts);
        }
        assert_eq!(store.latest().unwrap().sequence, 5); // t=9
    }

    #[test]
    fn test_equal_timestamp_does_not_replace_latest() {
        let mut store = FixHistoryStore::default();
        assert!(store.update_latest_if_newer(&fix_at(1, 4.0, 37.0, -122.0)));
        assert!(!store.update_latest_if_newer(&fix_at(2, 4.0, 37.0, -122.0)));
        assert_eq!(store.latest().unwrap().sequence, 1);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut store = FixHistoryStore::default();
        let f = fix_at(1, 1.0, 37.0, -122.0);
        store.record_sequence(f.source, f.sequence);
        store.insert(f.clone());
        store.update_latest_if_newer(&f);

        store.reset();
        assert!(store.latest().is_none());
        assert!(store.trail().is_empty());
        assert!(store.recent_sequences().is_empty());
        assert!(!store.has_seen(f.source, f.sequence));
    }
}
