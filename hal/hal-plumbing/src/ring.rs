//! Lock-protected timestamped circular buffer.

use std::collections::VecDeque;
use std::sync::Mutex;

use hal_types::Timestamp;

/// A mutex-protected, fixed-capacity ring of timestamped values.
///
/// One producer thread pushes samples while a consumer thread queries
/// them; when full, the oldest entry is evicted. Software sensor nodes
/// keep one ring per non-trigger dependency and look values up by
/// timestamp when their own computation runs.
///
/// Readings are expected to arrive in timestamp order (a sensor stream
/// is monotonic); [`TimedRing::latest_at_or_before`] relies on it.
///
/// # Example
///
/// ```
/// use hal_plumbing::TimedRing;
/// use hal_types::Timestamp;
///
/// let ring: TimedRing<[f32; 3]> = TimedRing::new(16);
/// ring.push(Timestamp::from_nanos(100), [1.0, 0.0, 0.0]);
/// ring.push(Timestamp::from_nanos(200), [2.0, 0.0, 0.0]);
///
/// let (ts, v) = ring.latest().unwrap();
/// assert_eq!(ts, Timestamp::from_nanos(200));
/// assert_eq!(v[0], 2.0);
/// ```
#[derive(Debug)]
pub struct TimedRing<T> {
    capacity: usize,
    entries: Mutex<VecDeque<(Timestamp, T)>>,
}

impl<T: Clone> TimedRing<T> {
    /// Creates a ring with the given capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Returns the ring capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Checks whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pushes an entry, evicting the oldest when at capacity.
    pub fn push(&self, timestamp: Timestamp, value: T) {
        let mut entries = self.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back((timestamp, value));
    }

    /// Returns the newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<(Timestamp, T)> {
        self.lock().back().cloned()
    }

    /// Returns the newest entry at or before the given timestamp.
    ///
    /// This is the dependency-synchronization query: "what did this
    /// producer report as of time `ts`". Returns `None` when every
    /// buffered entry is newer than `ts`, or the ring is empty.
    #[must_use]
    pub fn latest_at_or_before(&self, ts: Timestamp) -> Option<(Timestamp, T)> {
        let entries = self.lock();
        // Entries are in arrival (timestamp) order; scan from the back.
        entries
            .iter()
            .rev()
            .find(|(t, _)| *t <= ts)
            .cloned()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Removes entries older than the given timestamp.
    pub fn drop_before(&self, ts: Timestamp) {
        let mut entries = self.lock();
        while let Some((t, _)) = entries.front() {
            if *t < ts {
                entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<(Timestamp, T)>> {
        // A poisoned ring only means a producer died mid-push; the data
        // is a queue of Copy-ish values and stays structurally valid.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn push_and_latest() {
        let ring: TimedRing<f32> = TimedRing::new(4);
        assert!(ring.is_empty());
        assert!(ring.latest().is_none());

        ring.push(Timestamp::from_nanos(10), 1.0);
        ring.push(Timestamp::from_nanos(20), 2.0);

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.latest(), Some((Timestamp::from_nanos(20), 2.0)));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let ring: TimedRing<u32> = TimedRing::new(3);
        for i in 0..5u32 {
            ring.push(Timestamp::from_nanos(u64::from(i) * 10), i);
        }
        assert_eq!(ring.len(), 3);
        // 0 and 1 were evicted.
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(15)),
            None
        );
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(25)),
            Some((Timestamp::from_nanos(20), 2))
        );
    }

    #[test]
    fn zero_capacity_clamps_to_one() {
        let ring: TimedRing<u32> = TimedRing::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.push(Timestamp::from_nanos(1), 1);
        ring.push(Timestamp::from_nanos(2), 2);
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.latest(), Some((Timestamp::from_nanos(2), 2)));
    }

    #[test]
    fn latest_at_or_before_exact_and_between() {
        let ring: TimedRing<u32> = TimedRing::new(8);
        ring.push(Timestamp::from_nanos(100), 1);
        ring.push(Timestamp::from_nanos(200), 2);
        ring.push(Timestamp::from_nanos(300), 3);

        // Exact match.
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(200)),
            Some((Timestamp::from_nanos(200), 2))
        );
        // Between entries: nearest before wins.
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(250)),
            Some((Timestamp::from_nanos(200), 2))
        );
        // Before everything.
        assert_eq!(ring.latest_at_or_before(Timestamp::from_nanos(50)), None);
        // After everything.
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(999)),
            Some((Timestamp::from_nanos(300), 3))
        );
    }

    #[test]
    fn drop_before() {
        let ring: TimedRing<u32> = TimedRing::new(8);
        for i in 1..=5u64 {
            #[allow(clippy::cast_possible_truncation)]
            ring.push(Timestamp::from_nanos(i * 100), i as u32);
        }
        ring.drop_before(Timestamp::from_nanos(300));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.latest_at_or_before(Timestamp::from_nanos(250)), None);
    }

    #[test]
    fn shared_across_threads() {
        use std::sync::Arc;

        let ring: Arc<TimedRing<u64>> = Arc::new(TimedRing::new(64));
        let producer = Arc::clone(&ring);
        let t = std::thread::spawn(move || {
            for i in 0..50u64 {
                producer.push(Timestamp::from_nanos(i * 10), i);
            }
        });
        t.join().unwrap();
        assert_eq!(ring.len(), 50);
        assert_eq!(
            ring.latest_at_or_before(Timestamp::from_nanos(490)),
            Some((Timestamp::from_nanos(490), 49))
        );
    }
}
