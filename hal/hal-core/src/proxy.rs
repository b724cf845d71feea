//! Per-channel sample routing and decimation.
//!
//! A sensor streams at one physical rate but may feed several consumer
//! channels (the framework event queue plus direct-report channels),
//! each at its own requested rate. [`ProxyManager`] decides which
//! channels receive each sample, decimating independently per
//! (sensor, channel) pair. Rate changes are timestamp-gated: a switch
//! record takes effect only once a sample timestamp passes it, so no
//! reader ever observes a rate change "in the past".

use std::collections::VecDeque;
use std::sync::Mutex;

use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use hal_types::{Duration, SensorHandle, Timestamp};

/// Channel id of the framework's logical event queue.
pub const FRAMEWORK_CHANNEL: u32 = 0;

#[derive(Debug, Default)]
struct ProxyEntry {
    pollrate: Duration,
    divisor: u32,
    counter: u32,
    pending: VecDeque<(Timestamp, Duration)>,
}

#[derive(Debug, Default)]
struct Inner {
    by_sensor: HashMap<u32, HashSet<u32>>,
    by_channel: HashMap<u32, HashSet<u32>>,
    entries: HashMap<(u32, u32), ProxyEntry>,
}

/// Routes each sample to the subset of channels due to receive it.
#[derive(Debug, Default)]
pub struct ProxyManager {
    inner: Mutex<Inner>,
}

impl ProxyManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sensor to a channel, creating the pair's entry.
    pub fn register(&self, sensor: SensorHandle, channel: u32) {
        let mut inner = self.lock();
        let s = sensor.as_raw();
        inner.by_sensor.entry(s).or_default().insert(channel);
        inner.by_channel.entry(channel).or_default().insert(s);
        inner.entries.entry((s, channel)).or_default();
    }

    /// Unregisters a sensor from a channel, dropping the pair's entry.
    pub fn unregister(&self, sensor: SensorHandle, channel: u32) {
        let mut inner = self.lock();
        let s = sensor.as_raw();
        let sensor_emptied = inner.by_sensor.get_mut(&s).is_some_and(|channels| {
            channels.remove(&channel);
            channels.is_empty()
        });
        if sensor_emptied {
            inner.by_sensor.remove(&s);
        }
        let channel_emptied = inner.by_channel.get_mut(&channel).is_some_and(|sensors| {
            sensors.remove(&s);
            sensors.is_empty()
        });
        if channel_emptied {
            inner.by_channel.remove(&channel);
        }
        inner.entries.remove(&(s, channel));
    }

    /// Checks whether a sensor is registered to a channel.
    #[must_use]
    pub fn is_registered(&self, sensor: SensorHandle, channel: u32) -> bool {
        self.lock()
            .entries
            .contains_key(&(sensor.as_raw(), channel))
    }

    /// Requests a new pollrate for a (sensor, channel) pair.
    ///
    /// Appends a timestamp-gated switch record; the current rate is
    /// never mutated synchronously. Unregistered pairs are ignored.
    pub fn configure(
        &self,
        sensor: SensorHandle,
        channel: u32,
        at: Timestamp,
        pollrate: Duration,
    ) {
        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(&(sensor.as_raw(), channel)) {
            entry.pending.push_back((at, pollrate));
        }
    }

    /// Returns the channels due to receive a sample at `ts`.
    ///
    /// For each channel bound to the sensor: commits every pending
    /// switch record whose timestamp has passed, recomputes the
    /// decimation divisor against the hardware pollrate, and emits the
    /// channel when its counter reaches the divisor. A divisor change
    /// primes the counter so the very next sample is delivered
    /// immediately rather than after a full decimation period.
    #[must_use]
    pub fn valid_push_channels(
        &self,
        ts: Timestamp,
        sensor: SensorHandle,
        hw_pollrate: Duration,
    ) -> SmallVec<[u32; 4]> {
        let mut inner = self.lock();
        let s = sensor.as_raw();
        let Some(channels) = inner.by_sensor.get(&s).cloned() else {
            return SmallVec::new();
        };

        let mut due = SmallVec::new();
        let mut sorted: Vec<u32> = channels.into_iter().collect();
        sorted.sort_unstable();

        for channel in sorted {
            let Some(entry) = inner.entries.get_mut(&(s, channel)) else {
                continue;
            };

            while let Some((at, rate)) = entry.pending.front().copied() {
                if at <= ts {
                    entry.pollrate = rate;
                    entry.pending.pop_front();
                } else {
                    break;
                }
            }

            let divisor = if entry.pollrate.is_zero() {
                1
            } else {
                entry.pollrate.decimation_factor(hw_pollrate)
            };
            if divisor != entry.divisor {
                entry.divisor = divisor;
                entry.counter = divisor.saturating_sub(1);
            }

            entry.counter += 1;
            if entry.counter >= entry.divisor {
                entry.counter = 0;
                due.push(channel);
            }
        }

        due
    }

    /// Returns the fastest pollrate requested across a sensor's channels.
    ///
    /// This is the single physical rate to configure on the hardware:
    /// the minimum nonzero period wins. Returns [`Duration::zero`] when
    /// no channel has requested a rate.
    #[must_use]
    pub fn max_pollrate(&self, sensor: SensorHandle) -> Duration {
        let inner = self.lock();
        let s = sensor.as_raw();
        let Some(channels) = inner.by_sensor.get(&s) else {
            return Duration::zero();
        };

        let mut fastest = Duration::zero();
        for channel in channels {
            if let Some(entry) = inner.entries.get(&(s, *channel)) {
                // The requested rate is the last pending record if any,
                // else the committed one.
                let requested = entry
                    .pending
                    .back()
                    .map_or(entry.pollrate, |(_, rate)| *rate);
                fastest = fastest.min_nonzero(requested);
            }
        }
        fastest
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn h(raw: u32) -> SensorHandle {
        SensorHandle::from_raw(raw)
    }

    #[test]
    fn register_unregister() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        assert!(proxy.is_registered(h(1), FRAMEWORK_CHANNEL));

        proxy.unregister(h(1), FRAMEWORK_CHANNEL);
        assert!(!proxy.is_registered(h(1), FRAMEWORK_CHANNEL));
        assert!(proxy
            .valid_push_channels(Timestamp::zero(), h(1), Duration::from_hz(100.0))
            .is_empty());
    }

    #[test]
    fn unconfigured_channel_receives_everything() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);

        for i in 0..5u64 {
            let due = proxy.valid_push_channels(
                Timestamp::from_nanos(i * 10),
                h(1),
                Duration::from_hz(100.0),
            );
            assert_eq!(due.as_slice(), &[FRAMEWORK_CHANNEL]);
        }
    }

    #[test]
    fn decimation_emits_every_nth() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        // Channel wants 100Hz from a 400Hz stream: divisor 4.
        proxy.configure(
            h(1),
            FRAMEWORK_CHANNEL,
            Timestamp::zero(),
            Duration::from_hz(100.0),
        );

        let hw = Duration::from_hz(400.0);
        let mut emitted = Vec::new();
        for i in 0..12u64 {
            let due = proxy.valid_push_channels(Timestamp::from_nanos(i + 1), h(1), hw);
            emitted.push(!due.is_empty());
        }

        // First sample after the rate switch is immediate, then every 4th.
        assert!(emitted[0]);
        let delivered: Vec<usize> = emitted
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.then_some(i))
            .collect();
        assert_eq!(delivered, vec![0, 4, 8]);
    }

    #[test]
    fn rate_switch_is_timestamp_gated() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        proxy.configure(
            h(1),
            FRAMEWORK_CHANNEL,
            Timestamp::from_nanos(1_000),
            Duration::from_hz(100.0),
        );

        let hw = Duration::from_hz(400.0);
        // Before the switch timestamp: unconfigured, everything passes.
        assert!(!proxy
            .valid_push_channels(Timestamp::from_nanos(500), h(1), hw)
            .is_empty());
        assert!(!proxy
            .valid_push_channels(Timestamp::from_nanos(999), h(1), hw)
            .is_empty());

        // At the switch: divisor becomes 4, first sample immediate.
        assert!(!proxy
            .valid_push_channels(Timestamp::from_nanos(1_000), h(1), hw)
            .is_empty());
        // Then three skipped.
        for i in 1..4u64 {
            assert!(proxy
                .valid_push_channels(Timestamp::from_nanos(1_000 + i), h(1), hw)
                .is_empty());
        }
        assert!(!proxy
            .valid_push_channels(Timestamp::from_nanos(1_004), h(1), hw)
            .is_empty());
    }

    #[test]
    fn channels_decimate_independently() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        proxy.register(h(1), 7);
        proxy.configure(
            h(1),
            FRAMEWORK_CHANNEL,
            Timestamp::zero(),
            Duration::from_hz(200.0),
        );
        proxy.configure(h(1), 7, Timestamp::zero(), Duration::from_hz(100.0));

        let hw = Duration::from_hz(400.0);
        let mut framework = 0;
        let mut direct = 0;
        for i in 0..16u64 {
            let due = proxy.valid_push_channels(Timestamp::from_nanos(i + 1), h(1), hw);
            if due.contains(&FRAMEWORK_CHANNEL) {
                framework += 1;
            }
            if due.contains(&7) {
                direct += 1;
            }
        }
        // 16 samples: framework at /2 sees ~8, direct at /4 sees ~4.
        assert_eq!(framework, 8);
        assert_eq!(direct, 4);
    }

    #[test]
    fn max_pollrate_fastest_wins() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        proxy.register(h(1), 7);

        assert_eq!(proxy.max_pollrate(h(1)), Duration::zero());

        proxy.configure(
            h(1),
            FRAMEWORK_CHANNEL,
            Timestamp::zero(),
            Duration::from_hz(50.0),
        );
        proxy.configure(h(1), 7, Timestamp::zero(), Duration::from_hz(200.0));

        // 200Hz (5ms period) beats 50Hz (20ms period).
        assert_eq!(proxy.max_pollrate(h(1)), Duration::from_hz(200.0));
    }

    #[test]
    fn never_emits_faster_than_hardware() {
        let proxy = ProxyManager::new();
        proxy.register(h(1), FRAMEWORK_CHANNEL);
        // Channel asks for 800Hz from a 400Hz stream.
        proxy.configure(
            h(1),
            FRAMEWORK_CHANNEL,
            Timestamp::zero(),
            Duration::from_hz(800.0),
        );

        let hw = Duration::from_hz(400.0);
        let mut count = 0;
        for i in 0..10u64 {
            if !proxy
                .valid_push_channels(Timestamp::from_nanos(i + 1), h(1), hw)
                .is_empty()
            {
                count += 1;
            }
        }
        // One emission per hardware sample, no more.
        assert_eq!(count, 10);
    }
}
