//! Fixed period time bins of a single entity.
//!
//! Observations are accepted only inside the half-open window `[past, future)` of the current
//! [`Borders`]. The borders are an immutable pair swapped as a whole, so a reader never sees a
//! half-updated window. Bins live in a concurrent map keyed by their period start; each bin
//! keeps one lock per metric, so concurrent observations only contend on the same metric.
//!
//! A bin is removed and turned into a [`MetricEvent`] by exactly one [`Bucket::reset`] (or
//! [`Bucket::drain`]). The remover seals the bin under its write guard, which waits for every
//! in-flight observation holding the read guard; an observation that finds the bin sealed
//! starts over against the new borders.
//!
//! An empty bucket can be retired by its aggregator. Retirement waits for in-flight
//! observations the same way; an observation that finds the bucket retired is handed back to
//! the aggregator, which routes it to a fresh bucket.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use prometheus_client::metrics::counter::Counter;

use crate::aggregate::meter::Meter;
use crate::config::AggregationSettings;
use crate::error::{Error, Result};
use crate::event::{MetricEvent, Tags};

/// Name of the per bin observation count in derived events.
pub const COUNT_VALUE: &str = "count";

/// The acceptance window `[past, future)` of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Borders {
    pub past: DateTime<Utc>,
    pub future: DateTime<Utc>,
}

impl Borders {
    pub fn new(past: DateTime<Utc>, future: DateTime<Utc>) -> Result<Self> {
        if past > future {
            return Err(Error::Aggregation(format!(
                "borders past {past} is after future {future}"
            )));
        }
        Ok(Self { past, future })
    }

    /// The window the clock reading `now` allows: late by at most the cooldown, early by at most
    /// the future tolerance.
    pub fn around(now: DateTime<Utc>, settings: &AggregationSettings) -> Self {
        Self {
            past: now - to_delta(settings.cooldown),
            future: now + to_delta(settings.future_tolerance),
        }
    }

    /// Both borders floored to the period.
    pub fn normalize(&self, period: Duration) -> Self {
        Self {
            past: normalize(self.past, period),
            future: normalize(self.future, period),
        }
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::milliseconds(duration.as_millis() as i64)
}

fn period_millis(period: Duration) -> i64 {
    (period.as_millis() as i64).max(1)
}

fn normalize_millis(millis: i64, period_millis: i64) -> i64 {
    millis - millis.rem_euclid(period_millis)
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    // keys are floors of representable timestamps
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Floors `timestamp` to the start of its period. Idempotent.
pub fn normalize(timestamp: DateTime<Utc>, period: Duration) -> DateTime<Utc> {
    from_millis(normalize_millis(
        timestamp.timestamp_millis(),
        period_millis(period),
    ))
}

/// Counters of dropped observations, shared by the buckets of one aggregator.
#[derive(Debug, Clone, Default)]
pub struct BucketCounters {
    pub missed_past: Counter,
    pub missed_future: Counter,
}

#[derive(Debug, Default)]
struct TimeBin {
    sealed: RwLock<bool>,
    count: AtomicU64,
    meters: DashMap<String, Mutex<Meter>>,
}

impl TimeBin {
    fn observe(&self, values: &BTreeMap<String, f64>) {
        self.count.fetch_add(1, Ordering::AcqRel);
        for (name, value) in values {
            if let Some(meter) = self.meters.get(name) {
                meter.lock().add(*value);
                continue;
            }
            self.meters.entry(name.clone()).or_default().lock().add(*value);
        }
    }
}

/// Time bins of one entity (tag set).
#[derive(Debug)]
pub struct Bucket {
    tags: Tags,
    period_millis: i64,
    period: Duration,
    borders: ArcSwap<Borders>,
    bins: DashMap<i64, Arc<TimeBin>>,
    retired: RwLock<bool>,
    counters: BucketCounters,
}

impl Bucket {
    pub fn new(tags: Tags, period: Duration, borders: Borders) -> Self {
        Self::with_counters(tags, period, borders, BucketCounters::default())
    }

    pub fn with_counters(
        tags: Tags,
        period: Duration,
        borders: Borders,
        counters: BucketCounters,
    ) -> Self {
        Self {
            tags,
            period_millis: period_millis(period),
            period,
            borders: ArcSwap::from_pointee(borders.normalize(period)),
            bins: DashMap::new(),
            retired: RwLock::new(false),
            counters,
        }
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Current (normalized) borders.
    pub fn borders(&self) -> Borders {
        **self.borders.load()
    }

    /// Adds one observation of the given metrics at `timestamp`, or counts it as missed when
    /// it falls outside the borders. Returns `false`, without counting anything, when the
    /// bucket has been retired.
    pub fn consume(&self, values: &BTreeMap<String, f64>, timestamp: DateTime<Utc>) -> bool {
        let retired = self.retired.read();
        if *retired {
            return false;
        }
        let key = normalize_millis(timestamp.timestamp_millis(), self.period_millis);
        loop {
            let borders = self.borders.load();
            if key < borders.past.timestamp_millis() {
                self.counters.missed_past.inc();
                return true;
            }
            if key >= borders.future.timestamp_millis() {
                self.counters.missed_future.inc();
                return true;
            }

            let bin = Arc::clone(self.bins.entry(key).or_default().value());
            let sealed = bin.sealed.read();
            if *sealed {
                // emitted by a concurrent reset, try again against its borders
                continue;
            }
            if key < self.borders.load().past.timestamp_millis() {
                // the borders moved after the check
                drop(sealed);
                self.discard_if_empty(key, &bin);
                self.counters.missed_past.inc();
                return true;
            }
            bin.observe(values);
            return true;
        }
    }

    // Removes a bin nobody observed into. Sealing under the write guard waits for observations
    // that passed the border check before the move.
    fn discard_if_empty(&self, key: i64, bin: &Arc<TimeBin>) {
        self.bins.remove_if(&key, |_, current| {
            if !Arc::ptr_eq(current, bin) {
                return false;
            }
            let mut sealed = current.sealed.write();
            if *sealed || current.count.load(Ordering::Acquire) > 0 {
                return false;
            }
            *sealed = true;
            true
        });
    }

    /// Marks the bucket retired if it has no open bins. A retired bucket accepts no more
    /// observations.
    pub(crate) fn retire_if_empty(&self) -> bool {
        let mut retired = self.retired.write();
        if !*retired && self.bins.is_empty() {
            *retired = true;
        }
        *retired
    }

    /// Swaps in the new borders (normalized) and emits one event per bin before the new past.
    pub fn reset(&self, next: Borders) -> Vec<MetricEvent> {
        let next = next.normalize(self.period);
        let past = next.past.timestamp_millis();
        self.borders.store(Arc::new(next));

        // collected first, removing while iterating would deadlock on the shard lock
        let expired: Vec<i64> = self
            .bins
            .iter()
            .map(|entry| *entry.key())
            .filter(|key| *key < past)
            .collect();
        self.emit(expired)
    }

    /// Emits every bin regardless of the borders, used for the final flush.
    pub fn drain(&self) -> Vec<MetricEvent> {
        let keys: Vec<i64> = self.bins.iter().map(|entry| *entry.key()).collect();
        self.emit(keys)
    }

    fn emit(&self, mut keys: Vec<i64>) -> Vec<MetricEvent> {
        keys.sort_unstable();
        let mut events = Vec::with_capacity(keys.len());
        for key in keys {
            // whoever removes the bin emits it
            let Some((key, bin)) = self.bins.remove(&key) else {
                continue;
            };
            let mut sealed = bin.sealed.write();
            *sealed = true;
            if let Some(event) = self.derive(key, &bin) {
                events.push(event);
            }
        }
        events
    }

    fn derive(&self, key: i64, bin: &TimeBin) -> Option<MetricEvent> {
        let count = bin.count.load(Ordering::Acquire);
        if count == 0 {
            return None;
        }
        let mut values = BTreeMap::new();
        values.insert(COUNT_VALUE.to_string(), count as f64);
        for meter in bin.meters.iter() {
            for (field, value) in meter.value().lock().summary() {
                values.insert(format!("{}_{}", meter.key(), field), value);
            }
        }
        Some(MetricEvent {
            timestamp: from_millis(key),
            tags: self.tags.clone(),
            values,
        })
    }

    /// Number of observations in the bin containing `timestamp`, if it exists.
    pub fn count_at(&self, timestamp: DateTime<Utc>) -> Option<u64> {
        let key = normalize_millis(timestamp.timestamp_millis(), self.period_millis);
        self.bins
            .get(&key)
            .map(|bin| bin.count.load(Ordering::Acquire))
    }

    /// Number of open bins.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn missed_past_events(&self) -> u64 {
        self.counters.missed_past.get()
    }

    pub fn missed_future_events(&self) -> u64 {
        self.counters.missed_future.get()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use chrono::TimeZone;

    use super::*;

    const PERIOD: Duration = Duration::from_secs(60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap()
    }

    fn secs(s: i64) -> TimeDelta {
        TimeDelta::seconds(s)
    }

    fn tags() -> Tags {
        Tags::from([("service".to_string(), "a".to_string())])
    }

    fn latency(value: f64) -> BTreeMap<String, f64> {
        BTreeMap::from([("latency".to_string(), value)])
    }

    fn bucket() -> Bucket {
        let borders = Borders::new(t0() - secs(60), t0() + secs(300)).unwrap();
        Bucket::new(tags(), PERIOD, borders)
    }

    #[test]
    fn test_normalize_floors_and_is_idempotent() {
        let ts = t0() + secs(59) + TimeDelta::milliseconds(999);
        let normalized = normalize(ts, PERIOD);
        assert_eq!(normalized, t0());
        assert_eq!(normalize(normalized, PERIOD), normalized);
        assert_eq!(normalize(t0() + secs(60), PERIOD), t0() + secs(60));

        // before the epoch still floors towards the past
        let before_epoch = DateTime::from_timestamp(-30, 0).unwrap();
        assert_eq!(
            normalize(before_epoch, PERIOD),
            DateTime::from_timestamp(-60, 0).unwrap()
        );
    }

    #[test]
    fn test_borders_are_ordered() {
        assert!(Borders::new(t0(), t0() - secs(1)).is_err());
        assert!(Borders::new(t0(), t0()).is_ok());

        let settings = AggregationSettings::default();
        let borders = Borders::around(t0(), &settings);
        assert_eq!(borders.past, t0() - secs(60));
        assert_eq!(borders.future, t0() + secs(300));
    }

    #[test]
    fn test_consume_counts_every_observation() {
        let bucket = bucket();
        for i in 0..25 {
            bucket.consume(&latency(i as f64), t0() + secs(i % 60));
        }
        bucket.consume(&latency(1.0), t0() + secs(60));

        assert_eq!(bucket.count_at(t0()), Some(25));
        assert_eq!(bucket.count_at(t0() + secs(61)), Some(1));
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.missed_past_events(), 0);
        assert_eq!(bucket.missed_future_events(), 0);
    }

    #[test]
    fn test_out_of_window_observations_are_missed() {
        let bucket = bucket();

        bucket.consume(&latency(1.0), t0() - secs(61));
        assert_eq!(bucket.missed_past_events(), 1);
        assert!(bucket.is_empty());

        bucket.consume(&latency(1.0), t0() + secs(300));
        assert_eq!(bucket.missed_future_events(), 1);
        assert!(bucket.is_empty());

        // exactly at past is inside the window
        bucket.consume(&latency(1.0), t0() - secs(60));
        assert_eq!(bucket.count_at(t0() - secs(60)), Some(1));
        assert_eq!(bucket.missed_past_events(), 1);
    }

    #[test]
    fn test_reset_emits_bins_before_new_past_once() {
        let bucket = bucket();
        bucket.consume(&latency(10.0), t0());
        bucket.consume(&latency(30.0), t0() + secs(1));
        bucket.consume(&latency(5.0), t0() + secs(61));

        let events = bucket.reset(Borders::new(t0() + secs(60), t0() + secs(360)).unwrap());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.timestamp, t0());
        assert_eq!(event.tags, tags());
        assert_eq!(event.values[COUNT_VALUE], 2.0);
        assert_eq!(event.values["latency_count"], 2.0);
        assert_eq!(event.values["latency_sum"], 40.0);
        assert_eq!(event.values["latency_min"], 10.0);
        assert_eq!(event.values["latency_max"], 30.0);
        assert_eq!(event.values["latency_mean"], 20.0);
        assert!(event.values.contains_key("latency_p99"));
        assert_eq!(event.values.len(), 10);

        assert_eq!(bucket.count_at(t0()), None);
        assert_eq!(bucket.count_at(t0() + secs(61)), Some(1));

        // late data for the emitted bin is now missed, not re-aggregated
        bucket.consume(&latency(1.0), t0() + secs(2));
        assert_eq!(bucket.missed_past_events(), 1);

        // same past again emits nothing
        let events = bucket.reset(Borders::new(t0() + secs(60), t0() + secs(360)).unwrap());
        assert!(events.is_empty());

        let events = bucket.reset(Borders::new(t0() + secs(120), t0() + secs(420)).unwrap());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, t0() + secs(60));
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_reset_normalizes_borders() {
        let bucket = bucket();
        bucket.consume(&latency(1.0), t0());

        // past inside the bin's period keeps the bin open
        let events = bucket.reset(Borders::new(t0() + secs(59), t0() + secs(359)).unwrap());
        assert!(events.is_empty());
        assert_eq!(bucket.borders().past, t0());
        assert_eq!(bucket.borders().future, t0() + secs(300));
    }

    #[test]
    fn test_backwards_reset_does_not_panic() {
        let bucket = bucket();
        bucket.consume(&latency(1.0), t0());
        assert_eq!(
            bucket
                .reset(Borders::new(t0() + secs(60), t0() + secs(360)).unwrap())
                .len(),
            1
        );

        // the window moves back, the key is accepted and emitted again later
        bucket.reset(Borders::new(t0() - secs(60), t0() + secs(300)).unwrap());
        bucket.consume(&latency(1.0), t0());
        let events = bucket.reset(Borders::new(t0() + secs(60), t0() + secs(360)).unwrap());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values[COUNT_VALUE], 1.0);
    }

    #[test]
    fn test_retired_bucket_hands_observations_back() {
        let bucket = bucket();
        bucket.consume(&latency(1.0), t0());
        assert!(!bucket.retire_if_empty());

        bucket.reset(Borders::new(t0() + secs(60), t0() + secs(360)).unwrap());
        assert!(bucket.retire_if_empty());
        assert!(!bucket.consume(&latency(1.0), t0() + secs(60)));
        assert!(bucket.is_empty());
        assert_eq!(bucket.missed_past_events(), 0);
    }

    #[test]
    fn test_drain_emits_everything() {
        let bucket = bucket();
        bucket.consume(&latency(1.0), t0());
        bucket.consume(&latency(1.0), t0() + secs(120));
        let events = bucket.drain();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp < events[1].timestamp);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_concurrent_consume_and_reset_account_for_every_observation() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 5_000;

        let bucket = bucket();
        let done = AtomicBool::new(false);
        let emitted = std::thread::scope(|s| {
            let writers: Vec<_> = (0..WRITERS)
                .map(|w| {
                    let bucket = &bucket;
                    s.spawn(move || {
                        for i in 0..PER_WRITER {
                            let offset = ((i + w) % 240) as i64;
                            bucket.consume(&latency(i as f64), t0() + secs(offset));
                        }
                    })
                })
                .collect();
            // moves the window back and forth while the writers run
            let resetter = s.spawn(|| {
                let mut emitted = 0u64;
                let mut step = 0;
                while !done.load(Ordering::Acquire) {
                    step = (step + 1) % 4;
                    let past = t0() + secs(60 * step);
                    let borders = Borders::new(past, past + secs(300)).unwrap();
                    emitted += bucket
                        .reset(borders)
                        .iter()
                        .map(|e| e.values[COUNT_VALUE] as u64)
                        .sum::<u64>();
                    std::thread::yield_now();
                }
                emitted
            });
            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, Ordering::Release);
            resetter.join().unwrap()
        });

        // observations that lost the race against a reset leave no bin behind
        assert!(
            bucket
                .bins
                .iter()
                .all(|bin| bin.count.load(Ordering::Acquire) > 0)
        );

        let drained: u64 = bucket
            .drain()
            .iter()
            .map(|e| e.values[COUNT_VALUE] as u64)
            .sum();
        let missed = bucket.missed_past_events() + bucket.missed_future_events();
        assert_eq!(emitted + drained + missed, (WRITERS * PER_WRITER) as u64);
    }
}
