use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::aggregate::bucket::{Borders, Bucket, BucketCounters};
use crate::config::AggregationSettings;
use crate::event::{MetricEvent, Tags};
use crate::metrics::{processor_metrics, routing_key_labels};

/// Buckets of every entity (tag set) seen by one pipeline. Buckets are created lazily with
/// the borders of the last reset and retired once a reset or drain leaves them empty.
pub struct Aggregator {
    routing_key: String,
    settings: AggregationSettings,
    borders: ArcSwap<Borders>,
    buckets: DashMap<Tags, Arc<Bucket>>,
    counters: BucketCounters,
}

impl Aggregator {
    /// Creates an aggregator whose window is centered on `now`. The drop counters are the
    /// `routing_key` labelled series of the global metrics.
    pub fn new(
        routing_key: impl Into<String>,
        settings: AggregationSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let routing_key = routing_key.into();
        let labels = routing_key_labels(&routing_key);
        let metrics = processor_metrics();
        let counters = BucketCounters {
            missed_past: metrics.missed_past_events.get_or_create(&labels).clone(),
            missed_future: metrics.missed_future_events.get_or_create(&labels).clone(),
        };
        let borders = Borders::around(now, &settings).normalize(settings.period);
        Self {
            routing_key,
            settings,
            borders: ArcSwap::from_pointee(borders),
            buckets: DashMap::new(),
            counters,
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn settings(&self) -> &AggregationSettings {
        &self.settings
    }

    pub fn borders(&self) -> Borders {
        **self.borders.load()
    }

    /// Adds the event's values to the bucket of its tag set.
    pub fn consume(&self, event: &MetricEvent) {
        // a retired bucket is already out of the map, the next lookup creates a fresh one
        while !self.bucket(&event.tags).consume(&event.values, event.timestamp) {}
    }

    fn bucket(&self, tags: &Tags) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get(tags) {
            return Arc::clone(bucket.value());
        }
        Arc::clone(
            self.buckets
                .entry(tags.clone())
                .or_insert_with(|| {
                    debug!(routing_key = %self.routing_key, ?tags, "New aggregation bucket");
                    Arc::new(Bucket::with_counters(
                        tags.clone(),
                        self.settings.period,
                        self.borders(),
                        self.counters.clone(),
                    ))
                })
                .value(),
        )
    }

    /// Moves every bucket to the new borders and returns the events of the closed bins.
    pub fn reset(&self, next: Borders) -> Vec<MetricEvent> {
        self.borders.store(Arc::new(next.normalize(self.settings.period)));
        let buckets = self.snapshot();
        let events: Vec<MetricEvent> = buckets.iter().flat_map(|b| b.reset(next)).collect();
        self.retire_empty(&buckets);
        self.record_emitted(&events);
        events
    }

    /// Emits every open bin of every bucket.
    pub fn drain(&self) -> Vec<MetricEvent> {
        let buckets = self.snapshot();
        let events: Vec<MetricEvent> = buckets.iter().flat_map(|b| b.drain()).collect();
        self.retire_empty(&buckets);
        self.record_emitted(&events);
        events
    }

    // Retirement runs under the map's shard guard, so a consume either finds the bucket retired
    // and looks it up again or is counted before the bucket is checked for emptiness.
    fn retire_empty(&self, buckets: &[Arc<Bucket>]) {
        let mut retired = 0;
        for bucket in buckets.iter().filter(|b| b.is_empty()) {
            let removed = self.buckets.remove_if(bucket.tags(), |_, current| {
                Arc::ptr_eq(current, bucket) && current.retire_if_empty()
            });
            if removed.is_some() {
                retired += 1;
            }
        }
        if retired > 0 {
            debug!(routing_key = %self.routing_key, retired, "Retired idle aggregation buckets");
        }
    }

    /// Number of entities seen.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn missed_past_events(&self) -> u64 {
        self.counters.missed_past.get()
    }

    pub fn missed_future_events(&self) -> u64 {
        self.counters.missed_future.get()
    }

    // the map is not locked while buckets emit
    fn snapshot(&self) -> Vec<Arc<Bucket>> {
        self.buckets
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    fn record_emitted(&self, events: &[MetricEvent]) {
        if events.is_empty() {
            return;
        }
        processor_metrics()
            .derived_events
            .get_or_create(&routing_key_labels(&self.routing_key))
            .inc_by(events.len() as u64);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::aggregate::bucket::COUNT_VALUE;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap()
    }

    fn event(service: &str, at: DateTime<Utc>, latency: f64) -> MetricEvent {
        MetricEvent {
            timestamp: at,
            tags: Tags::from([("service".to_string(), service.to_string())]),
            values: BTreeMap::from([("latency".to_string(), latency)]),
        }
    }

    fn settings() -> AggregationSettings {
        AggregationSettings {
            period: Duration::from_secs(60),
            cooldown: Duration::from_secs(60),
            future_tolerance: Duration::from_secs(300),
            ..Default::default()
        }
    }

    #[test]
    fn test_window_scenario() {
        // created at t0 + 30s, the window is [t0 - 60s, t0 + 300s)
        let aggregator = Aggregator::new("app-events.agg.window", settings(), t0() + TimeDelta::seconds(30));
        assert_eq!(aggregator.borders().past, t0() - TimeDelta::seconds(60));

        let t = t0();
        aggregator.consume(&event("a", t, 10.0));
        aggregator.consume(&event("a", t + TimeDelta::seconds(1), 20.0));
        aggregator.consume(&event("a", t + TimeDelta::seconds(61), 30.0));

        let next = Borders::new(t + TimeDelta::seconds(60), t + TimeDelta::seconds(360)).unwrap();
        let events = aggregator.reset(next);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, t);
        assert_eq!(events[0].tags["service"], "a");
        assert_eq!(events[0].values[COUNT_VALUE], 2.0);
        assert_eq!(events[0].values["latency_sum"], 30.0);

        let rest = aggregator.drain();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].timestamp, t + TimeDelta::seconds(60));
        assert_eq!(rest[0].values[COUNT_VALUE], 1.0);
    }

    #[test]
    fn test_entities_are_aggregated_separately() {
        let aggregator = Aggregator::new("app-events.agg.entities", settings(), t0());
        aggregator.consume(&event("a", t0(), 1.0));
        aggregator.consume(&event("b", t0(), 1.0));
        aggregator.consume(&event("b", t0(), 1.0));
        assert_eq!(aggregator.bucket_count(), 2);

        let mut events = aggregator.drain();
        events.sort_by(|l, r| l.tags.cmp(&r.tags));
        let counts: Vec<f64> = events.iter().map(|e| e.values[COUNT_VALUE]).collect();
        assert_eq!(counts, vec![1.0, 2.0]);
    }

    #[test]
    fn test_idle_buckets_are_retired() {
        let aggregator = Aggregator::new("app-events.agg.retire", settings(), t0());
        for i in 0..1000 {
            aggregator.consume(&event(&format!("host-{i}"), t0(), 1.0));
        }
        assert_eq!(aggregator.bucket_count(), 1000);

        let past = t0() + TimeDelta::hours(1);
        let events = aggregator.reset(Borders::new(past, past + TimeDelta::seconds(300)).unwrap());
        assert_eq!(events.len(), 1000);
        assert_eq!(aggregator.bucket_count(), 0);

        // a returning entity gets a fresh bucket
        aggregator.consume(&event("host-0", past, 2.0));
        assert_eq!(aggregator.bucket_count(), 1);
        let events = aggregator.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].values["latency_sum"], 2.0);
        assert_eq!(aggregator.bucket_count(), 0);
    }

    #[test]
    fn test_consume_racing_retirement_is_accounted() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 2_000;

        let aggregator = Aggregator::new("app-events.agg.retire-race", settings(), t0());
        let done = AtomicBool::new(false);
        let emitted = std::thread::scope(|s| {
            let writers: Vec<_> = (0..WRITERS)
                .map(|w| {
                    let aggregator = &aggregator;
                    s.spawn(move || {
                        for i in 0..PER_WRITER {
                            let service = format!("svc-{}", i % 16);
                            let at = t0() + TimeDelta::seconds(((i + w) % 240) as i64);
                            aggregator.consume(&event(&service, at, 1.0));
                        }
                    })
                })
                .collect();
            // moves the window back and forth, emptying and retiring buckets
            let resetter = s.spawn(|| {
                let mut emitted = 0u64;
                let mut step = 0;
                while !done.load(Ordering::Acquire) {
                    step = (step + 1) % 5;
                    let past = t0() + TimeDelta::seconds(60 * step);
                    let borders = Borders::new(past, past + TimeDelta::seconds(300)).unwrap();
                    emitted += aggregator
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

        let drained: u64 = aggregator
            .drain()
            .iter()
            .map(|e| e.values[COUNT_VALUE] as u64)
            .sum();
        let missed = aggregator.missed_past_events() + aggregator.missed_future_events();
        assert_eq!(emitted + drained + missed, (WRITERS * PER_WRITER) as u64);
        assert_eq!(aggregator.bucket_count(), 0);
    }

    #[test]
    fn test_buckets_created_after_reset_use_new_borders() {
        let aggregator = Aggregator::new("app-events.agg.late-bucket", settings(), t0());
        let next = Borders::new(t0() + TimeDelta::seconds(120), t0() + TimeDelta::seconds(420)).unwrap();
        aggregator.reset(next);

        aggregator.consume(&event("new", t0(), 1.0));
        assert_eq!(aggregator.missed_past_events(), 1);
        aggregator.consume(&event("new", t0() + TimeDelta::seconds(600), 1.0));
        assert_eq!(aggregator.missed_future_events(), 1);
        assert!(aggregator.drain().is_empty());
    }
}
