//! The ledger keeps, per owned topic-partition, the assignment generation under which it is held
//! and how far it has been read, processed and committed. It is shared between the poll loop
//! (which assigns, revokes, reads and commits) and the processor hosts (which mark processed
//! offsets once a batch has been handed to the processor).
//!
//! A partition that is revoked and assigned again gets a new generation, so anything read under
//! the previous generation can be told apart and is never committed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::record::{TopicPartition, TopicPartitionOffset};

/// Assignment generation, bumped on every rebalance that assigns partitions.
pub type Generation = u64;

#[derive(Debug, Clone, Default)]
struct PartitionEntry {
    generation: Generation,
    last_read: Option<i64>,
    last_processed: Option<i64>,
    /// next offset to read that the broker has acknowledged.
    committed: Option<i64>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    generation: AtomicU64,
    // It is okay to use a sync mutex because none of the critical sections await.
    partitions: Mutex<HashMap<TopicPartition, PartitionEntry>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current (latest) assignment generation.
    pub fn generation(&self) -> Generation {
        self.generation.load(Ordering::Acquire)
    }

    /// Takes ownership of the given partitions under a new generation and returns it.
    pub fn assign(&self, partitions: &[TopicPartition]) -> Generation {
        let mut entries = self.partitions.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        for tp in partitions {
            entries.insert(
                tp.clone(),
                PartitionEntry {
                    generation,
                    ..Default::default()
                },
            );
        }
        generation
    }

    /// Drops ownership of the given partitions.
    pub fn revoke(&self, partitions: &[TopicPartition]) {
        let mut entries = self.partitions.lock();
        for tp in partitions {
            entries.remove(tp);
        }
    }

    /// Generation under which the partition is currently held, `None` if it is not owned.
    pub fn generation_of(&self, tp: &TopicPartition) -> Option<Generation> {
        self.partitions.lock().get(tp).map(|e| e.generation)
    }

    /// Whether the partition is still held under `generation`.
    pub fn is_current(&self, tp: &TopicPartition, generation: Generation) -> bool {
        self.generation_of(tp) == Some(generation)
    }

    /// Notes that `offset` was read from the partition, returning the generation the record
    /// is delivered under, or `None` when the partition is not owned.
    pub fn record_read(&self, tp: &TopicPartition, offset: i64) -> Option<Generation> {
        let mut entries = self.partitions.lock();
        let entry = entries.get_mut(tp)?;
        entry.last_read = Some(entry.last_read.map_or(offset, |o| o.max(offset)));
        Some(entry.generation)
    }

    /// Notes that everything up to and including `offset` was processed. Ignored when the
    /// partition is no longer held under `generation`.
    pub fn mark_processed(&self, tp: &TopicPartition, generation: Generation, offset: i64) -> bool {
        let mut entries = self.partitions.lock();
        match entries.get_mut(tp) {
            Some(entry) if entry.generation == generation => {
                entry.last_processed = Some(entry.last_processed.map_or(offset, |o| o.max(offset)));
                true
            }
            _ => false,
        }
    }

    /// Offsets ready to be committed for the owned partitions accepted by `filter`. The offset
    /// is the next one to be read (`processed + 1`).
    pub fn pending_commits<F>(&self, filter: F) -> Vec<TopicPartitionOffset>
    where
        F: Fn(&TopicPartition) -> bool,
    {
        let entries = self.partitions.lock();
        let mut commits: Vec<TopicPartitionOffset> = entries
            .iter()
            .filter(|(tp, _)| filter(tp))
            .filter_map(|(tp, entry)| {
                let next = entry.last_processed? + 1;
                match entry.committed {
                    Some(committed) if committed >= next => None,
                    _ => Some(TopicPartitionOffset::new(tp.topic.clone(), tp.partition, next)),
                }
            })
            .collect();
        commits.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        commits
    }

    /// Records a successful commit.
    pub fn mark_committed(&self, offsets: &[TopicPartitionOffset]) {
        let mut entries = self.partitions.lock();
        for tpo in offsets {
            if let Some(entry) = entries.get_mut(&tpo.topic_partition()) {
                entry.committed = Some(entry.committed.map_or(tpo.offset, |o| o.max(tpo.offset)));
            }
        }
    }

    /// Partitions currently owned, optionally restricted to one topic.
    pub fn owned(&self, topic: Option<&str>) -> Vec<TopicPartition> {
        let entries = self.partitions.lock();
        let mut owned: Vec<TopicPartition> = entries
            .keys()
            .filter(|tp| topic.is_none_or(|t| tp.topic == t))
            .cloned()
            .collect();
        owned.sort();
        owned
    }

    /// Last offset read from the partition.
    pub fn last_read(&self, tp: &TopicPartition) -> Option<i64> {
        self.partitions.lock().get(tp).and_then(|e| e.last_read)
    }
}
