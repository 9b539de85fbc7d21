use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use topicflow_core::{AutoOffsetReset, BrokerEvent, Record, TopicPartition};

#[derive(Debug, Clone)]
pub(super) struct StoredRecord {
    pub(super) key: Option<Bytes>,
    pub(super) value: Bytes,
    pub(super) timestamp: DateTime<Utc>,
}

/// Everything the broker and its consumer share.
pub(super) struct BrokerState {
    pub(super) auto_offset_reset: AutoOffsetReset,
    /// Topic to partition logs.
    pub(super) topics: BTreeMap<String, Vec<Vec<StoredRecord>>>,
    pub(super) committed: HashMap<TopicPartition, i64>,
    /// Events returned by poll ahead of records.
    pub(super) pending_events: VecDeque<BrokerEvent>,
    pub(super) subscribed: Vec<String>,
    /// Fetch position of every assigned partition.
    pub(super) positions: BTreeMap<TopicPartition, i64>,
    pub(super) paused: HashSet<TopicPartition>,
    pub(super) pause_history: Vec<TopicPartition>,
    /// Round robin cursor over the assigned partitions.
    pub(super) next_partition: usize,
    pub(super) commit_count: usize,
    pub(super) closed: bool,
}

impl BrokerState {
    pub(super) fn new(auto_offset_reset: AutoOffsetReset) -> Self {
        Self {
            auto_offset_reset,
            topics: BTreeMap::new(),
            committed: HashMap::new(),
            pending_events: VecDeque::new(),
            subscribed: Vec::new(),
            positions: BTreeMap::new(),
            paused: HashSet::new(),
            pause_history: Vec::new(),
            next_partition: 0,
            commit_count: 0,
            closed: false,
        }
    }

    fn log(&self, tp: &TopicPartition) -> Option<&Vec<StoredRecord>> {
        self.topics
            .get(&tp.topic)
            .and_then(|partitions| partitions.get(tp.partition as usize))
    }

    /// Where fetching of a newly assigned partition starts.
    pub(super) fn start_position(&self, tp: &TopicPartition) -> i64 {
        if let Some(offset) = self.committed.get(tp) {
            return *offset;
        }
        match self.auto_offset_reset {
            AutoOffsetReset::Earliest => 0,
            AutoOffsetReset::Latest => self.log(tp).map_or(0, |log| log.len() as i64),
        }
    }

    /// Picks the next fetchable partition round robin, skipping paused and drained ones.
    pub(super) fn next_fetchable(&mut self) -> Option<TopicPartition> {
        let candidates: Vec<&TopicPartition> = self.positions.keys().collect();
        if candidates.is_empty() {
            return None;
        }
        let count = candidates.len();
        for i in 0..count {
            let index = (self.next_partition + i) % count;
            let tp = candidates[index];
            if self.paused.contains(tp) {
                continue;
            }
            let position = self.positions[tp];
            if self.log(tp).is_some_and(|log| (position as usize) < log.len()) {
                let tp = tp.clone();
                self.next_partition = index + 1;
                return Some(tp);
            }
        }
        None
    }

    /// Reads the record at the partition's position and advances the position. Reaching the end
    /// of the partition queues an end of partition event.
    pub(super) fn fetch(&mut self, tp: &TopicPartition) -> Option<Record> {
        let position = *self.positions.get(tp)?;
        let log = self.log(tp)?;
        let stored = log.get(position as usize)?.clone();
        let at_end = position as usize + 1 == log.len();
        self.positions.insert(tp.clone(), position + 1);
        if at_end {
            self.pending_events.push_back(BrokerEvent::PartitionEof {
                topic: Some(tp.topic.clone()),
                partition: tp.partition,
            });
        }
        Some(Record {
            topic: tp.topic.clone(),
            partition: tp.partition,
            offset: position,
            key: stored.key,
            value: stored.value,
            timestamp: stored.timestamp,
        })
    }
}
