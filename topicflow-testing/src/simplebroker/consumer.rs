use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use topicflow_core::{
    Broker, BrokerEvent, Error, Result, TopicPartition, TopicPartitionOffset,
};
use tracing::debug;

use super::error_injector::ErrorInjector;
use super::state::BrokerState;

/// Interval between fetch attempts while nothing is available.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// The consumer group member of a [`SimpleBroker`](super::SimpleBroker).
pub struct SimpleConsumer {
    state: Arc<Mutex<BrokerState>>,
    error_injector: Arc<ErrorInjector>,
}

impl SimpleConsumer {
    pub(super) fn new(state: Arc<Mutex<BrokerState>>, error_injector: Arc<ErrorInjector>) -> Self {
        Self {
            state,
            error_injector,
        }
    }

    /// One fetch attempt: a pending event first, then the next record round robin.
    fn try_next(&self) -> Option<BrokerEvent> {
        let mut state = self.state.lock();
        if let Some(event) = state.pending_events.pop_front() {
            return Some(event);
        }
        let tp = state.next_fetchable()?;
        let record = state.fetch(&tp)?;
        if self.error_injector.should_report_consume_error() {
            return Some(BrokerEvent::ConsumeError {
                topic: record.topic,
                partition: record.partition,
                offset: record.offset,
                timestamp: Some(record.timestamp),
                reason: "injected consume error".to_string(),
            });
        }
        Some(BrokerEvent::Record(record))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.lock().closed {
            return Err(Error::Broker("consumer is closed".into()));
        }
        Ok(())
    }
}

impl Broker for SimpleConsumer {
    async fn topics(&mut self) -> Result<Vec<String>> {
        if self.error_injector.should_fail_metadata() {
            return Err(Error::Broker("injected metadata failure".into()));
        }
        Ok(self.state.lock().topics.keys().cloned().collect())
    }

    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let mut partitions = Vec::new();
        for topic in topics {
            let Some(logs) = state.topics.get(topic) else {
                return Err(Error::UnknownTopic(topic.clone()));
            };
            partitions.extend((0..logs.len()).map(|p| TopicPartition::new(topic.clone(), p as i32)));
        }
        state.subscribed = topics.to_vec();
        // the group hands every partition to the only member
        state.pending_events.push_back(BrokerEvent::Assigned(partitions));
        Ok(())
    }

    async fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut state = self.state.lock();
        for tp in partitions {
            let position = state.start_position(tp);
            debug!(partition = %tp, position, "Assigning partition");
            state.positions.insert(tp.clone(), position);
        }
        Ok(())
    }

    async fn unassign(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut state = self.state.lock();
        for tp in partitions {
            state.positions.remove(tp);
            state.paused.remove(tp);
        }
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Option<BrokerEvent>> {
        self.ensure_open()?;
        if self.error_injector.should_fail_poll() {
            return Err(Error::Broker("injected poll failure".into()));
        }
        self.error_injector.apply_poll_latency().await;

        let deadline = Instant::now() + timeout;
        loop {
            // the lock is released before sleeping
            if let Some(event) = self.try_next() {
                return Ok(Some(event));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(IDLE_SLEEP).await;
        }
    }

    async fn commit(&mut self, offsets: &[TopicPartitionOffset]) -> Result<()> {
        self.ensure_open()?;
        if self.error_injector.should_fail_commit() {
            return Err(Error::Broker("injected commit failure".into()));
        }
        let mut state = self.state.lock();
        for tpo in offsets {
            state.committed.insert(tpo.topic_partition(), tpo.offset);
        }
        state.commit_count += 1;
        state.pending_events.push_back(BrokerEvent::OffsetsCommitted {
            offsets: offsets.to_vec(),
            error: None,
        });
        Ok(())
    }

    async fn pause(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut state = self.state.lock();
        for tp in partitions {
            state.paused.insert(tp.clone());
            state.pause_history.push(tp.clone());
        }
        Ok(())
    }

    async fn resume(&mut self, partitions: &[TopicPartition]) -> Result<()> {
        let mut state = self.state.lock();
        for tp in partitions {
            state.paused.remove(tp);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.positions.clear();
        state.paused.clear();
        Ok(())
    }
}
