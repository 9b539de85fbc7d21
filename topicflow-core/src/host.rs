//! A [`ProcessorHost`] decouples the poll loop, which must never block, from the topic's
//! [`EventProcessor`], which may be slow. It owns an unbounded queue (the coordinator is the only
//! producer) and one worker task (the only consumer) that drains the queue in FIFO order,
//! batches records by count and time, and hands every batch to the processor.
//!
//! ```text
//!  poll loop --enqueue--> [ queue ] --recv--> worker --batch--> EventProcessor
//!                                                 \
//!                                                  `--processed offsets--> Ledger
//! ```
//!
//! Since there is exactly one queue and one worker per topic, records of the same partition reach
//! the processor in offset order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{HostSettings, RevokedRecordPolicy};
use crate::error::{Error, Result};
use crate::ledger::{Generation, Ledger};
use crate::metrics::{consumer_metrics, topic_labels};
use crate::processor::EventProcessor;
use crate::record::{Record, TopicPartition};

/// A record together with the generation of the assignment it was read under.
#[derive(Debug)]
struct Delivery {
    record: Record,
    generation: Generation,
}

/// Lifecycle of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// Accepting records.
    Running,
    /// No more records will be enqueued, the worker drains what is left.
    Completing,
    /// The worker has exited.
    Stopped,
}

/// Queue depth shared between the producer and the worker, raising an alarm when it crosses
/// the configured threshold.
#[derive(Debug)]
struct QueueDepth {
    topic: String,
    depth: AtomicUsize,
    alarm_threshold: usize,
    alarmed: AtomicBool,
}

impl QueueDepth {
    fn new(topic: String, alarm_threshold: usize) -> Self {
        Self {
            topic,
            depth: AtomicUsize::new(0),
            alarm_threshold,
            alarmed: AtomicBool::new(false),
        }
    }

    fn get(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn increment(&self) {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        self.publish(depth);
        if depth >= self.alarm_threshold && !self.alarmed.swap(true, Ordering::AcqRel) {
            warn!(
                topic = %self.topic,
                depth,
                threshold = self.alarm_threshold,
                "Processor queue is growing beyond the alarm threshold, the processor is falling behind"
            );
        }
    }

    fn decrement(&self, n: usize) {
        let depth = self.depth.fetch_sub(n, Ordering::AcqRel) - n;
        self.publish(depth);
        if depth < self.alarm_threshold && self.alarmed.swap(false, Ordering::AcqRel) {
            info!(topic = %self.topic, depth, "Processor queue is back below the alarm threshold");
        }
    }

    fn publish(&self, depth: usize) {
        consumer_metrics()
            .queue_depth
            .get_or_create(&topic_labels(&self.topic))
            .set(depth as i64);
    }
}

/// Per-topic pipeline: a queue plus the worker that feeds the topic's processor.
pub struct ProcessorHost {
    topic: String,
    sender: Option<mpsc::UnboundedSender<Delivery>>,
    depth: Arc<QueueDepth>,
    handle: Option<JoinHandle<Result<()>>>,
    state: HostState,
    settings: HostSettings,
}

impl ProcessorHost {
    /// Creates the host and starts its worker. Must be called within a tokio runtime.
    pub fn start(
        topic: impl Into<String>,
        processor: Box<dyn EventProcessor>,
        settings: HostSettings,
        ledger: Arc<Ledger>,
    ) -> Self {
        let topic = topic.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(QueueDepth::new(
            topic.clone(),
            settings.queue_alarm_threshold,
        ));

        let worker = Worker {
            topic: topic.clone(),
            receiver,
            processor,
            settings: settings.clone(),
            ledger,
            depth: Arc::clone(&depth),
        };
        let handle = tokio::spawn(worker.run());
        info!(topic = %topic, "Started processor host");

        Self {
            topic,
            sender: Some(sender),
            depth,
            handle: Some(handle),
            state: HostState::Running,
            settings,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    /// Number of records waiting in the queue.
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Whether the worker has exited, which only happens before stop if the processor failed.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Queues a record read under `generation`. Never blocks.
    pub(crate) fn enqueue(&self, record: Record, generation: Generation) -> Result<()> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(Error::InvalidState(format!(
                "processor host for {} is not accepting records",
                self.topic
            )));
        };
        // count before sending so the worker never observes a negative depth
        self.depth.increment();
        sender
            .send(Delivery { record, generation })
            .map_err(|_| {
                self.depth.decrement(1);
                Error::Pipeline {
                    topic: self.topic.clone(),
                    error: "worker is not running".to_string(),
                }
            })
    }

    /// Marks that no more records will be enqueued. The worker drains the queue and exits.
    pub fn complete_adding(&mut self) {
        if self.sender.take().is_some() {
            debug!(topic = %self.topic, depth = self.depth(), "Processor host completing");
            self.state = HostState::Completing;
        }
    }

    /// Waits (bounded by the stop timeout) for the worker to exit and returns its outcome.
    pub async fn stop(&mut self) -> Result<()> {
        self.complete_adding();
        let Some(handle) = self.handle.take() else {
            return Err(Error::InvalidState(format!(
                "processor host for {} is already stopped",
                self.topic
            )));
        };
        let result = match tokio::time::timeout(self.settings.stop_timeout, handle).await {
            Ok(joined) => joined?,
            Err(_) => Err(Error::Timeout(format!(
                "processor host for {} did not drain within {:?}",
                self.topic, self.settings.stop_timeout
            ))),
        };
        self.state = HostState::Stopped;
        info!(topic = %self.topic, ok = result.is_ok(), "Stopped processor host");
        result
    }
}

struct Worker {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
    processor: Box<dyn EventProcessor>,
    settings: HostSettings,
    ledger: Arc<Ledger>,
    depth: Arc<QueueDepth>,
}

impl Worker {
    async fn run(mut self) -> Result<()> {
        while let Some(batch) = self.next_batch().await {
            self.process_batch(batch).await?;
        }

        self.processor.shutdown().await.map_err(|e| Error::Pipeline {
            topic: self.topic.clone(),
            error: format!("processor shutdown failed: {e}"),
        })?;
        debug!(topic = %self.topic, "Processor host worker drained");
        Ok(())
    }

    /// Waits for the first record, then keeps filling the batch until it is full, the batch
    /// timeout elapses or the queue is closed. Returns `None` once the queue is closed and empty.
    async fn next_batch(&mut self) -> Option<Vec<Delivery>> {
        let first = self.receiver.recv().await?;
        let mut batch = Vec::with_capacity(self.settings.batch_size.min(1024));
        batch.push(first);

        let deadline = tokio::time::Instant::now() + self.settings.batch_timeout;
        while batch.len() < self.settings.batch_size {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(delivery)) => batch.push(delivery),
                // closed, process what we have
                Ok(None) => break,
                Err(_) => break,
            }
        }
        self.depth.decrement(batch.len());
        Some(batch)
    }

    async fn process_batch(&mut self, batch: Vec<Delivery>) -> Result<()> {
        let metrics = consumer_metrics();
        let labels = topic_labels(&self.topic);

        // highest offset per partition and generation, committed only after the batch succeeded
        let mut processed: HashMap<(TopicPartition, Generation), i64> = HashMap::new();
        let mut records = Vec::with_capacity(batch.len());
        let mut discarded = 0;
        for Delivery { record, generation } in batch {
            let tp = record.topic_partition();
            if !self.ledger.is_current(&tp, generation) {
                match self.settings.revoked_records {
                    RevokedRecordPolicy::Discard => {
                        discarded += 1;
                        continue;
                    }
                    RevokedRecordPolicy::Process => {}
                }
            }
            processed
                .entry((tp, generation))
                .and_modify(|o| *o = (*o).max(record.offset))
                .or_insert(record.offset);
            records.push(record);
        }

        if discarded > 0 {
            metrics
                .records_discarded
                .get_or_create(&labels)
                .inc_by(discarded);
            info!(topic = %self.topic, discarded, "Discarded queued records of revoked partitions");
        }
        if records.is_empty() {
            return Ok(());
        }

        let count = records.len();
        let start = Instant::now();
        if let Err(e) = self.processor.process(records).await {
            metrics.batches_failed.get_or_create(&labels).inc();
            error!(topic = %self.topic, count, ?e, "Processor failed a batch, stopping the pipeline");
            return Err(Error::Pipeline {
                topic: self.topic.clone(),
                error: e.to_string(),
            });
        }
        metrics
            .processing_time
            .get_or_create(&labels)
            .observe(start.elapsed().as_micros() as f64 / 1000.0);
        metrics.batches_processed.get_or_create(&labels).inc();

        for ((tp, generation), offset) in processed {
            // stale partitions are ignored by the ledger
            self.ledger.mark_processed(&tp, generation, offset);
        }
        debug!(topic = %self.topic, count, "Processed batch");
        Ok(())
    }
}
