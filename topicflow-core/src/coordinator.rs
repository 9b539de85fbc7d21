//! The [`Coordinator`] owns the broker connection and one [`ProcessorHost`] per subscribed topic.
//! It runs a single poll loop which consumes the broker's [`BrokerEvent`]s one at a time and
//! handles each variant in one place:
//!
//! - `Assigned` / `Revoked` update the [`Ledger`] (new generation, dropped ownership),
//! - `Record` is routed by topic to its host without blocking,
//! - errors are logged with context and never stop the loop unless fatal.
//!
//! Between polls the loop commits processed offsets, applies backpressure (pause/resume) and
//! checks that every pipeline is still alive.
//!
//! Lifecycle: `Created -> Started -> Stopping -> Stopped`. On stop the poll loop is cancelled and
//! joined first, only then are the hosts told that no more input will arrive; they drain, the
//! last processed offsets are committed and finally the broker connection is released.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerEvent};
use crate::config::ConsumerSettings;
use crate::error::{Error, Result};
use crate::host::ProcessorHost;
use crate::ledger::Ledger;
use crate::metrics::{consumer_metrics, topic_labels};
use crate::processor::ProcessorProvider;
use crate::record::{Record, TopicPartition};

/// Lifecycle of a [`Coordinator`]. No transition skips a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Created,
    Started,
    Stopping,
    Stopped,
}

/// Consumer group coordinator, see the module documentation.
pub struct Coordinator<B, P> {
    settings: ConsumerSettings,
    provider: P,
    state: CoordinatorState,
    /// Held while created and after the poll loop returned it.
    broker: Option<B>,
    ledger: Arc<Ledger>,
    cancel_token: CancellationToken,
    poll_handle: Option<JoinHandle<PollLoop<B>>>,
}

impl<B, P> Coordinator<B, P>
where
    B: Broker + 'static,
    P: ProcessorProvider,
{
    pub fn new(settings: ConsumerSettings, broker: B, provider: P) -> Self {
        Self {
            settings,
            provider,
            state: CoordinatorState::Created,
            broker: Some(broker),
            ledger: Arc::new(Ledger::new()),
            cancel_token: CancellationToken::new(),
            poll_handle: None,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// The partition ledger, shared with the processor hosts.
    pub fn ledger(&self) -> Arc<Ledger> {
        Arc::clone(&self.ledger)
    }

    /// Resolves once the poll loop has been asked to stop, either by [`Coordinator::stop`] or
    /// because it hit a fatal error (broker failure, dead pipeline).
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    /// Subscribes to every topic the provider has a processor for, starts a host per topic and
    /// then starts polling. Fails if no topic matches.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != CoordinatorState::Created {
            return Err(Error::InvalidState(format!(
                "coordinator can only be started once, it is {:?}",
                self.state
            )));
        }
        self.settings.host.validate()?;
        let Some(mut broker) = self.broker.take() else {
            return Err(Error::InvalidState("broker connection is gone".into()));
        };

        let topics = match broker.topics().await {
            Ok(topics) => topics,
            Err(e) => {
                self.broker = Some(broker);
                return Err(e);
            }
        };
        debug!(?topics, "Topics known to the broker");

        // hosts are created before subscribing so no record can arrive with nowhere to go
        let mut hosts: HashMap<String, ProcessorHost> = HashMap::new();
        for topic in topics {
            if hosts.contains_key(&topic) {
                continue;
            }
            if let Some(processor) = self.provider.try_get_processor(&topic) {
                let host = ProcessorHost::start(
                    topic.clone(),
                    processor,
                    self.settings.host.clone(),
                    Arc::clone(&self.ledger),
                );
                hosts.insert(topic, host);
            }
        }

        let mut subscribed: Vec<String> = hosts.keys().cloned().collect();
        subscribed.sort();
        warn!(topics = ?subscribed, "Topics to subscribe to");
        if subscribed.is_empty() {
            self.broker = Some(broker);
            return Err(Error::Config("no topics to subscribe to".into()));
        }

        if let Err(e) = broker.subscribe(&subscribed).await {
            for host in hosts.values_mut() {
                let _ = host.stop().await;
            }
            self.broker = Some(broker);
            return Err(e);
        }

        let poll_loop = PollLoop {
            broker,
            hosts,
            ledger: Arc::clone(&self.ledger),
            settings: self.settings.clone(),
            cancel_token: self.cancel_token.clone(),
            paused: HashSet::new(),
            last_commit: Instant::now(),
            outcome: Ok(()),
        };
        self.poll_handle = Some(tokio::spawn(poll_loop.run()));
        self.state = CoordinatorState::Started;
        info!(
            consumer_group = %self.settings.consumer_group,
            client_id = %self.settings.client_id,
            "Coordinator started"
        );
        Ok(())
    }

    /// Stops polling, drains every host, commits what was processed and releases the broker.
    /// Returns the first fatal error seen by the poll loop or the hosts.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != CoordinatorState::Started {
            return Err(Error::InvalidState(format!(
                "coordinator is not started, it is {:?}",
                self.state
            )));
        }
        let Some(handle) = self.poll_handle.take() else {
            return Err(Error::InvalidState("poll loop is not running".into()));
        };
        self.state = CoordinatorState::Stopping;
        info!("Stopping coordinator");

        self.cancel_token.cancel();
        let mut poll_loop = match handle.await {
            Ok(poll_loop) => poll_loop,
            Err(e) => {
                self.state = CoordinatorState::Stopped;
                return Err(Error::Other(format!("poll loop panicked: {e}")));
            }
        };
        let mut outcome = std::mem::replace(&mut poll_loop.outcome, Ok(()));

        // polling has fully stopped, now the hosts can be told there is no more input
        for host in poll_loop.hosts.values_mut() {
            host.complete_adding();
        }
        for host in poll_loop.hosts.values_mut() {
            if let Err(e) = host.stop().await {
                error!(topic = %host.topic(), ?e, "Processor host did not stop cleanly");
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }

        poll_loop.commit(|_| true).await;
        if let Err(e) = poll_loop.broker.close().await {
            error!(?e, "Failed to close the broker connection");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
        self.broker = Some(poll_loop.broker);
        self.state = CoordinatorState::Stopped;
        info!("Coordinator stopped");
        outcome
    }
}

/// State owned by the poll task. It is handed back to the coordinator when the loop exits.
struct PollLoop<B> {
    broker: B,
    hosts: HashMap<String, ProcessorHost>,
    ledger: Arc<Ledger>,
    settings: ConsumerSettings,
    cancel_token: CancellationToken,
    /// Topics whose partitions are paused at the broker because their queue is too deep.
    paused: HashSet<String>,
    last_commit: Instant,
    outcome: Result<()>,
}

impl<B> PollLoop<B>
where
    B: Broker,
{
    async fn run(mut self) -> Self {
        info!("Starting poll loop");
        if let Err(e) = self.poll_until_cancelled().await {
            error!(?e, "Poll loop stopped on a fatal error");
            self.outcome = Err(e);
            // let the owner know it has to stop us
            self.cancel_token.cancel();
        }
        info!("Poll loop exited");
        self
    }

    async fn poll_until_cancelled(&mut self) -> Result<()> {
        while !self.cancel_token.is_cancelled() {
            self.check_pipelines()?;
            if self.last_commit.elapsed() >= self.settings.commit_interval {
                self.commit(|_| true).await;
            }
            self.apply_backpressure().await?;

            if let Some(event) = self.broker.poll(self.settings.poll_interval).await? {
                self.handle_event(event).await?;
            }
        }
        Ok(())
    }

    /// A host whose worker exited before stop has failed its processor.
    fn check_pipelines(&self) -> Result<()> {
        match self.hosts.values().find(|host| host.is_finished()) {
            Some(host) => Err(Error::Pipeline {
                topic: host.topic().to_string(),
                error: "processor host worker exited".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn handle_event(&mut self, event: BrokerEvent) -> Result<()> {
        match event {
            BrokerEvent::Assigned(partitions) => self.on_assigned(partitions).await,
            BrokerEvent::Revoked(partitions) => self.on_revoked(partitions).await,
            BrokerEvent::Record(record) => self.on_record(record),
            BrokerEvent::ConsumeError {
                topic,
                partition,
                offset,
                timestamp,
                reason,
            } => {
                consumer_metrics()
                    .consume_errors
                    .get_or_create(&topic_labels(&topic))
                    .inc();
                error!(
                    topic = %topic,
                    partition,
                    offset,
                    timestamp = ?timestamp,
                    reason = %reason,
                    "Consume error, skipping the message"
                );
                Ok(())
            }
            BrokerEvent::Error { reason, fatal } => {
                if fatal {
                    return Err(Error::Broker(format!("fatal broker error: {reason}")));
                }
                error!(reason = %reason, "Broker error");
                Ok(())
            }
            BrokerEvent::PartitionEof { topic, partition } => {
                debug!(topic = ?topic, partition, "Reached end of partition");
                Ok(())
            }
            BrokerEvent::OffsetsCommitted { offsets, error } => {
                match error {
                    None => info!(?offsets, "Committed offsets"),
                    Some(error) => error!(?offsets, error = %error, "Failed to commit offsets"),
                }
                Ok(())
            }
            BrokerEvent::Statistics(stats) => {
                info!(stats = %stats, "Broker client statistics");
                Ok(())
            }
        }
    }

    async fn on_assigned(&mut self, partitions: Vec<TopicPartition>) -> Result<()> {
        consumer_metrics().rebalances.inc();
        let generation = self.ledger.assign(&partitions);
        warn!(?partitions, generation, "Partitions assigned");
        self.broker.assign(&partitions).await?;

        // newly assigned partitions of a throttled topic start paused too
        let throttled: Vec<TopicPartition> = partitions
            .into_iter()
            .filter(|tp| self.paused.contains(&tp.topic))
            .collect();
        if !throttled.is_empty() {
            self.broker.pause(&throttled).await?;
        }
        Ok(())
    }

    async fn on_revoked(&mut self, partitions: Vec<TopicPartition>) -> Result<()> {
        consumer_metrics().rebalances.inc();
        warn!(?partitions, "Partitions revoked");
        let revoked: HashSet<&TopicPartition> = partitions.iter().collect();
        self.commit(|tp| revoked.contains(tp)).await;
        self.ledger.revoke(&partitions);
        self.broker.unassign(&partitions).await
    }

    fn on_record(&mut self, record: Record) -> Result<()> {
        let Some(host) = self.hosts.get(&record.topic) else {
            return Err(Error::UnknownTopic(record.topic));
        };
        consumer_metrics()
            .records_received
            .get_or_create(&topic_labels(&record.topic))
            .inc();

        let tp = record.topic_partition();
        let Some(generation) = self.ledger.record_read(&tp, record.offset) else {
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "Dropping record of a partition that is not owned"
            );
            return Ok(());
        };
        host.enqueue(record, generation)
    }

    /// Commits processed offsets of the partitions accepted by `filter`. Failures are logged and
    /// retried on the next commit since the ledger only advances on success.
    async fn commit<F>(&mut self, filter: F)
    where
        F: Fn(&TopicPartition) -> bool,
    {
        self.last_commit = Instant::now();
        let offsets = self.ledger.pending_commits(filter);
        if offsets.is_empty() {
            return;
        }
        match self.broker.commit(&offsets).await {
            Ok(()) => {
                consumer_metrics().offsets_committed.inc_by(offsets.len() as u64);
                debug!(?offsets, "Committed processed offsets");
                self.ledger.mark_committed(&offsets);
            }
            Err(e) => {
                consumer_metrics().commit_failures.inc();
                error!(?e, ?offsets, "Failed to commit processed offsets");
            }
        }
    }

    /// Pauses a topic's partitions while its queue is at or above the pause threshold and
    /// resumes them once it drained to half of it.
    async fn apply_backpressure(&mut self) -> Result<()> {
        let Some(threshold) = self.settings.host.pause_threshold else {
            return Ok(());
        };
        for (topic, host) in &self.hosts {
            let depth = host.depth();
            let paused = self.paused.contains(topic);
            if !paused && depth >= threshold {
                let partitions = self.ledger.owned(Some(topic));
                warn!(topic = %topic, depth, ?partitions, "Pausing partitions, processor is falling behind");
                self.broker.pause(&partitions).await?;
                self.paused.insert(topic.clone());
            } else if paused && depth <= threshold / 2 {
                let partitions = self.ledger.owned(Some(topic));
                info!(topic = %topic, depth, ?partitions, "Resuming partitions");
                self.broker.resume(&partitions).await?;
                self.paused.remove(topic);
            }
        }
        Ok(())
    }
}
