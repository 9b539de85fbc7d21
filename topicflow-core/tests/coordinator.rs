use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use topicflow_core::{
    ConsumerSettings, Coordinator, CoordinatorState, Error, EventProcessor, HostSettings,
    ProcessorProvider, Record, Result, TopicPartition,
};
use topicflow_testing::{SimpleBroker, SimpleConsumer};

const LOGS: &str = "logs.project.env";
const METRICS: &str = "metrics.project.env";

type Seen = Arc<Mutex<Vec<Record>>>;

struct RecordingProcessor {
    seen: Seen,
    /// When set, every batch waits for a permit.
    gate: Option<Arc<Semaphore>>,
    fail: bool,
}

#[async_trait]
impl EventProcessor for RecordingProcessor {
    async fn process(&mut self, batch: Vec<Record>) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Processor(e.to_string()))?
                .forget();
        }
        if self.fail {
            return Err(Error::Processor("cannot handle this batch".into()));
        }
        self.seen.lock().extend(batch);
        Ok(())
    }
}

fn settings() -> ConsumerSettings {
    ConsumerSettings {
        poll_interval: Duration::from_millis(10),
        commit_interval: Duration::from_millis(20),
        host: HostSettings {
            batch_size: 10,
            batch_timeout: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Hands a recording processor to each topic it was created with.
struct RecordingProvider {
    seen: HashMap<String, Seen>,
}

impl ProcessorProvider for RecordingProvider {
    fn try_get_processor(&mut self, topic: &str) -> Option<Box<dyn EventProcessor>> {
        let seen = self.seen.get(topic)?;
        Some(Box::new(RecordingProcessor {
            seen: Arc::clone(seen),
            gate: None,
            fail: false,
        }))
    }
}

fn recording_provider(topics: &[&str]) -> (HashMap<String, Seen>, RecordingProvider) {
    let seen: HashMap<String, Seen> = topics
        .iter()
        .map(|t| (t.to_string(), Seen::default()))
        .collect();
    let provider = RecordingProvider { seen: seen.clone() };
    (seen, provider)
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn offsets(seen: &Seen, partition: i32) -> Vec<i64> {
    seen.lock()
        .iter()
        .filter(|r| r.partition == partition)
        .map(|r| r.offset)
        .collect()
}

#[tokio::test]
async fn test_start_without_matching_topics_fails() {
    let broker = SimpleBroker::default();
    broker.create_topic("unrelated", 1);
    let provider = |_: &str| -> Option<Box<dyn EventProcessor>> { None };
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);

    let result = coordinator.start().await;
    assert!(matches!(result, Err(Error::Config(_))), "{result:?}");
    assert_eq!(coordinator.state(), CoordinatorState::Created);
    assert!(broker.subscriptions().is_empty());
}

#[tokio::test]
async fn test_lifecycle_transitions() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    let (_, provider) = recording_provider(&[LOGS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);

    // stop before start
    assert!(matches!(coordinator.stop().await, Err(Error::InvalidState(_))));

    coordinator.start().await.unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Started);
    assert!(matches!(coordinator.start().await, Err(Error::InvalidState(_))));

    coordinator.stop().await.unwrap();
    assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    assert!(broker.is_closed());
    assert!(matches!(coordinator.stop().await, Err(Error::InvalidState(_))));
    assert!(matches!(coordinator.start().await, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn test_metadata_failure_fails_start() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    broker.error_injector().fail_metadata(1);
    let (_, provider) = recording_provider(&[LOGS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);

    assert!(matches!(coordinator.start().await, Err(Error::Broker(_))));
    assert_eq!(coordinator.state(), CoordinatorState::Created);
}

#[tokio::test]
async fn test_routes_records_to_their_topic_processor() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 2);
    broker.create_topic(METRICS, 1);
    broker.create_topic("traces.project.env", 1);
    let (seen, provider) = recording_provider(&[LOGS, METRICS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);
    coordinator.start().await.unwrap();
    assert_eq!(broker.subscriptions(), vec![LOGS, METRICS]);

    for i in 0..6 {
        broker.produce(LOGS, i % 2, None, format!("log-{i}"));
    }
    broker.produce(METRICS, 0, None, "metric");
    broker.produce("traces.project.env", 0, None, "span");

    wait_until("all records to be processed", || {
        seen[LOGS].lock().len() == 6 && seen[METRICS].lock().len() == 1
    })
    .await;
    coordinator.stop().await.unwrap();

    assert!(seen[LOGS].lock().iter().all(|r| r.topic == LOGS));
    assert_eq!(seen[METRICS].lock()[0].value, "metric");
}

#[tokio::test]
async fn test_preserves_partition_order_and_commits_processed_offsets() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 2);
    let (seen, provider) = recording_provider(&[LOGS]);
    let mut settings = settings();
    settings.host.batch_size = 7;
    let mut coordinator = Coordinator::new(settings, broker.consumer(), provider);
    coordinator.start().await.unwrap();

    for i in 0..100 {
        broker.produce(LOGS, i % 2, None, format!("{i}"));
    }

    let logs = Arc::clone(&seen[LOGS]);
    wait_until("all records to be processed", || logs.lock().len() == 100).await;
    assert_eq!(offsets(&logs, 0), (0..50).collect::<Vec<_>>());
    assert_eq!(offsets(&logs, 1), (0..50).collect::<Vec<_>>());

    // next offset to read
    wait_until("offsets to be committed", || {
        broker.committed(LOGS, 0) == Some(50) && broker.committed(LOGS, 1) == Some(50)
    })
    .await;
    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_commit_is_retried() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    broker.error_injector().fail_commits(2);
    let (seen, provider) = recording_provider(&[LOGS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);
    coordinator.start().await.unwrap();

    for i in 0..3 {
        broker.produce(LOGS, 0, None, format!("{i}"));
    }
    let logs = Arc::clone(&seen[LOGS]);
    wait_until("all records to be processed", || logs.lock().len() == 3).await;
    wait_until("the commit to succeed", || broker.committed(LOGS, 0) == Some(3)).await;
    coordinator.stop().await.unwrap();
}

#[tokio::test]
async fn test_revoke_commits_and_reassign_resumes_from_commit() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 2);
    let (seen, provider) = recording_provider(&[LOGS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);
    coordinator.start().await.unwrap();
    let logs = Arc::clone(&seen[LOGS]);

    for i in 0..5 {
        broker.produce(LOGS, 0, None, format!("{i}"));
    }
    wait_until("first records", || logs.lock().len() == 5).await;
    wait_until("first commit", || broker.committed(LOGS, 0) == Some(5)).await;

    let p0 = TopicPartition::new(LOGS, 0);
    broker.inject_revoke(vec![p0.clone()]);
    wait_until("the partition to be unassigned", || {
        !broker.assigned().contains(&p0)
    })
    .await;
    assert_eq!(broker.committed(LOGS, 0), Some(5));
    assert!(!coordinator.ledger().owned(Some(LOGS)).contains(&p0));

    // not owned, not fetched
    for i in 5..8 {
        broker.produce(LOGS, 0, None, format!("{i}"));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(logs.lock().len(), 5);

    let generation = coordinator.ledger().generation();
    broker.inject_assign(vec![p0.clone()]);
    wait_until("records after reassignment", || logs.lock().len() == 8).await;
    assert_eq!(offsets(&logs, 0), (0..8).collect::<Vec<_>>());
    assert!(coordinator.ledger().generation() > generation);

    coordinator.stop().await.unwrap();
    assert_eq!(broker.committed(LOGS, 0), Some(8));
}

#[tokio::test]
async fn test_processor_failure_cancels_and_is_not_committed() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    let seen = Seen::default();
    let provider = {
        let seen = Arc::clone(&seen);
        move |_: &str| -> Option<Box<dyn EventProcessor>> {
            Some(Box::new(RecordingProcessor {
                seen: Arc::clone(&seen),
                gate: None,
                fail: true,
            }))
        }
    };
    let mut coordinator: Coordinator<SimpleConsumer, _> =
        Coordinator::new(settings(), broker.consumer(), provider);
    coordinator.start().await.unwrap();
    broker.produce(LOGS, 0, None, "poison");

    tokio::time::timeout(Duration::from_secs(5), coordinator.cancelled())
        .await
        .expect("the coordinator to cancel itself");
    let result = coordinator.stop().await;
    assert!(matches!(result, Err(Error::Pipeline { .. })), "{result:?}");
    assert!(seen.lock().is_empty());
    assert_eq!(broker.committed(LOGS, 0), None);
}

#[tokio::test]
async fn test_fatal_broker_error_cancels() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    let (_, provider) = recording_provider(&[LOGS]);
    let mut coordinator = Coordinator::new(settings(), broker.consumer(), provider);
    coordinator.start().await.unwrap();

    // a non fatal error and a consume error are only logged
    broker.inject_event(topicflow_core::BrokerEvent::Error {
        reason: "transport hiccup".into(),
        fatal: false,
    });
    broker.error_injector().consume_errors(1);
    broker.produce(LOGS, 0, None, "skipped");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.state(), CoordinatorState::Started);

    broker.inject_event(topicflow_core::BrokerEvent::Error {
        reason: "all brokers down".into(),
        fatal: true,
    });
    tokio::time::timeout(Duration::from_secs(5), coordinator.cancelled())
        .await
        .expect("the coordinator to cancel itself");
    assert!(matches!(coordinator.stop().await, Err(Error::Broker(_))));
}

#[tokio::test]
async fn test_pauses_slow_topic_and_resumes_when_drained() {
    let broker = SimpleBroker::default();
    broker.create_topic(LOGS, 1);
    let seen = Seen::default();
    let gate = Arc::new(Semaphore::new(0));
    let provider = {
        let seen = Arc::clone(&seen);
        let gate = Arc::clone(&gate);
        move |_: &str| -> Option<Box<dyn EventProcessor>> {
            Some(Box::new(RecordingProcessor {
                seen: Arc::clone(&seen),
                gate: Some(Arc::clone(&gate)),
                fail: false,
            }))
        }
    };
    let mut settings = settings();
    settings.host.batch_size = 1;
    settings.host.pause_threshold = Some(4);
    let mut coordinator = Coordinator::new(settings, broker.consumer(), provider);
    coordinator.start().await.unwrap();

    for i in 0..20 {
        broker.produce(LOGS, 0, None, format!("{i}"));
    }
    wait_until("the partition to be paused", || {
        broker.paused() == vec![TopicPartition::new(LOGS, 0)]
    })
    .await;
    // fetching stopped well before the end of the partition
    let read = coordinator
        .ledger()
        .last_read(&TopicPartition::new(LOGS, 0))
        .unwrap_or_default();
    assert!(read < 19, "read up to {read}");

    gate.add_permits(100);
    wait_until("all records to be processed", || seen.lock().len() == 20).await;
    wait_until("the partition to be resumed", || broker.paused().is_empty()).await;
    assert!(broker.was_paused(LOGS));

    coordinator.stop().await.unwrap();
    assert_eq!(broker.committed(LOGS, 0), Some(20));
}
