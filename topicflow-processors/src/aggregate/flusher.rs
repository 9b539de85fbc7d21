use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info};

use crate::aggregate::aggregator::Aggregator;
use crate::aggregate::bucket::Borders;
use crate::error::{Error, Result};
use crate::naming::MetricConverter;
use crate::sink::MetricSink;

/// Periodically closes the bins the clock has moved past and forwards their derived events,
/// named after the aggregator's routing key, to a metric sink. Dropping the flusher without
/// [`Flusher::stop`] cancels it too, the final flush then runs detached.
pub struct Flusher {
    cancel_guard: DropGuard,
    handle: JoinHandle<Result<()>>,
}

impl Flusher {
    /// Starts the flush task. Must be called within a tokio runtime.
    pub fn start(
        aggregator: Arc<Aggregator>,
        converter: MetricConverter,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let task = FlushTask {
            aggregator,
            converter,
            sink,
        };
        let handle = tokio::spawn(task.run(cancel_token.clone()));
        Self {
            cancel_guard: cancel_token.drop_guard(),
            handle,
        }
    }

    /// Stops the periodic flush and forwards every bin that is still open.
    pub async fn stop(self) -> Result<()> {
        let Self {
            cancel_guard,
            handle,
        } = self;
        drop(cancel_guard);
        handle
            .await
            .map_err(|e| Error::Aggregation(format!("flusher task failed: {e}")))?
    }
}

struct FlushTask {
    aggregator: Arc<Aggregator>,
    converter: MetricConverter,
    sink: Arc<dyn MetricSink>,
}

impl FlushTask {
    async fn run(self, cancel_token: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.aggregator.settings().flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    // a failed flush loses that window, the next one is still attempted
                    if let Err(e) = flush(&self.aggregator, &self.converter, self.sink.as_ref(), Utc::now()).await {
                        error!(routing_key = %self.aggregator.routing_key(), ?e, "Failed to flush aggregated metrics");
                    }
                }
            }
        }

        let events = self.aggregator.drain();
        info!(
            routing_key = %self.aggregator.routing_key(),
            events = events.len(),
            "Flushing all open time bins"
        );
        forward(&self.converter, self.sink.as_ref(), events).await
    }
}

/// Resets the aggregator to the window around `now` and forwards the closed bins. Returns the
/// number of derived events.
pub async fn flush(
    aggregator: &Aggregator,
    converter: &MetricConverter,
    sink: &dyn MetricSink,
    now: DateTime<Utc>,
) -> Result<usize> {
    let borders = Borders::around(now, aggregator.settings());
    let events = aggregator.reset(borders);
    let count = events.len();
    forward(converter, sink, events).await?;
    Ok(count)
}

async fn forward(
    converter: &MetricConverter,
    sink: &dyn MetricSink,
    events: Vec<crate::event::MetricEvent>,
) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let metrics = events
        .iter()
        .flat_map(|event| converter.convert(event))
        .collect();
    sink.send(metrics).await
}
