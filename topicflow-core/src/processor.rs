use async_trait::async_trait;

use crate::Result;
use crate::record::Record;

/// Payload specific logic run by a [`ProcessorHost`](crate::host::ProcessorHost) on batches of
/// records of a single topic.
///
/// `process` may block (asynchronously) for as long as it needs, this bounds the in-flight work
/// of the topic to one batch. Returning an error is fatal for the topic's pipeline; the offsets
/// of the failed batch are never committed, so the batch is read again after a restart.
#[async_trait]
pub trait EventProcessor: Send {
    /// Processes a batch of records. Records of the same partition are in offset order.
    async fn process(&mut self, batch: Vec<Record>) -> Result<()>;

    /// Called once after the last batch, when the host is drained.
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Maps a topic to the processor that handles it. Topics without a processor are not subscribed.
pub trait ProcessorProvider: Send {
    fn try_get_processor(&mut self, topic: &str) -> Option<Box<dyn EventProcessor>>;
}

impl<F> ProcessorProvider for F
where
    F: FnMut(&str) -> Option<Box<dyn EventProcessor>> + Send,
{
    fn try_get_processor(&mut self, topic: &str) -> Option<Box<dyn EventProcessor>> {
        self(topic)
    }
}
