pub mod memory;
pub mod producer;

pub use memory::{MemoryBroker, MemoryChannel, MemoryMode, StoredMessage};
pub use producer::KafkaChannel;

use crate::Result;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of delivery outcomes; ends once the channel is closed.
pub type DeliveryEvents = UnboundedReceiverStream<DeliveryOutcome>;

/// Result of a single publish attempt, keyed by the id `submit` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered {
        id: u64,
        topic: String,
        partition: i32,
        offset: i64,
        /// Message key, lossily decoded as UTF-8.
        key: Option<String>,
    },
    Failed {
        id: u64,
        topic: String,
        cause: String,
    },
}

impl DeliveryOutcome {
    pub fn id(&self) -> u64 {
        match self {
            DeliveryOutcome::Delivered { id, .. } | DeliveryOutcome::Failed { id, .. } => *id,
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            DeliveryOutcome::Delivered { topic, .. } | DeliveryOutcome::Failed { topic, .. } => {
                topic
            }
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Asynchronous publish transport.
///
/// Every accepted submission yields exactly one [`DeliveryOutcome`] on the
/// event stream, including submissions still pending when the channel is
/// closed (reported as failed).
pub trait DeliveryChannel {
    /// Enqueues a message without waiting for the broker. Fails only on
    /// malformed input or a local enqueue failure.
    fn submit(&mut self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Result<u64>;

    /// Hands out the outcome stream. Returns `None` once it has been taken.
    fn events(&mut self) -> Option<DeliveryEvents>;

    /// Blocks until nothing is in flight or `timeout` elapses. Returns
    /// whether everything was flushed.
    fn flush(&mut self, timeout: Duration) -> bool;

    /// Number of submissions without an outcome yet.
    fn in_flight(&self) -> usize;

    /// Releases the underlying client.
    fn close(self);
}
