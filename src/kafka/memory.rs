//! In-memory stub broker.
//!
//! Backs `--dry-run` and the workflow tests. Messages accepted in
//! [`MemoryMode::Available`] are appended to a per-topic log on partition 0
//! and acknowledged immediately, in submission order.

use crate::kafka::{DeliveryChannel, DeliveryEvents, DeliveryOutcome};
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

const PURGED_ON_CLOSE: &str = "purged on close";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MemoryMode {
    #[default]
    Available,
    /// Nothing is ever acknowledged.
    Unreachable,
    /// Every submission fails with the given cause.
    Rejecting(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerLog {
    submitted: usize,
    messages: Vec<StoredMessage>,
    next_offsets: HashMap<String, i64>,
}

/// Shared view of the stub broker, cloneable for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    log: Arc<Mutex<BrokerLog>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of submissions the channel accepted, delivered or not.
    pub fn submitted(&self) -> usize {
        self.lock().submitted
    }

    /// Messages stored for `topic`, in offset order.
    pub fn messages(&self, topic: &str) -> Vec<StoredMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_submission(&self) {
        self.lock().submitted += 1;
    }

    fn append(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> i64 {
        let mut log = self.lock();
        let next = log.next_offsets.entry(topic.to_string()).or_insert(0);
        let offset = *next;
        *next += 1;

        log.messages.push(StoredMessage {
            topic: topic.to_string(),
            partition: 0,
            offset,
            key: key.map(<[u8]>::to_vec),
            value: value.to_vec(),
        });
        offset
    }
}

pub struct MemoryChannel {
    broker: MemoryBroker,
    mode: MemoryMode,
    outcomes: mpsc::UnboundedSender<DeliveryOutcome>,
    events: Option<mpsc::UnboundedReceiver<DeliveryOutcome>>,
    pending: Vec<(u64, String)>,
    next_id: u64,
}

impl MemoryChannel {
    pub fn new(mode: MemoryMode) -> Self {
        Self::with_broker(MemoryBroker::new(), mode)
    }

    pub fn with_broker(broker: MemoryBroker, mode: MemoryMode) -> Self {
        let (outcomes, events) = mpsc::unbounded_channel();
        Self {
            broker,
            mode,
            outcomes,
            events: Some(events),
            pending: Vec::new(),
            next_id: 0,
        }
    }

    pub fn broker(&self) -> MemoryBroker {
        self.broker.clone()
    }

    fn emit(&self, outcome: DeliveryOutcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!("Delivery outcome dropped, no observer");
        }
    }
}

impl DeliveryChannel for MemoryChannel {
    fn submit(&mut self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Result<u64> {
        if topic.is_empty() {
            return Err(Error::Submission("topic must not be empty".to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.broker.record_submission();

        match &self.mode {
            MemoryMode::Available => {
                let offset = self.broker.append(topic, key, value);
                self.emit(DeliveryOutcome::Delivered {
                    id,
                    topic: topic.to_string(),
                    partition: 0,
                    offset,
                    key: key.map(|k| String::from_utf8_lossy(k).into_owned()),
                });
            }
            MemoryMode::Unreachable => self.pending.push((id, topic.to_string())),
            MemoryMode::Rejecting(cause) => self.emit(DeliveryOutcome::Failed {
                id,
                topic: topic.to_string(),
                cause: cause.clone(),
            }),
        }

        Ok(id)
    }

    fn events(&mut self) -> Option<DeliveryEvents> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    fn flush(&mut self, timeout: Duration) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        // Pending messages are never acknowledged, so the whole timeout elapses.
        std::thread::sleep(timeout);
        false
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn close(mut self) {
        for (id, topic) in std::mem::take(&mut self.pending) {
            self.emit(DeliveryOutcome::Failed {
                id,
                topic,
                cause: PURGED_ON_CLOSE.to_string(),
            });
        }
    }
}
