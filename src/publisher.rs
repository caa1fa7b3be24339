//! Publishing lifecycle.
//!
//! A [`Publisher`] owns one delivery channel and one payload encoder and
//! walks through
//! `Uninitialized -> ChannelReady -> EncoderReady? -> Publishing -> Draining -> Closed`.
//! Delivery outcomes are consumed by a separate observer task for the whole
//! Publishing and Draining phases, so submission never waits on the broker.
//!
//! # Example
//!
//! ```rust,no_run
//! use order_publisher::config::PublisherConfig;
//! use order_publisher::kafka::{MemoryChannel, MemoryMode};
//! use order_publisher::record::Order;
//! use order_publisher::Publisher;
//!
//! #[tokio::main]
//! async fn main() -> order_publisher::Result<()> {
//!     let channel = MemoryChannel::new(MemoryMode::Available);
//!     let publisher = Publisher::new(channel, &PublisherConfig::default());
//!
//!     let report = publisher.publish(&Order::samples()).await?;
//!     println!("delivered {} of {}", report.delivered, report.submitted);
//!     Ok(())
//! }
//! ```

use crate::config::PublisherConfig;
use crate::encoder::{KeyStrategy, PayloadEncoder, SchemaRegistry, SchemaRegistryEncoder};
use crate::kafka::{DeliveryChannel, DeliveryEvents, DeliveryOutcome};
use crate::record::Record;
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Uninitialized,
    ChannelReady,
    EncoderReady,
    Publishing,
    Draining,
    Closed,
}

/// What happened to a publishing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub submitted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Messages still in flight when the flush returned.
    pub unflushed: usize,
    pub flushed: bool,
    /// Every outcome observed, in arrival order.
    pub outcomes: Vec<DeliveryOutcome>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.flushed && self.failed == 0 && self.delivered == self.submitted
    }

    /// Turns an incomplete run into the matching error.
    pub fn into_result(self) -> Result<Self> {
        if !self.flushed {
            return Err(Error::FlushTimeout {
                pending: self.unflushed,
            });
        }
        if self.failed > 0 {
            return Err(Error::PartialDelivery {
                failed: self.failed,
                pending: self.unflushed,
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Default)]
struct DeliverySummary {
    delivered: usize,
    failed: usize,
    outcomes: Vec<DeliveryOutcome>,
}

pub struct Publisher<C: DeliveryChannel> {
    channel: C,
    encoder: PayloadEncoder,
    key_strategy: KeyStrategy,
    topic: String,
    flush_timeout: Duration,
    state: PublisherState,
}

impl<C: DeliveryChannel> Publisher<C> {
    /// Takes ownership of a constructed channel. Records are JSON encoded
    /// until a schema registry is attached.
    pub fn new(channel: C, config: &PublisherConfig) -> Self {
        debug!(
            from = ?PublisherState::Uninitialized,
            to = ?PublisherState::ChannelReady,
            "Publisher state change"
        );

        Self {
            channel,
            encoder: PayloadEncoder::default(),
            key_strategy: KeyStrategy::from_fields(&config.key_fields),
            topic: config.topic.clone(),
            flush_timeout: config.flush_timeout(),
            state: PublisherState::ChannelReady,
        }
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn encoder(&self) -> &PayloadEncoder {
        &self.encoder
    }

    /// Switches to schema validated encoding.
    ///
    /// If the registry cannot be reached the channel is closed before
    /// anything was submitted and the error is returned.
    pub async fn with_schema_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Result<Self> {
        match SchemaRegistryEncoder::connect(registry).await {
            Ok(encoder) => {
                self.encoder = PayloadEncoder::SchemaRegistry(encoder);
                self.transition(PublisherState::EncoderReady);
                Ok(self)
            }
            Err(e) => {
                error!("Failed to create schema registry encoder: {}", e);
                self.transition(PublisherState::Closed);
                self.channel.close();
                Err(e)
            }
        }
    }

    /// Submits every record, drains the channel and closes it.
    ///
    /// The first encoding or submission error aborts the remaining records.
    /// Whatever was already submitted is still flushed before the error is
    /// returned, wrapped in [`Error::Aborted`] with the drain result. A flush that times out is not an error here; it is reported
    /// through [`PublishReport::flushed`].
    pub async fn publish<R: Record>(mut self, records: &[R]) -> Result<PublishReport> {
        let events = match self.channel.events() {
            Some(events) => events,
            None => {
                self.transition(PublisherState::Closed);
                self.channel.close();
                return Err(Error::Submission(
                    "delivery events already taken".to_string(),
                ));
            }
        };
        let observer = tokio::spawn(observe(events));

        self.transition(PublisherState::Publishing);
        info!(
            topic = %self.topic,
            count = records.len(),
            encoder = self.encoder.name(),
            "Publishing records"
        );

        let mut submitted = 0;
        let mut failure = None;
        for (index, record) in records.iter().enumerate() {
            match self.submit_record(record).await {
                Ok(id) => {
                    submitted += 1;
                    debug!(id, index, "Record submitted");
                }
                Err(e) => {
                    error!(index, "Aborting remaining submissions: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        self.transition(PublisherState::Draining);
        let flushed = flush_blocking(&mut self.channel, self.flush_timeout);
        let unflushed = self.channel.in_flight();

        self.transition(PublisherState::Closed);
        self.channel.close();

        let summary = observer.await.unwrap_or_else(|e| {
            error!("Delivery observer failed: {}", e);
            DeliverySummary::default()
        });

        if let Some(e) = failure {
            if submitted == 0 {
                return Err(e);
            }
            if !flushed {
                warn!(
                    unflushed,
                    timeout_ms = self.flush_timeout.as_millis() as u64,
                    "Partial delivery: flush timed out after aborted publish"
                );
            }
            return Err(Error::Aborted {
                source: Box::new(e),
                submitted,
                unflushed,
                flushed,
            });
        }

        let report = PublishReport {
            submitted,
            delivered: summary.delivered,
            failed: summary.failed,
            unflushed,
            flushed,
            outcomes: summary.outcomes,
        };

        if !report.flushed {
            warn!(
                unflushed = report.unflushed,
                timeout_ms = self.flush_timeout.as_millis() as u64,
                "Partial delivery: flush timed out"
            );
        } else if report.failed > 0 {
            warn!(failed = report.failed, "Partial delivery: some messages failed");
        }

        info!(
            submitted = report.submitted,
            delivered = report.delivered,
            failed = report.failed,
            "Publishing finished"
        );
        Ok(report)
    }

    async fn submit_record<R: Record>(&mut self, record: &R) -> Result<u64> {
        let key = if self.key_strategy.is_keyed() {
            let value = serde_json::to_value(record)?;
            let key = self.key_strategy.extract_key(&value);
            if key.is_none() {
                debug!("Record has no value for the configured key, sending unkeyed");
            }
            key
        } else {
            None
        };

        let payload = self.encoder.encode(&self.topic, record).await?;
        self.channel
            .submit(&self.topic, key.as_deref().map(str::as_bytes), &payload)
    }

    fn transition(&mut self, to: PublisherState) {
        debug!(from = ?self.state, to = ?to, "Publisher state change");
        self.state = to;
    }
}

/// `flush` blocks the calling thread; on a multi-thread runtime the worker
/// is handed over so other tasks keep running.
fn flush_blocking<C: DeliveryChannel>(channel: &mut C, timeout: Duration) -> bool {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| channel.flush(timeout))
        }
        _ => channel.flush(timeout),
    }
}

async fn observe(mut events: DeliveryEvents) -> DeliverySummary {
    let mut summary = DeliverySummary::default();

    while let Some(outcome) = events.next().await {
        match &outcome {
            DeliveryOutcome::Delivered {
                id,
                topic,
                partition,
                offset,
                key,
            } => {
                summary.delivered += 1;
                info!(
                    id,
                    topic = %topic,
                    partition,
                    offset,
                    key = key.as_deref().unwrap_or_default(),
                    "Produced event"
                );
            }
            DeliveryOutcome::Failed { id, topic, cause } => {
                summary.failed += 1;
                warn!(id, topic = %topic, cause = %cause, "Failed to deliver message");
            }
        }
        summary.outcomes.push(outcome);
    }

    summary
}
