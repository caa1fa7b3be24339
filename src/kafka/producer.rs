use crate::config::KafkaConfig;
use crate::kafka::{DeliveryChannel, DeliveryEvents, DeliveryOutcome};
use crate::{Error, Result};
use rdkafka::client::ClientContext;
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{
    BaseRecord, DeliveryResult, Producer, ProducerContext, PurgeConfig, ThreadedProducer,
};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

const PURGE_REPORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Forwards librdkafka delivery reports onto the outcome queue.
struct DeliveryReportContext {
    outcomes: mpsc::UnboundedSender<DeliveryOutcome>,
}

impl ClientContext for DeliveryReportContext {}

impl ProducerContext for DeliveryReportContext {
    type DeliveryOpaque = Box<u64>;

    fn delivery(&self, result: &DeliveryResult<'_>, id: Self::DeliveryOpaque) {
        let outcome = match result {
            Ok(message) => DeliveryOutcome::Delivered {
                id: *id,
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            },
            Err((error, message)) => DeliveryOutcome::Failed {
                id: *id,
                topic: message.topic().to_string(),
                cause: error.to_string(),
            },
        };

        // The observer may already be gone during shutdown.
        if self.outcomes.send(outcome).is_err() {
            debug!(id = *id, "Delivery report dropped, no observer");
        }
    }
}

/// Delivery channel backed by a librdkafka producer with its own poll thread.
pub struct KafkaChannel {
    producer: ThreadedProducer<DeliveryReportContext>,
    events: Option<mpsc::UnboundedReceiver<DeliveryOutcome>>,
    next_id: u64,
}

impl KafkaChannel {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let settings = config.client_settings()?;

        let mut client_config = ClientConfig::new();
        for (key, value) in &settings {
            client_config.set(key.as_str(), value.as_str());
        }

        let (outcomes, events) = mpsc::unbounded_channel();
        let producer: ThreadedProducer<DeliveryReportContext> = client_config
            .create_with_context(DeliveryReportContext { outcomes })
            .map_err(creation_error)?;

        info!(
            bootstrap_servers = settings.get("bootstrap.servers").map(String::as_str).unwrap_or_default(),
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            events: Some(events),
            next_id: 0,
        })
    }
}

/// Rejected properties are configuration errors; librdkafka refusing to
/// start the client with otherwise accepted properties is a Kafka error.
fn creation_error(e: KafkaError) -> Error {
    match e {
        KafkaError::ClientConfig(..) => Error::Config(format!("Failed to create producer: {}", e)),
        other => Error::Kafka(other),
    }
}

impl DeliveryChannel for KafkaChannel {
    fn submit(&mut self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Result<u64> {
        if topic.is_empty() {
            return Err(Error::Submission("topic must not be empty".to_string()));
        }

        let id = self.next_id;
        let mut record =
            BaseRecord::<[u8], [u8], Box<u64>>::with_opaque_to(topic, Box::new(id)).payload(value);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record)
            .map_err(|(e, _)| Error::Submission(format!("Failed to enqueue message: {}", e)))?;

        self.next_id += 1;
        Ok(id)
    }

    fn events(&mut self) -> Option<DeliveryEvents> {
        self.events.take().map(UnboundedReceiverStream::new)
    }

    fn flush(&mut self, timeout: Duration) -> bool {
        if let Err(e) = self.producer.flush(Timeout::After(timeout)) {
            debug!("Producer flush returned: {}", e);
        }

        // A zero timeout can return before librdkafka looked at the queue.
        let pending = self.in_flight();
        if pending > 0 {
            warn!(pending, "Flush did not complete within {:?}", timeout);
            return false;
        }
        true
    }

    fn in_flight(&self) -> usize {
        self.producer.in_flight_count().max(0) as usize
    }

    fn close(self) {
        let pending = self.in_flight();
        if pending > 0 {
            warn!(pending, "Purging messages still in flight");
            self.producer
                .purge(PurgeConfig::default().queue().inflight());
            // Serves the delivery reports of the purged messages.
            if let Err(e) = self.producer.flush(Timeout::After(PURGE_REPORT_TIMEOUT)) {
                debug!("Flush after purge returned: {}", e);
            }
        }

        drop(self.producer);
        info!("Kafka producer closed");
    }
}
