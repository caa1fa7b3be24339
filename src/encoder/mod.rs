pub mod json;
pub mod key_strategy;
pub mod registry;

pub use json::JsonEncoder;
pub use key_strategy::KeyStrategy;
pub use registry::{
    decode_framed, decode_record, HttpSchemaRegistry, InMemorySchemaRegistry, SchemaRegistry,
    SchemaRegistryEncoder,
};

use crate::record::Record;
use crate::Result;
use bytes::Bytes;

/// Turns records into payload bytes.
pub enum PayloadEncoder {
    /// Plain JSON, no schema round trip.
    Json(JsonEncoder),
    /// JSON validated against a registered schema and framed with its id.
    SchemaRegistry(SchemaRegistryEncoder),
}

impl PayloadEncoder {
    pub async fn encode<R: Record>(&self, topic: &str, record: &R) -> Result<Bytes> {
        match self {
            PayloadEncoder::Json(encoder) => encoder.encode(record),
            PayloadEncoder::SchemaRegistry(encoder) => encoder.encode(topic, record).await,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PayloadEncoder::Json(_) => "json",
            PayloadEncoder::SchemaRegistry(_) => "json-schema-registry",
        }
    }
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        PayloadEncoder::Json(JsonEncoder)
    }
}
