//! Records published by the workflow.
//!
//! A [`Record`] is any serde value that can also describe its shape as a
//! JSON Schema, which the schema registry encoder registers per topic.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A structured value that can be published.
pub trait Record: Serialize + DeserializeOwned {
    /// Title used for the registered schema.
    fn schema_title() -> &'static str;

    /// JSON Schema describing the serialized form of this record.
    fn json_schema() -> Value;
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_address: String,
    pub order_id: i64,
    pub order_time: i64,
}

impl Order {
    pub fn new(order_address: impl Into<String>, order_id: i64, order_time: i64) -> Self {
        Self {
            order_address: order_address.into(),
            order_id,
            order_time,
        }
    }

    /// The fixed sample orders the publisher draws from.
    pub fn samples() -> Vec<Order> {
        vec![
            Order::new("Rua Jacinto", 12, 12345),
            Order::new("Rua Goiás Topen", 12, 12345),
            Order::new("Rua Miguel Jovita", 13, 12345),
            Order::new("Rua CT Garra", 14, 12345),
        ]
    }

    /// Picks `count` sample orders uniformly at random, with replacement.
    pub fn sample_batch<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<Order> {
        let samples = Self::samples();
        (0..count)
            .filter_map(|_| samples.choose(rng).cloned())
            .collect()
    }
}

impl Record for Order {
    fn schema_title() -> &'static str {
        "Order"
    }

    fn json_schema() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": Self::schema_title(),
            "type": "object",
            "properties": {
                "orderAddress": { "type": "string" },
                "orderId": { "type": "integer" },
                "orderTime": { "type": "integer" }
            },
            "required": ["orderAddress", "orderId", "orderTime"],
            "additionalProperties": false
        })
    }
}
