#![allow(dead_code)]

use order_publisher::config::{Config, KafkaConfig, PublisherConfig};
use std::collections::HashMap;
use std::env;

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    // Use TEST_ prefix for test environment variables
    let kafka = KafkaConfig {
        brokers: env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .collect(),
        compression: "none".to_string(),
        acks: "all".to_string(),
        linger_ms: 0, // Immediate sending for tests
        message_timeout_ms: 10_000,
        client_properties: None,
        properties: HashMap::new(),
    };

    let publisher = PublisherConfig {
        topic: format!("test_orders_{}", std::process::id()),
        message_count: 3,
        flush_timeout_ms: 10_000,
        schema_validation: false,
        key_fields: vec!["orderId".to_string()],
    };

    Config {
        kafka,
        publisher,
        schema_registry: None,
    }
}
