//! Schema registry backed encoding.
//!
//! Payloads use the Confluent wire format:
//! `[magic byte 0x00][schema id: u32 big-endian][JSON document]`.
//! The schema for a topic is registered under the subject `{topic}-value`
//! on first use and cached for the lifetime of the encoder.

use crate::config::SchemaRegistryConfig;
use crate::record::Record;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

const MAGIC_BYTE: u8 = 0x00;
const HEADER_LEN: usize = 5;
const SCHEMA_TYPE_JSON: &str = "JSON";

/// Subject a topic's value schema is registered under.
pub fn subject_name(topic: &str) -> String {
    format!("{}-value", topic)
}

/// Prefixes `data` with the magic byte and schema id.
pub fn frame(schema_id: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(schema_id);
    buf.put_slice(data);
    buf.freeze()
}

/// Splits a framed payload into its schema id and body.
pub fn decode_framed(data: &[u8]) -> Result<(u32, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(Error::Encoding(
            "payload too short to contain a schema id".to_string(),
        ));
    }

    if data[0] != MAGIC_BYTE {
        return Err(Error::Encoding(format!(
            "invalid magic byte: expected 0x00, got 0x{:02x}",
            data[0]
        )));
    }

    let mut id_bytes = &data[1..HEADER_LEN];
    Ok((id_bytes.get_u32(), &data[HEADER_LEN..]))
}

/// Decodes a framed payload back into a record.
pub fn decode_record<R: DeserializeOwned>(data: &[u8]) -> Result<(u32, R)> {
    let (schema_id, body) = decode_framed(data)?;
    let record = serde_json::from_slice(body)?;
    Ok((schema_id, record))
}

/// Client side of a schema registry.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Verifies the registry is reachable and the credentials are accepted.
    async fn check_connection(&self) -> Result<()>;

    /// Registers `schema` under `subject`, returning its id. Registering an
    /// identical schema again returns the existing id.
    async fn register(&self, subject: &str, schema: &Value) -> Result<u32>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterSchemaRequest {
    schema_type: &'static str,
    schema: String,
}

#[derive(Debug, Deserialize)]
struct RegisterSchemaResponse {
    id: u32,
}

/// Confluent-compatible REST schema registry client.
pub struct HttpSchemaRegistry {
    base_url: String,
    credentials: Option<(String, String)>,
    http_client: reqwest::Client,
}

impl HttpSchemaRegistry {
    pub fn new(config: &SchemaRegistryConfig) -> Result<Self> {
        config.validate()?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        };

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            credentials,
            http_client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::ACCEPT, "application/vnd.schemaregistry.v1+json");

        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, action: &str) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            Error::SchemaRegistration(format!("Failed to {}: {}", action, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SchemaRegistration(format!(
                "Failed to {}: status {}: {}",
                action, status, body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl SchemaRegistry for HttpSchemaRegistry {
    async fn check_connection(&self) -> Result<()> {
        self.send(
            self.request(reqwest::Method::GET, "/subjects"),
            "reach schema registry",
        )
        .await?;

        debug!(url = %self.base_url, "Schema registry reachable");
        Ok(())
    }

    async fn register(&self, subject: &str, schema: &Value) -> Result<u32> {
        let request = RegisterSchemaRequest {
            schema_type: SCHEMA_TYPE_JSON,
            schema: schema.to_string(),
        };

        let response = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/subjects/{}/versions", subject),
                )
                .json(&request),
                "register schema",
            )
            .await?;

        let registered: RegisterSchemaResponse = response.json().await.map_err(|e| {
            Error::SchemaRegistration(format!("Failed to parse registration response: {}", e))
        })?;

        debug!(subject, schema_id = registered.id, "Schema registered");
        Ok(registered.id)
    }
}

/// Registry kept in process memory, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemorySchemaRegistry {
    schemas: Mutex<Vec<(String, Value)>>,
    unreachable: bool,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that fails every call as if the network were down.
    pub fn unreachable() -> Self {
        Self {
            schemas: Mutex::new(Vec::new()),
            unreachable: true,
        }
    }

    pub fn schema_by_id(&self, id: u32) -> Option<Value> {
        let schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        let index = (id as usize).checked_sub(1)?;
        schemas.get(index).map(|(_, schema)| schema.clone())
    }

    /// Distinct registered subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        let schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        let subjects: BTreeSet<&String> = schemas.iter().map(|(s, _)| s).collect();
        subjects.into_iter().cloned().collect()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(Error::SchemaRegistration(
                "schema registry unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn check_connection(&self) -> Result<()> {
        self.ensure_reachable()
    }

    async fn register(&self, subject: &str, schema: &Value) -> Result<u32> {
        self.ensure_reachable()?;

        let mut schemas = self.schemas.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(index) = schemas
            .iter()
            .position(|(s, existing)| s == subject && existing == schema)
        {
            return Ok(index as u32 + 1);
        }

        schemas.push((subject.to_string(), schema.clone()));
        Ok(schemas.len() as u32)
    }
}

struct ResolvedSchema {
    id: u32,
    validator: jsonschema::Validator,
}

/// Encoder that validates records against a registered JSON Schema.
pub struct SchemaRegistryEncoder {
    registry: Arc<dyn SchemaRegistry>,
    resolved: RwLock<HashMap<String, Arc<ResolvedSchema>>>,
}

impl SchemaRegistryEncoder {
    /// Builds an encoder after confirming the registry is reachable.
    pub async fn connect(registry: Arc<dyn SchemaRegistry>) -> Result<Self> {
        registry.check_connection().await?;
        info!("Connected to schema registry");

        Ok(Self {
            registry,
            resolved: RwLock::new(HashMap::new()),
        })
    }

    #[instrument(skip(self, record))]
    pub async fn encode<R: Record>(&self, topic: &str, record: &R) -> Result<Bytes> {
        if topic.is_empty() {
            return Err(Error::Encoding("topic must not be empty".to_string()));
        }

        let schema = self.resolve::<R>(topic).await?;
        let value = serde_json::to_value(record)?;

        if !schema.validator.is_valid(&value) {
            let violations: Vec<String> = schema
                .validator
                .iter_errors(&value)
                .map(|e| e.to_string())
                .collect();
            return Err(Error::Encoding(format!(
                "record does not match schema {}: {}",
                schema.id,
                violations.join(", ")
            )));
        }

        let body = serde_json::to_vec(&value)?;
        Ok(frame(schema.id, &body))
    }

    /// Schema id cached for `topic`, if it has been resolved.
    pub async fn cached_schema_id(&self, topic: &str) -> Option<u32> {
        self.resolved
            .read()
            .await
            .get(&subject_name(topic))
            .map(|schema| schema.id)
    }

    async fn resolve<R: Record>(&self, topic: &str) -> Result<Arc<ResolvedSchema>> {
        let subject = subject_name(topic);

        if let Some(schema) = self.resolved.read().await.get(&subject) {
            return Ok(Arc::clone(schema));
        }

        let schema = R::json_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            Error::SchemaRegistration(format!(
                "Invalid schema for {}: {}",
                R::schema_title(),
                e
            ))
        })?;
        let id = self.registry.register(&subject, &schema).await?;
        info!(subject = %subject, schema_id = id, "Resolved schema");

        let mut resolved = self.resolved.write().await;
        let entry = resolved
            .entry(subject)
            .or_insert_with(|| Arc::new(ResolvedSchema { id, validator }));
        Ok(Arc::clone(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Order;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shipment {
        weight: i64,
    }

    impl Record for Shipment {
        fn schema_title() -> &'static str {
            "Shipment"
        }

        fn json_schema() -> Value {
            json!({
                "type": "object",
                "properties": { "weight": { "type": "integer", "minimum": 1 } },
                "required": ["weight"]
            })
        }
    }

    async fn encoder_with(registry: Arc<InMemorySchemaRegistry>) -> SchemaRegistryEncoder {
        SchemaRegistryEncoder::connect(registry).await.unwrap()
    }

    #[test]
    fn test_frame_layout() {
        let framed = frame(7, b"{}");
        assert_eq!(&framed[..], &[0x00, 0, 0, 0, 7, b'{', b'}']);

        let (id, body) = decode_framed(&framed).unwrap();
        assert_eq!(id, 7);
        assert_eq!(body, b"{}");
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(decode_framed(&[0x00, 0x01]), Err(Error::Encoding(_))));
        assert!(matches!(
            decode_framed(&[0xFF, 0, 0, 0, 1, b'{']),
            Err(Error::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn test_encode_round_trip() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let encoder = encoder_with(Arc::clone(&registry)).await;

        for order in Order::samples() {
            let payload = encoder.encode("orders", &order).await.unwrap();
            let (schema_id, decoded) = decode_record::<Order>(&payload).unwrap();

            assert_eq!(decoded, order);
            assert_eq!(registry.schema_by_id(schema_id), Some(Order::json_schema()));
        }
    }

    #[tokio::test]
    async fn test_schema_resolved_once_per_topic() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let encoder = encoder_with(Arc::clone(&registry)).await;
        let order = Order::new("Rua Jacinto", 12, 12345);

        assert_eq!(encoder.cached_schema_id("orders").await, None);
        encoder.encode("orders", &order).await.unwrap();
        encoder.encode("orders", &order).await.unwrap();
        encoder.encode("returns", &order).await.unwrap();

        assert_eq!(encoder.cached_schema_id("orders").await, Some(1));
        assert_eq!(encoder.cached_schema_id("returns").await, Some(2));
        assert_eq!(
            registry.subjects(),
            vec!["orders-value".to_string(), "returns-value".to_string()]
        );
    }

    #[tokio::test]
    async fn test_subjects_listed_once() {
        let registry = InMemorySchemaRegistry::new();

        registry.register("orders-value", &Order::json_schema()).await.unwrap();
        registry.register("returns-value", &Order::json_schema()).await.unwrap();
        let second = registry
            .register("orders-value", &Shipment::json_schema())
            .await
            .unwrap();

        assert_eq!(second, 3);
        assert_eq!(
            registry.subjects(),
            vec!["orders-value".to_string(), "returns-value".to_string()]
        );
    }

    #[tokio::test]
    async fn test_record_violating_schema_is_encoding_error() {
        let encoder = encoder_with(Arc::new(InMemorySchemaRegistry::new())).await;

        let result = encoder.encode("shipments", &Shipment { weight: 0 }).await;
        assert!(matches!(result, Err(Error::Encoding(msg)) if msg.contains("schema 1")));
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected() {
        let encoder = encoder_with(Arc::new(InMemorySchemaRegistry::new())).await;
        let order = Order::new("Rua Jacinto", 12, 12345);

        assert!(matches!(
            encoder.encode("", &order).await,
            Err(Error::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_fails_when_registry_unreachable() {
        let result =
            SchemaRegistryEncoder::connect(Arc::new(InMemorySchemaRegistry::unreachable())).await;
        assert!(matches!(result, Err(Error::SchemaRegistration(_))));
    }

    #[tokio::test]
    async fn test_http_registry_connection_refused() {
        let config = SchemaRegistryConfig {
            url: "http://127.0.0.1:1".to_string(),
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            request_timeout_secs: 2,
        };
        let registry = HttpSchemaRegistry::new(&config).unwrap();

        let result = SchemaRegistryEncoder::connect(Arc::new(registry)).await;
        assert!(matches!(result, Err(Error::SchemaRegistration(_))));
    }

    #[tokio::test]
    #[ignore] // Requires a running schema registry
    async fn test_http_registry_register() {
        let config = SchemaRegistryConfig {
            url: "http://localhost:8081".to_string(),
            username: None,
            password: None,
            request_timeout_secs: 5,
        };
        let registry = HttpSchemaRegistry::new(&config).unwrap();

        registry.check_connection().await.unwrap();
        let first = registry
            .register("order-publisher-test-value", &Order::json_schema())
            .await
            .unwrap();
        let second = registry
            .register("order-publisher-test-value", &Order::json_schema())
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
