use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_SCHEMA_REGISTRY_URL: &str = "URL_SCHEMA_REGISTRY";
pub const ENV_SCHEMA_REGISTRY_USERNAME: &str = "USERNAME_SCHEMA_REGISTRY";
pub const ENV_SCHEMA_REGISTRY_PASSWORD: &str = "PASSWORD_SCHEMA_REGISTRY";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub schema_registry: Option<SchemaRegistryConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u32,
    /// Java-style `key=value` file with librdkafka settings (security, SASL, ...).
    #[serde(default)]
    pub client_properties: Option<PathBuf>,
    /// Raw librdkafka settings, applied after the properties file.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_message_count")]
    pub message_count: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default)]
    pub schema_validation: bool,
    /// Record fields used as the message key; empty means unkeyed.
    #[serde(default)]
    pub key_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SchemaRegistryConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ORDER_PUBLISHER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Schema registry settings from the config file, falling back to the
    /// `*_SCHEMA_REGISTRY` environment variables.
    pub fn schema_registry_settings(&self) -> Result<SchemaRegistryConfig> {
        match &self.schema_registry {
            Some(registry) => {
                registry.validate()?;
                Ok(registry.clone())
            }
            None => SchemaRegistryConfig::from_env(),
        }
    }
}

impl KafkaConfig {
    /// Flattens this section into librdkafka settings.
    ///
    /// Precedence, lowest first: typed tuning options, the client properties
    /// file, the `properties` table, and finally `brokers` when non-empty.
    pub fn client_settings(&self) -> Result<BTreeMap<String, String>> {
        let mut settings = BTreeMap::new();
        settings.insert("compression.type".to_string(), self.compression.clone());
        settings.insert("acks".to_string(), self.acks.clone());
        settings.insert("linger.ms".to_string(), self.linger_ms.to_string());
        settings.insert(
            "message.timeout.ms".to_string(),
            self.message_timeout_ms.to_string(),
        );

        if let Some(path) = &self.client_properties {
            settings.extend(read_client_properties(path)?);
        }

        settings.extend(
            self.properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        if !self.brokers.is_empty() {
            settings.insert("bootstrap.servers".to_string(), self.brokers.join(","));
        }

        match settings.get("bootstrap.servers") {
            Some(servers) if !servers.trim().is_empty() => Ok(settings),
            _ => Err(Error::Config(
                "no brokers configured: set kafka.brokers or bootstrap.servers".to_string(),
            )),
        }
    }
}

impl PublisherConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            message_count: default_message_count(),
            flush_timeout_ms: default_flush_timeout_ms(),
            schema_validation: false,
            key_fields: Vec::new(),
        }
    }
}

impl SchemaRegistryConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the settings from a variable lookup. All three variables must
    /// be present and non-empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        match (
            read(ENV_SCHEMA_REGISTRY_URL),
            read(ENV_SCHEMA_REGISTRY_USERNAME),
            read(ENV_SCHEMA_REGISTRY_PASSWORD),
        ) {
            (Some(url), Some(username), Some(password)) => Ok(Self {
                url,
                username: Some(username),
                password: Some(password),
                request_timeout_secs: default_request_timeout_secs(),
            }),
            _ => Err(Error::Config(format!(
                "schema registry requires {}, {} and {} to be set",
                ENV_SCHEMA_REGISTRY_URL, ENV_SCHEMA_REGISTRY_USERNAME, ENV_SCHEMA_REGISTRY_PASSWORD
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("schema_registry.url must not be empty".to_string()));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(Error::Config(
                "schema_registry.username and schema_registry.password must be set together"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reads a Java-style client properties file.
///
/// Blank lines and lines starting with `#` are skipped. Every other line
/// must be `key=value`.
pub fn read_client_properties<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, String>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut properties = BTreeMap::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            Error::Config(format!(
                "{}:{}: expected key=value",
                path.display(),
                index + 1
            ))
        })?;
        properties.insert(key.trim().to_string(), value.trim().to_string());
    }

    debug!(
        path = %path.display(),
        count = properties.len(),
        "Loaded client properties"
    );
    Ok(properties)
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u32 {
    30_000
}

fn default_topic() -> String {
    "orders".to_string()
}

fn default_message_count() -> usize {
    3
}

fn default_flush_timeout_ms() -> u64 {
    15_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_config_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "publisher.toml",
            r#"
            [kafka]
            brokers = ["localhost:9092"]
            "#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.kafka.brokers, vec!["localhost:9092".to_string()]);
        assert_eq!(config.kafka.acks, "all");
        assert_eq!(config.publisher.topic, "orders");
        assert_eq!(config.publisher.message_count, 3);
        assert_eq!(config.publisher.flush_timeout(), Duration::from_secs(15));
        assert!(!config.publisher.schema_validation);
        assert!(config.schema_registry.is_none());
    }

    #[test]
    fn test_load_config_with_registry_section() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "publisher.toml",
            r#"
            [kafka]
            brokers = ["b1:9092", "b2:9092"]

            [publisher]
            topic = "orders-v2"
            message_count = 10
            schema_validation = true
            key_fields = ["orderId"]

            [schema_registry]
            url = "http://localhost:8081"
            "#,
        );

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.publisher.topic, "orders-v2");
        assert_eq!(config.publisher.key_fields, vec!["orderId".to_string()]);

        let registry = config.schema_registry_settings().unwrap();
        assert_eq!(registry.url, "http://localhost:8081");
        assert_eq!(registry.username, None);
        assert_eq!(registry.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_missing_config_file_is_config_error() {
        let result = Config::from_file("/nonexistent/publisher.toml");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_client_properties_file() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "client.properties",
            "# Kafka\nbootstrap.servers=pkc-1.example.com:9092\n\nsecurity.protocol = SASL_SSL\nsasl.mechanisms=PLAIN\n",
        );

        let properties = read_client_properties(&path).unwrap();
        assert_eq!(properties.len(), 3);
        assert_eq!(properties["bootstrap.servers"], "pkc-1.example.com:9092");
        assert_eq!(properties["security.protocol"], "SASL_SSL");
    }

    #[test]
    fn test_client_properties_rejects_malformed_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "client.properties", "bootstrap.servers\n");

        let result = read_client_properties(&path);
        assert!(matches!(result, Err(Error::Config(msg)) if msg.contains(":1:")));
    }

    #[test]
    fn test_client_settings_precedence() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "client.properties",
            "bootstrap.servers=from-file:9092\nacks=1\nclient.id=file\n",
        );

        let mut kafka = KafkaConfig {
            brokers: Vec::new(),
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: 0,
            message_timeout_ms: 1000,
            client_properties: Some(path),
            properties: HashMap::from([("client.id".to_string(), "table".to_string())]),
        };

        let settings = kafka.client_settings().unwrap();
        assert_eq!(settings["bootstrap.servers"], "from-file:9092");
        assert_eq!(settings["acks"], "1");
        assert_eq!(settings["client.id"], "table");

        kafka.brokers = vec!["explicit:9092".to_string()];
        let settings = kafka.client_settings().unwrap();
        assert_eq!(settings["bootstrap.servers"], "explicit:9092");
    }

    #[test]
    fn test_client_settings_require_brokers() {
        let kafka = KafkaConfig {
            brokers: Vec::new(),
            compression: default_compression(),
            acks: default_acks(),
            linger_ms: 0,
            message_timeout_ms: 1000,
            client_properties: None,
            properties: HashMap::new(),
        };

        assert!(matches!(kafka.client_settings(), Err(Error::Config(_))));
    }

    #[test]
    fn test_schema_registry_from_lookup() {
        let vars = HashMap::from([
            (ENV_SCHEMA_REGISTRY_URL, "https://psrc.example.com"),
            (ENV_SCHEMA_REGISTRY_USERNAME, "key"),
            (ENV_SCHEMA_REGISTRY_PASSWORD, "secret"),
        ]);

        let registry =
            SchemaRegistryConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(registry.url, "https://psrc.example.com");
        assert_eq!(registry.username.as_deref(), Some("key"));
        assert_eq!(registry.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_schema_registry_from_lookup_requires_all_vars() {
        let vars = HashMap::from([
            (ENV_SCHEMA_REGISTRY_URL, "https://psrc.example.com"),
            (ENV_SCHEMA_REGISTRY_USERNAME, "key"),
            (ENV_SCHEMA_REGISTRY_PASSWORD, ""),
        ]);

        let result =
            SchemaRegistryConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_schema_registry_credentials_come_in_pairs() {
        let registry = SchemaRegistryConfig {
            url: "http://localhost:8081".to_string(),
            username: Some("user".to_string()),
            password: None,
            request_timeout_secs: 5,
        };

        assert!(registry.validate().is_err());
    }
}
