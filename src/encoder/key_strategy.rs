use serde_json::Value;
use tracing::debug;

/// How the message key is derived from a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum KeyStrategy {
    /// A single field, addressed by a dotted path (`customer.id`).
    Field(String),
    /// Several fields joined with `:`.
    Composite(Vec<String>),
    #[default]
    None,
}

impl KeyStrategy {
    pub fn from_fields(fields: &[String]) -> Self {
        match fields {
            [] => KeyStrategy::None,
            [field] => KeyStrategy::Field(field.clone()),
            _ => KeyStrategy::Composite(fields.to_vec()),
        }
    }

    pub fn is_keyed(&self) -> bool {
        !matches!(self, KeyStrategy::None)
    }

    pub fn extract_key(&self, record: &Value) -> Option<String> {
        match self {
            KeyStrategy::Field(path) => extract_field_value(record, path),
            KeyStrategy::Composite(fields) => extract_composite_key(record, fields),
            KeyStrategy::None => None,
        }
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut current = record;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}

fn extract_composite_key(record: &Value, fields: &[String]) -> Option<String> {
    let mut key_parts = Vec::with_capacity(fields.len());

    for field in fields {
        match extract_field_value(record, field) {
            Some(value) => key_parts.push(value),
            None => {
                debug!("Missing field '{}' for composite key", field);
                return None;
            }
        }
    }

    if key_parts.is_empty() {
        None
    } else {
        Some(key_parts.join(":"))
    }
}
