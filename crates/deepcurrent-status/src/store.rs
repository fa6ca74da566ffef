//! Storage backends for the status record.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use chrono::Utc;
use deepcurrent::error::{Error, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

/// Key/value record store keyed by session id. Values are JSON; the
/// DynamoDB backend maps them onto attribute values.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Set the given top-level fields on the session's record, creating it
    /// if absent. An `updated_at` timestamp is always written alongside.
    async fn update(&self, session_id: &str, fields: Vec<(String, Value)>) -> Result<()>;

    /// Read the full record.
    async fn get(&self, session_id: &str) -> Result<Option<Value>>;
}

/// DynamoDB-backed status store.
///
/// Table schema: partition key `session_id` (String); all other fields are
/// additive attributes.
#[derive(Clone)]
pub struct DynamoStatusStore {
    client: DynamoDbClient,
    table_name: String,
}

impl DynamoStatusStore {
    /// Wrap a configured SDK client and table.
    pub fn new(client: DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Build from the ambient AWS configuration.
    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(DynamoDbClient::new(&config), table_name)
    }
}

#[async_trait]
impl StatusStore for DynamoStatusStore {
    async fn update(&self, session_id: &str, fields: Vec<(String, Value)>) -> Result<()> {
        let mut update_parts = vec!["#updated_at = :updated_at".to_string()];
        let mut names = HashMap::from([("#updated_at".to_string(), "updated_at".to_string())]);
        let mut values = HashMap::from([(
            ":updated_at".to_string(),
            AttributeValue::S(Utc::now().to_rfc3339()),
        )]);

        for (i, (key, value)) in fields.into_iter().enumerate() {
            let name_token = format!("#f{i}");
            let value_token = format!(":f{i}");
            update_parts.push(format!("{name_token} = {value_token}"));
            names.insert(name_token, key);
            values.insert(value_token, json_to_attr(&value));
        }

        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("session_id", AttributeValue::S(session_id.to_string()))
            .update_expression(format!("SET {}", update_parts.join(", ")))
            .set_expression_attribute_names(Some(names))
            .set_expression_attribute_values(Some(values))
            .send()
            .await
            .map_err(|e| Error::store(format!("status update failed: {e}")))?;
        debug!(session_id, "status record updated");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Value>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("session_id", AttributeValue::S(session_id.to_string()))
            .send()
            .await
            .map_err(|e| Error::store(format!("status read failed: {e}")))?;
        Ok(output.item.map(|item| {
            Value::Object(
                item.iter()
                    .map(|(k, v)| (k.clone(), attr_to_json(v)))
                    .collect(),
            )
        }))
    }
}

/// Convert JSON into a DynamoDB attribute value.
pub fn json_to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(arr) => AttributeValue::L(arr.iter().map(json_to_attr).collect()),
        Value::Object(obj) => AttributeValue::M(
            obj.iter()
                .map(|(k, v)| (k.clone(), json_to_attr(v)))
                .collect(),
        ),
    }
}

/// Convert a DynamoDB attribute value into JSON.
pub fn attr_to_json(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => n
            .parse::<serde_json::Number>()
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(n.clone())),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(list) => Value::Array(list.iter().map(attr_to_json).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), attr_to_json(v)))
                .collect(),
        ),
        AttributeValue::Ss(set) => {
            Value::Array(set.iter().map(|s| Value::String(s.clone())).collect())
        }
        other => Value::String(format!("{other:?}")),
    }
}

/// In-process status store for tests and offline runs.
#[derive(Default)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<String, Map<String, Value>>>,
}

impl InMemoryStatusStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field directly, the way an external caller (UI backend)
    /// would; used in tests to request cancellation.
    pub fn set_field(&self, session_id: &str, key: &str, value: Value) {
        self.records
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn update(&self, session_id: &str, fields: Vec<(String, Value)>) -> Result<()> {
        let mut records = self.records.lock();
        let record = records.entry(session_id.to_string()).or_default();
        record.insert(
            "updated_at".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        for (key, value) in fields {
            record.insert(key, value);
        }
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<Value>> {
        Ok(self
            .records
            .lock()
            .get(session_id)
            .map(|r| Value::Object(r.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_attr_roundtrip() {
        let value = json!({
            "status": "processing",
            "dimension_count": 3,
            "elapsed_time": 12.5,
            "dimensions": ["a", "b"],
            "flags": { "done": false },
            "nothing": null
        });
        let attr = json_to_attr(&value);
        assert_eq!(attr_to_json(&attr), value);
    }

    #[tokio::test]
    async fn in_memory_update_merges_fields() {
        let store = InMemoryStatusStore::new();
        store
            .update("s1", vec![("status".to_string(), json!("processing"))])
            .await
            .unwrap();
        store
            .update("s1", vec![("current_stage".to_string(), json!("topic_analysis"))])
            .await
            .unwrap();
        let record = store.get("s1").await.unwrap().unwrap();
        assert_eq!(record["status"], "processing");
        assert_eq!(record["current_stage"], "topic_analysis");
        assert!(record.get("updated_at").is_some());
    }
}
