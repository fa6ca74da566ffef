//! The append-only per-session memory event store.
//!
//! Events carry a JSON blob payload plus searchable string metadata, keyed
//! by `(memory_id, session_id, actor_id)`. The service enforces a hard
//! 100 KB payload limit and a restricted metadata character class; the
//! [`crate::tracker::EventTracker`] truncates and sanitizes before calling
//! in here, and the in-memory test double enforces the same limits so the
//! tests mean something.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepcurrent::error::{Error, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

/// Hard payload limit per event (100 KB).
pub const MAX_EVENT_PAYLOAD_BYTES: usize = 100 * 1024;

/// A request to append one event.
#[derive(Debug, Clone)]
pub struct CreateEventRequest {
    /// Memory log id.
    pub memory_id: String,
    /// Actor (user) id.
    pub actor_id: String,
    /// Session id.
    pub session_id: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Serialized JSON payload blob.
    pub blob: String,
    /// Searchable metadata values.
    pub metadata: HashMap<String, String>,
}

/// Query for [`MemoryStore::list_events`].
#[derive(Debug, Clone)]
pub struct ListEventsQuery {
    /// Memory log id.
    pub memory_id: String,
    /// Session id.
    pub session_id: String,
    /// Actor (user) id.
    pub actor_id: String,
    /// Whether payload blobs are returned.
    pub include_payloads: bool,
    /// Page size (service default 100).
    pub max_results: u32,
    /// Continuation token from a previous page.
    pub next_token: Option<String>,
}

impl ListEventsQuery {
    /// Query for a whole session with payloads.
    pub fn for_session(
        memory_id: impl Into<String>,
        session_id: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            memory_id: memory_id.into(),
            session_id: session_id.into(),
            actor_id: actor_id.into(),
            include_payloads: true,
            max_results: 100,
            next_token: None,
        }
    }
}

/// A stored event.
#[derive(Debug, Clone)]
pub struct MemoryEvent {
    /// Store-assigned event id.
    pub event_id: String,
    /// Event timestamp.
    pub timestamp: DateTime<Utc>,
    /// Payload blob, present when the query asked for payloads.
    pub blob: Option<String>,
    /// Searchable metadata.
    pub metadata: HashMap<String, String>,
}

/// One page of events.
#[derive(Debug, Clone)]
pub struct EventPage {
    /// Events in append order.
    pub events: Vec<MemoryEvent>,
    /// Continuation token when more pages exist.
    pub next_token: Option<String>,
}

/// The memory store interface.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Append one event; returns the store-assigned event id.
    async fn create_event(&self, request: CreateEventRequest) -> Result<String>;

    /// List a session's events, paginated.
    async fn list_events(&self, query: ListEventsQuery) -> Result<EventPage>;
}

/// AgentCore Memory data-plane client (signed HTTPS).
pub struct AgentCoreMemory {
    http: reqwest::Client,
    signer: crate::signer::RequestSigner,
    endpoint: String,
}

impl AgentCoreMemory {
    /// Client for a region's data plane.
    pub fn new(region: &str, signer: crate::signer::RequestSigner) -> Self {
        Self {
            http: reqwest::Client::new(),
            signer,
            endpoint: format!("https://bedrock-agentcore.{region}.amazonaws.com"),
        }
    }

    /// Override the endpoint (tests, private links).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        let body_bytes = serde_json::to_vec(body)
            .map_err(|e| Error::other(format!("failed to encode memory request: {e}")))?;
        let signed = self.signer.signed_json_post(url, body_bytes).await?;
        let request = reqwest::Request::try_from(signed)
            .map_err(|e| Error::other(format!("failed to convert request: {e}")))?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| Error::store(format!("memory store connection error: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::store(format!("memory store read failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::store(format!("memory store error ({status}): {text}")));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::store(format!("memory store returned invalid JSON: {e}")))
    }
}

#[async_trait]
impl MemoryStore for AgentCoreMemory {
    async fn create_event(&self, request: CreateEventRequest) -> Result<String> {
        if request.blob.len() > MAX_EVENT_PAYLOAD_BYTES {
            return Err(Error::store(format!(
                "event payload of {} bytes exceeds the {MAX_EVENT_PAYLOAD_BYTES}-byte limit",
                request.blob.len()
            )));
        }

        let url = format!("{}/memories/{}/events", self.endpoint, request.memory_id);
        let metadata: serde_json::Map<String, Value> = request
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), json!({ "stringValue": v })))
            .collect();
        let body = json!({
            "actorId": request.actor_id,
            "sessionId": request.session_id,
            "eventTimestamp": request.timestamp.timestamp_millis() as f64 / 1000.0,
            "payload": [{ "blob": request.blob }],
            "metadata": metadata,
        });

        let response = self.post(&url, &body).await?;
        let event_id = response
            .pointer("/event/eventId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::store("memory store response carried no eventId"))?
            .to_string();
        debug!(event_id, "created memory event");
        Ok(event_id)
    }

    async fn list_events(&self, query: ListEventsQuery) -> Result<EventPage> {
        let url = format!(
            "{}/memories/{}/sessions/{}/actors/{}/events/list",
            self.endpoint, query.memory_id, query.session_id, query.actor_id
        );
        let mut body = json!({
            "maxResults": query.max_results,
            "includePayloads": query.include_payloads,
        });
        if let Some(token) = &query.next_token {
            body["nextToken"] = json!(token);
        }

        let response = self.post(&url, &body).await?;
        let events = response
            .get("events")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .map(|e| MemoryEvent {
                        event_id: e
                            .get("eventId")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        timestamp: e
                            .get("eventTimestamp")
                            .and_then(Value::as_f64)
                            .and_then(|secs| {
                                DateTime::from_timestamp_millis((secs * 1000.0) as i64)
                            })
                            .unwrap_or_else(Utc::now),
                        blob: e
                            .pointer("/payload/0/blob")
                            .and_then(Value::as_str)
                            .map(ToString::to_string),
                        metadata: e
                            .get("metadata")
                            .and_then(Value::as_object)
                            .map(|m| {
                                m.iter()
                                    .filter_map(|(k, v)| {
                                        v.get("stringValue")
                                            .and_then(Value::as_str)
                                            .map(|s| (k.clone(), s.to_string()))
                                    })
                                    .collect()
                            })
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EventPage {
            events,
            next_token: response
                .get("nextToken")
                .and_then(Value::as_str)
                .map(ToString::to_string),
        })
    }
}

/// In-process store for tests and offline runs. Enforces the same payload
/// limit as the service.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    events: Mutex<Vec<(CreateEventRequest, String)>>,
}

impl InMemoryMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored requests, for assertions.
    pub fn stored(&self) -> Vec<CreateEventRequest> {
        self.events.lock().iter().map(|(r, _)| r.clone()).collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn create_event(&self, request: CreateEventRequest) -> Result<String> {
        if request.blob.len() > MAX_EVENT_PAYLOAD_BYTES {
            return Err(Error::store(format!(
                "event payload of {} bytes exceeds the {MAX_EVENT_PAYLOAD_BYTES}-byte limit",
                request.blob.len()
            )));
        }
        let event_id = format!("evt-{}", uuid::Uuid::new_v4());
        self.events.lock().push((request, event_id.clone()));
        Ok(event_id)
    }

    async fn list_events(&self, query: ListEventsQuery) -> Result<EventPage> {
        let events = self
            .events
            .lock()
            .iter()
            .filter(|(r, _)| r.session_id == query.session_id && r.actor_id == query.actor_id)
            .map(|(r, id)| MemoryEvent {
                event_id: id.clone(),
                timestamp: r.timestamp,
                blob: query.include_payloads.then(|| r.blob.clone()),
                metadata: r.metadata.clone(),
            })
            .collect();
        Ok(EventPage {
            events,
            next_token: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_rejects_oversize_payloads() {
        let store = InMemoryMemoryStore::new();
        let request = CreateEventRequest {
            memory_id: "mem".to_string(),
            actor_id: "user".to_string(),
            session_id: "sess".to_string(),
            timestamp: Utc::now(),
            blob: "x".repeat(MAX_EVENT_PAYLOAD_BYTES + 1),
            metadata: HashMap::new(),
        };
        assert!(store.create_event(request).await.is_err());
    }

    #[tokio::test]
    async fn list_filters_by_session_and_actor() {
        let store = InMemoryMemoryStore::new();
        for (session, actor) in [("s1", "u1"), ("s1", "u1"), ("s2", "u1"), ("s1", "u2")] {
            store
                .create_event(CreateEventRequest {
                    memory_id: "mem".to_string(),
                    actor_id: actor.to_string(),
                    session_id: session.to_string(),
                    timestamp: Utc::now(),
                    blob: "{}".to_string(),
                    metadata: HashMap::new(),
                })
                .await
                .unwrap();
        }
        let page = store
            .list_events(ListEventsQuery::for_session("mem", "s1", "u1"))
            .await
            .unwrap();
        assert_eq!(page.events.len(), 2);
        assert!(page.events.iter().all(|e| e.blob.is_some()));
    }
}
