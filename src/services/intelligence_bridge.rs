//! Intelligence Bridge: correlation between in-process completion requests
//! and externally fulfilled responses.
//!
//! The server never calls a model. `delegate` registers a pending entry and
//! returns an envelope the transport surfaces to the client; the client
//! answers through `process_response`, which validates the payload against
//! the registered schema and wakes the waiter. Each entry is identified
//! solely by its request id; there is no ordering across requests.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::domain::error::{ForestError, ForestResult};

/// Wire type tag for outbound requests.
pub const REQUEST_TYPE: &str = "CLAUDE_INTELLIGENCE_REQUEST";
/// Wire type tag for normalized responses.
pub const RESPONSE_TYPE: &str = "INTELLIGENCE_RESPONSE";

/// Parameters for one delegation.
#[derive(Debug, Clone)]
pub struct DelegateParams {
    pub system: String,
    pub user: String,
    pub schema: Option<Value>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Outbound request envelope, surfaced verbatim to the external completer.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: &'static str,
    pub request_id: String,
    pub prompt: PromptEnvelope,
    pub response_format: &'static str,
    pub processing_instructions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptEnvelope {
    pub system: String,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Normalized response returned to the `process_response` caller.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: &'static str,
    pub data: Value,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub received_at: DateTime<Utc>,
}

struct PendingRequest {
    schema: Option<Value>,
    deadline: DateTime<Utc>,
    resolver: oneshot::Sender<ForestResult<Value>>,
}

pub struct IntelligenceBridge {
    pending: Mutex<HashMap<String, PendingRequest>>,
    waiters: Mutex<HashMap<String, oneshot::Receiver<ForestResult<Value>>>>,
    default_timeout: Duration,
    /// Envelopes queued for the transport to surface to the client.
    outbound: Mutex<Vec<RequestEnvelope>>,
    /// When attached, envelopes are pushed to the transport immediately
    /// instead of waiting in the queue.
    outbound_tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<RequestEnvelope>>>,
}

impl IntelligenceBridge {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            default_timeout,
            outbound: Mutex::new(Vec::new()),
            outbound_tx: Mutex::new(None),
        }
    }

    /// Attach the transport's envelope channel.
    pub async fn set_outbound(&self, tx: tokio::sync::mpsc::UnboundedSender<RequestEnvelope>) {
        *self.outbound_tx.lock().await = Some(tx);
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a pending request and return its envelope.
    pub async fn delegate(&self, params: DelegateParams) -> RequestEnvelope {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let deadline = Utc::now()
            + chrono::Duration::milliseconds(
                i64::try_from(self.default_timeout.as_millis()).unwrap_or(i64::MAX),
            );
        self.pending.lock().await.insert(
            request_id.clone(),
            PendingRequest {
                schema: params.schema.clone(),
                deadline,
                resolver: tx,
            },
        );
        self.waiters.lock().await.insert(request_id.clone(), rx);

        let envelope = RequestEnvelope {
            envelope_type: REQUEST_TYPE,
            request_id,
            prompt: PromptEnvelope {
                system: params.system,
                user: params.user,
                schema: params.schema,
            },
            response_format: "structured_json",
            processing_instructions: format!(
                "Respond with a single JSON object (max {} tokens, temperature {:.2}). \
                 Return it via the llm/process_response tool with this request_id.",
                params.max_tokens, params.temperature
            ),
        };
        let sender = self.outbound_tx.lock().await;
        match sender.as_ref() {
            Some(tx) if tx.send(envelope.clone()).is_ok() => {}
            _ => self.outbound.lock().await.push(envelope.clone()),
        }
        envelope
    }

    /// Drain envelopes queued since the last call. The transport writes
    /// them to the client as notifications.
    pub async fn drain_outbound(&self) -> Vec<RequestEnvelope> {
        std::mem::take(&mut *self.outbound.lock().await)
    }

    /// Suspend until the matching `process_response` arrives or the timeout
    /// elapses. On timeout the pending entry is removed.
    pub async fn await_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> ForestResult<Value> {
        let receiver = self
            .waiters
            .lock()
            .await
            .remove(request_id)
            .ok_or_else(|| {
                ForestError::Validation(format!("unknown request_id '{request_id}'"))
            })?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ForestError::Validation(format!(
                "request '{request_id}' was cancelled"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(request_id);
                Err(ForestError::Timeout {
                    request_id: request_id.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }

    /// Correlate a client response with its pending entry, validate it, and
    /// wake the waiter. The entry is removed whether validation passes or
    /// fails; an unknown id is an error.
    pub async fn process_response(
        &self,
        request_id: &str,
        response: &str,
    ) -> ForestResult<ResponseEnvelope> {
        let entry = self
            .pending
            .lock()
            .await
            .remove(request_id)
            .ok_or_else(|| {
                ForestError::Validation(format!("unknown request_id '{request_id}'"))
            })?;

        let parsed: Value = match serde_json::from_str(response) {
            Ok(value) => value,
            Err(e) => {
                if entry.schema.is_some() {
                    let detail =
                        format!("response for '{request_id}' is not valid JSON: {e}");
                    let _ = entry
                        .resolver
                        .send(Err(ForestError::Validation(detail.clone())));
                    self.waiters.lock().await.remove(request_id);
                    return Err(ForestError::Validation(detail));
                }
                serde_json::json!({ "content": response })
            }
        };

        if let Some(schema) = &entry.schema {
            if let Err(detail) = validate_schema(&parsed, schema) {
                let _ = entry
                    .resolver
                    .send(Err(ForestError::Validation(detail.clone())));
                self.waiters.lock().await.remove(request_id);
                return Err(ForestError::Validation(detail));
            }
        }

        let _ = entry.resolver.send(Ok(parsed.clone()));
        Ok(ResponseEnvelope {
            envelope_type: RESPONSE_TYPE,
            data: parsed,
            metadata: ResponseMetadata {
                request_id: request_id.to_string(),
                received_at: Utc::now(),
            },
        })
    }

    /// Drop entries whose deadline has passed without an awaiting caller.
    /// Returns the number removed.
    pub async fn expire_stale(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let stale: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| entry.deadline < now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            pending.remove(id);
            self.waiters.lock().await.remove(id);
        }
        stale.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Structural schema validation: every `required` key must be present,
/// typed properties check primitive kind, `enum` fields check membership.
/// Unknown keys are allowed. Errors name the offending key.
pub fn validate_schema(value: &Value, schema: &Value) -> Result<(), String> {
    let Some(object) = value.as_object() else {
        return Err("response must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required key '{key}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, prop) in properties {
            let Some(actual) = object.get(key) else {
                continue;
            };
            if let Some(expected) = prop.get("type").and_then(Value::as_str) {
                if !kind_matches(actual, expected) {
                    return Err(format!(
                        "key '{key}' must be of kind '{expected}'"
                    ));
                }
            }
            if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
                if !allowed.contains(actual) {
                    return Err(format!(
                        "key '{key}' must be one of the enumerated values"
                    ));
                }
            }
        }
    }

    Ok(())
}

fn kind_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bridge() -> IntelligenceBridge {
        IntelligenceBridge::new(Duration::from_millis(200))
    }

    fn params(schema: Option<Value>) -> DelegateParams {
        DelegateParams {
            system: "You decompose goals.".to_string(),
            user: "Decompose this goal.".to_string(),
            schema,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }

    #[tokio::test]
    async fn test_delegate_produces_wire_envelope() {
        let bridge = bridge();
        let envelope = bridge.delegate(params(None)).await;
        assert_eq!(envelope.envelope_type, "CLAUDE_INTELLIGENCE_REQUEST");
        assert_eq!(envelope.response_format, "structured_json");
        assert!(!envelope.request_id.is_empty());
        assert_eq!(bridge.pending_count().await, 1);

        let drained = bridge.drain_outbound().await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].request_id, envelope.request_id);
        assert!(bridge.drain_outbound().await.is_empty());
    }

    #[tokio::test]
    async fn test_response_resolves_waiter() {
        let bridge = bridge();
        let envelope = bridge.delegate(params(None)).await;

        let normalized = bridge
            .process_response(&envelope.request_id, r#"{"answer": 42}"#)
            .await
            .unwrap();
        assert_eq!(normalized.envelope_type, "INTELLIGENCE_RESPONSE");
        assert_eq!(normalized.data["answer"], 42);

        let resolved = bridge.await_response(&envelope.request_id, None).await.unwrap();
        assert_eq!(resolved["answer"], 42);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_plain_text_wraps_when_no_schema() {
        let bridge = bridge();
        let envelope = bridge.delegate(params(None)).await;
        let normalized = bridge
            .process_response(&envelope.request_id, "just words")
            .await
            .unwrap();
        assert_eq!(normalized.data["content"], "just words");
    }

    #[tokio::test]
    async fn test_schema_failure_names_missing_key_and_removes_entry() {
        let bridge = bridge();
        let schema = json!({"required": ["title", "description"]});
        let envelope = bridge.delegate(params(Some(schema))).await;

        let err = bridge
            .process_response(&envelope.request_id, r#"{"title": "x"}"#)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "ValidationError");
        assert!(err.to_string().contains("description"));
        assert_eq!(bridge.pending_count().await, 0);

        // The waiter observes the same failure rather than hanging.
        let waited = bridge.await_response(&envelope.request_id, None).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_unknown_request_id_rejected() {
        let bridge = bridge();
        let err = bridge.process_response("nope", "{}").await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let bridge = bridge();
        let envelope = bridge.delegate(params(None)).await;

        let err = bridge
            .await_response(&envelope.request_id, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "Timeout");
        assert_eq!(bridge.pending_count().await, 0);

        // A late response is now unknown.
        assert!(bridge
            .process_response(&envelope.request_id, "{}")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_delegations_correlate_by_id() {
        let bridge = std::sync::Arc::new(bridge());
        let first = bridge.delegate(params(None)).await;
        let second = bridge.delegate(params(None)).await;

        bridge
            .process_response(&second.request_id, r#"{"n": 2}"#)
            .await
            .unwrap();
        bridge
            .process_response(&first.request_id, r#"{"n": 1}"#)
            .await
            .unwrap();

        assert_eq!(
            bridge.await_response(&first.request_id, None).await.unwrap()["n"],
            1
        );
        assert_eq!(
            bridge.await_response(&second.request_id, None).await.unwrap()["n"],
            2
        );
    }

    #[tokio::test]
    async fn test_expire_stale_removes_overdue_entries() {
        let bridge = IntelligenceBridge::new(Duration::from_millis(0));
        bridge.delegate(params(None)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(bridge.expire_stale().await, 1);
        assert_eq!(bridge.pending_count().await, 0);
    }

    #[test]
    fn test_validate_schema_kinds_and_enums() {
        let schema = json!({
            "required": ["name", "count"],
            "properties": {
                "name": {"type": "string"},
                "count": {"type": "integer"},
                "level": {"type": "string", "enum": ["simple", "complex"]}
            }
        });

        assert!(validate_schema(&json!({"name": "a", "count": 3}), &schema).is_ok());
        assert!(
            validate_schema(&json!({"name": "a", "count": 3, "extra": true}), &schema).is_ok(),
            "unknown keys are allowed"
        );

        let err = validate_schema(&json!({"name": "a"}), &schema).unwrap_err();
        assert!(err.contains("count"));

        let err = validate_schema(&json!({"name": "a", "count": "three"}), &schema).unwrap_err();
        assert!(err.contains("count"));
        assert!(err.contains("integer"));

        let err = validate_schema(
            &json!({"name": "a", "count": 1, "level": "epic"}),
            &schema,
        )
        .unwrap_err();
        assert!(err.contains("level"));

        assert!(validate_schema(&json!([1, 2]), &schema).is_err());
    }
}
