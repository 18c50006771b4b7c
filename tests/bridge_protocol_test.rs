//! Intelligence bridge protocol behavior at the service boundary.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use forest::services::intelligence_bridge::{DelegateParams, IntelligenceBridge};

fn params(schema: Option<serde_json::Value>) -> DelegateParams {
    DelegateParams {
        system: "You produce structured plans.".to_string(),
        user: "Plan the next step.".to_string(),
        schema,
        max_tokens: 512,
        temperature: 0.5,
    }
}

#[tokio::test]
async fn test_schema_rejection_names_key_and_clears_pending() {
    let bridge = IntelligenceBridge::new(Duration::from_secs(1));
    let envelope = bridge
        .delegate(params(Some(json!({"required": ["title", "description"]}))))
        .await;
    assert_eq!(envelope.envelope_type, "CLAUDE_INTELLIGENCE_REQUEST");

    let err = bridge
        .process_response(&envelope.request_id, r#"{"title": "x"}"#)
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "ValidationError");
    assert!(err.to_string().contains("description"));
    assert_eq!(bridge.pending_count().await, 0);
}

#[tokio::test]
async fn test_valid_response_round_trips_to_waiter() {
    let bridge = Arc::new(IntelligenceBridge::new(Duration::from_secs(1)));
    let envelope = bridge
        .delegate(params(Some(json!({
            "required": ["strategic_branches"],
            "properties": {"strategic_branches": {"type": "array"}}
        }))))
        .await;

    let waiter = {
        let bridge = bridge.clone();
        let id = envelope.request_id.clone();
        tokio::spawn(async move { bridge.await_response(&id, None).await })
    };

    let normalized = bridge
        .process_response(
            &envelope.request_id,
            &json!({"strategic_branches": [{"name": "Lighting"}]}).to_string(),
        )
        .await
        .unwrap();
    assert_eq!(normalized.envelope_type, "INTELLIGENCE_RESPONSE");
    assert_eq!(normalized.metadata.request_id, envelope.request_id);

    let resolved = waiter.await.unwrap().unwrap();
    assert_eq!(resolved["strategic_branches"][0]["name"], "Lighting");
}

#[tokio::test]
async fn test_out_of_order_responses_resolve_by_id() {
    let bridge = IntelligenceBridge::new(Duration::from_secs(1));
    let first = bridge.delegate(params(None)).await;
    let second = bridge.delegate(params(None)).await;
    let third = bridge.delegate(params(None)).await;

    for (envelope, n) in [(&third, 3), (&first, 1), (&second, 2)] {
        bridge
            .process_response(&envelope.request_id, &json!({"n": n}).to_string())
            .await
            .unwrap();
    }
    assert_eq!(
        bridge.await_response(&second.request_id, None).await.unwrap()["n"],
        2
    );
    assert_eq!(
        bridge.await_response(&first.request_id, None).await.unwrap()["n"],
        1
    );
    assert_eq!(
        bridge.await_response(&third.request_id, None).await.unwrap()["n"],
        3
    );
}

#[tokio::test]
async fn test_timeout_then_late_response_is_unknown() {
    let bridge = IntelligenceBridge::new(Duration::from_millis(10));
    let envelope = bridge.delegate(params(None)).await;

    let err = bridge
        .await_response(&envelope.request_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "Timeout");

    let err = bridge
        .process_response(&envelope.request_id, "{}")
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "ValidationError");
}
