//! REST surface driven through the full router and middleware stack.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Value, json};
use server::{
    app_state::AppState,
    server::{create_app_router, metrics_handle},
};
use shared::{
    config::server::{Config, Profile},
    models::SendMessageRequest,
};
use tower::ServiceExt;
use uuid::Uuid;

fn test_app() -> (Router, Arc<AppState>) {
    let config = Arc::new(Config::default_for_profile(Profile::Test));
    let state = Arc::new(AppState::in_memory(config));
    (
        create_app_router(Arc::clone(&state), metrics_handle()),
        state,
    )
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .map(|value| value.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, content_type, json)
}

async fn deliver(state: &AppState, sender: Uuid, counterparty: Uuid, content: &str) -> Uuid {
    state
        .delivery
        .send_message(
            sender,
            None,
            SendMessageRequest {
                counterparty_id: Some(counterparty),
                content: Some(content.into()),
                ..SendMessageRequest::default()
            },
        )
        .await
        .unwrap()
        .conversation
        .id
}

#[tokio::test]
async fn requests_without_identity_are_unauthorized() {
    let (app, _) = test_app();

    let (status, content_type, body) = call(&app, "GET", "/api/conversations", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body["code"], "auth_failure");
}

#[tokio::test]
async fn malformed_identity_header_is_unauthorized() {
    let (app, _) = test_app();

    let request = Request::builder()
        .uri("/api/conversations")
        .header("x-user-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_conversation_is_idempotent_per_pair() {
    let (app, _) = test_app();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());

    let (status, _, first) = call(
        &app,
        "POST",
        "/api/conversations",
        Some(buyer),
        Some(json!({ "counterpartyId": seller })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["kind"], "direct");
    assert!(first["lastMessage"].is_null());

    let (status, _, second) = call(
        &app,
        "POST",
        "/api/conversations",
        Some(seller),
        Some(json!({ "counterpartyId": buyer })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], second["id"]);
}

#[tokio::test]
async fn conversation_with_yourself_is_a_bad_request() {
    let (app, _) = test_app();
    let user = Uuid::new_v4();

    let (status, _, body) = call(
        &app,
        "POST",
        "/api/conversations",
        Some(user),
        Some(json!({ "counterpartyId": user })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");
}

#[tokio::test]
async fn inbox_and_history_reflect_delivered_messages() {
    let (app, state) = test_app();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = deliver(&state, buyer, seller, "hi").await;
    deliver(&state, seller, buyer, "hello, still available").await;

    let (status, _, inbox) = call(&app, "GET", "/api/conversations", Some(buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["id"], conversation_id.to_string());
    assert_eq!(inbox[0]["lastMessage"]["content"], "hello, still available");
    assert_eq!(inbox[0]["unseen"], true);

    let uri = format!("/api/conversations/{conversation_id}/messages");
    let (status, _, page) = call(&app, "GET", &uri, Some(seller), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[1]["content"], "hello, still available");
    assert_eq!(page["hasMore"], false);

    let uri = format!("/api/conversations/{conversation_id}");
    let (status, _, preview) = call(&app, "GET", &uri, Some(seller), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(preview["lastMessage"]["content"], "hello, still available");
    assert_eq!(preview["unseen"], false);
}

#[tokio::test]
async fn outsiders_get_forbidden_and_unknown_ids_not_found() {
    let (app, state) = test_app();
    let (buyer, seller, outsider) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = deliver(&state, buyer, seller, "hi").await;

    let uri = format!("/api/conversations/{conversation_id}/messages");
    let (status, content_type, body) = call(&app, "GET", &uri, Some(outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body["code"], "auth_failure");

    let uri = format!("/api/conversations/{}", Uuid::new_v4());
    let (status, _, body) = call(&app, "GET", &uri, Some(buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn seen_endpoint_reports_marked_count_and_clears_unseen() {
    let (app, state) = test_app();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = deliver(&state, buyer, seller, "first").await;
    deliver(&state, buyer, seller, "second").await;

    let (_, _, unseen) = call(&app, "GET", "/api/conversations/unseen", Some(seller), None).await;
    assert_eq!(unseen.as_array().unwrap().len(), 1);

    let uri = format!("/api/conversations/{conversation_id}/seen");
    let (status, _, receipt) = call(&app, "POST", &uri, Some(seller), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["conversationId"], conversation_id.to_string());
    assert_eq!(receipt["marked"], 2);

    let (_, _, receipt) = call(&app, "POST", &uri, Some(seller), None).await;
    assert_eq!(receipt["marked"], 0);

    let (_, _, unseen) = call(&app, "GET", "/api/conversations/unseen", Some(seller), None).await;
    assert!(unseen.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn page_limit_is_clamped() {
    let (app, state) = test_app();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let mut conversation_id = Uuid::nil();
    for i in 0..60 {
        conversation_id = deliver(&state, buyer, seller, &format!("bid {i}")).await;
    }

    let uri = format!("/api/conversations/{conversation_id}/messages?limit=500");
    let (_, _, page) = call(&app, "GET", &uri, Some(buyer), None).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 50);
    assert_eq!(page["hasMore"], true);

    let uri = format!("/api/conversations/{conversation_id}/messages?limit=0");
    let (_, _, page) = call(&app, "GET", &uri, Some(buyer), None).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["messages"][0]["content"], "bid 59");

    let uri = format!("/api/conversations/{conversation_id}/messages");
    let (_, _, page) = call(&app, "GET", &uri, Some(buyer), None).await;
    assert_eq!(page["messages"].as_array().unwrap().len(), 20);
}

#[tokio::test]
async fn malformed_input_is_reported_as_bad_request_problem() {
    let (app, state) = test_app();
    let (buyer, seller) = (Uuid::new_v4(), Uuid::new_v4());
    let conversation_id = deliver(&state, buyer, seller, "hi").await;

    for uri in [
        format!("/api/conversations/{conversation_id}/messages?limit=abc"),
        format!("/api/conversations/{conversation_id}/messages?before=yesterday"),
        "/api/conversations/not-a-uuid".to_string(),
        "/api/conversations/not-a-uuid/seen".to_string(),
    ] {
        let method = if uri.ends_with("/seen") { "POST" } else { "GET" };
        let (status, content_type, body) = call(&app, method, &uri, Some(buyer), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(
            content_type.as_deref(),
            Some("application/problem+json"),
            "{uri}"
        );
        assert_eq!(body["code"], "bad_request", "{uri}");
    }

    let (status, content_type, body) = call(
        &app,
        "POST",
        "/api/conversations",
        Some(buyer),
        Some(json!({ "counterpartyId": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    assert_eq!(body["code"], "bad_request");

    let request = Request::builder()
        .method("POST")
        .uri("/api/conversations")
        .header("x-user-id", buyer.to_string())
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_probes_answer_without_identity() {
    let (app, _) = test_app();

    let (status, _, _) = call(&app, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = call(&app, "GET", "/readyz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
