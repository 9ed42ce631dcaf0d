//! Integration coverage for the private-prompt and observer-bootstrap
//! skip paths on `/sessions/init` and `/sessions/observations` (scenarios
//! 6 and 7): a skipped payload must create no session/prompt/observation
//! row and broadcast no SSE event.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use memkeep::db;
use memkeep::http::state::SharedState;
use memkeep::scheduler::Scheduler;
use memkeep::vector::NullVectorIndex;
use rusqlite::Connection;
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> Arc<SharedState> {
    let conn = Connection::open_in_memory().unwrap();
    db::schema::ensure_schema(&conn).unwrap();
    let scheduler = Arc::new(Scheduler::new(4));
    SharedState::new(conn, Arc::new(NullVectorIndex), scheduler)
}

async fn post_json(router: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    (status, value)
}

#[tokio::test]
async fn fully_private_prompt_is_skipped_and_stores_nothing() {
    let state = test_state();
    let router = memkeep::http::build_router(state.clone());

    let (status, body) = post_json(
        router,
        "/sessions/init",
        json!({
            "contentSessionId": "sess-1",
            "project": "demo",
            "prompt": "<private>do not remember this</private>",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(true));
    assert_eq!(body["reason"], json!("private"));

    let conn = state.db.lock().await;
    assert!(db::get_session_by_content_id(&conn, "sess-1").unwrap().is_none());
}

#[tokio::test]
async fn prompt_empty_after_context_block_stripping_is_skipped() {
    let state = test_state();
    let router = memkeep::http::build_router(state.clone());

    let (status, body) = post_json(
        router,
        "/sessions/init",
        json!({
            "contentSessionId": "sess-2",
            "project": "demo",
            "prompt": "<session-context>stale context only</session-context>   ",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(true));

    let conn = state.db.lock().await;
    assert!(db::get_session_by_content_id(&conn, "sess-2").unwrap().is_none());
}

#[tokio::test]
async fn normal_prompt_creates_session_and_broadcasts_new_prompt() {
    let state = test_state();
    let mut events = state.events.subscribe();
    let router = memkeep::http::build_router(state.clone());

    let (status, body) = post_json(
        router,
        "/sessions/init",
        json!({
            "contentSessionId": "sess-3",
            "project": "demo",
            "prompt": "please fix the flaky test",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(false));

    let conn = state.db.lock().await;
    assert!(db::get_session_by_content_id(&conn, "sess-3").unwrap().is_some());
    drop(conn);

    let event = events.try_recv().expect("new_prompt broadcast expected");
    assert!(matches!(event, memkeep::http::state::SseEvent::NewPrompt { .. }));
}

#[tokio::test]
async fn partial_private_span_is_stripped_but_prompt_is_still_stored() {
    let state = test_state();
    let router = memkeep::http::build_router(state.clone());

    let (status, body) = post_json(
        router,
        "/sessions/init",
        json!({
            "contentSessionId": "sess-5",
            "project": "demo",
            "prompt": "investigate this <private>sk-ant-abc123</private> bug",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skipped"], json!(false));

    let conn = state.db.lock().await;
    let session = db::get_session_by_content_id(&conn, "sess-5").unwrap().unwrap();
    let stored = session.initial_prompt.unwrap();
    assert!(!stored.contains("sk-ant-abc123"));
    assert!(stored.contains("investigate this"));
    assert!(stored.contains("bug"));
}

#[tokio::test]
async fn observer_bootstrap_payload_is_accepted_but_not_queued() {
    let state = test_state();
    let router = memkeep::http::build_router(state.clone());

    // Create the session first so a non-bootstrap payload would otherwise queue.
    let conn = state.db.lock().await;
    db::create_or_get_session(&conn, "sess-4", "demo", None, db::Platform::HostedAgent).unwrap();
    drop(conn);

    let (status, body) = post_json(
        router,
        "/sessions/observations",
        json!({
            "contentSessionId": "sess-4",
            "tool_name": "Bash",
            "tool_response": "[[observer-bootstrap]] initializing",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("skipped"));
    assert_eq!(body["reason"], json!("observer_bootstrap"));

    let conn = state.db.lock().await;
    let depth = memkeep::queue::total_active_count(&conn).unwrap();
    assert_eq!(depth, 0);
}
