// ABOUTME: HTTP-level tests for the chat, widget, Slack webhook and health routes
// ABOUTME: Drives the full router with middleware and checks headers, SSE frames and stored rows
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use std::str;
use std::time::Duration;

use axum::body::Body;
use base_chat::{
    models::MessageRole,
    routes::chat::MessageListResponse,
    test_utils::{chunk, seed_profile, ScriptedReply},
};
use chrono::Utc;
use common::{eventually, Script, TestApp, TEAM_ID};
use futures_util::StreamExt;
use helpers::axum_test::{parse_sse, AxumTestRequest};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const FALLBACK: &str = "Sorry, something went wrong.";

fn authed(request: AxumTestRequest, app: &TestApp) -> AxumTestRequest {
    request
        .header("x-tenant-id", &app.tenant.id.to_string())
        .header("x-profile-id", &app.profile.id.to_string())
}

async fn refund_app() -> TestApp {
    TestApp::new(
        Script::answering("Refunds are issued within 30 days.", &[0]),
        vec![chunk("refund-policy"), chunk("pricing")],
    )
    .await
}

#[tokio::test]
async fn test_health_reports_service() {
    let app = refund_app().await;
    let response = AxumTestRequest::get("/health").send(app.router()).await;

    assert_eq!(response.status(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "base-chat-server");
    assert!(response
        .header("x-request-id")
        .is_some_and(|id| id.starts_with("req_")));
}

#[tokio::test]
async fn test_new_conversation_streams_reply_with_id_headers() {
    let app = refund_app().await;
    let response = authed(AxumTestRequest::post("/api/conversations"), &app)
        .json(&json!({ "content": "How do refunds work?" }))
        .send(app.router())
        .await;

    assert_eq!(response.status(), 200);
    let message_id = response.header("x-message-id").unwrap();
    let conversation_id = response.header("x-conversation-id").unwrap();
    assert!(response
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("text/event-stream")));

    let frames = response.sse_frames();
    let done = frames.last().unwrap();
    assert_eq!(done.event, "done");
    assert_eq!(done.data["messageId"], message_id.as_str());
    assert_eq!(done.data["conversationId"], conversation_id.as_str());
    assert_eq!(done.data["message"], "Refunds are issued within 30 days.");
    assert_eq!(done.data["failed"], false);
    assert_eq!(done.data["sources"].as_array().unwrap().len(), 1);
    assert!(frames[..frames.len() - 1]
        .iter()
        .all(|frame| frame.event == "partial"));

    let listed = authed(
        AxumTestRequest::get(&format!("/api/conversations/{conversation_id}/messages")),
        &app,
    )
    .send(app.router())
    .await;
    assert_eq!(listed.status(), 200);
    let listed: MessageListResponse = listed.json();
    let roles: Vec<_> = listed.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![MessageRole::User, MessageRole::Assistant]);
    assert_eq!(listed.messages[1].id.to_string(), message_id);
    assert_eq!(
        listed.messages[1].content.as_deref(),
        Some("Refunds are issued within 30 days.")
    );

    // The title replaces the provisional one in the background
    let conversation_id: Uuid = conversation_id.parse().unwrap();
    let shared = &app;
    let titled = eventually(move || async move {
        shared
            .database()
            .get_conversation(shared.tenant.id, conversation_id)
            .await
            .unwrap()
            .is_some_and(|c| c.title == "Refund policy")
    })
    .await;
    assert!(titled);
}

#[tokio::test]
async fn test_follow_up_message_in_existing_conversation() {
    let app = refund_app().await;
    let conversation = app
        .resources
        .engine
        .start_conversation(&app.tenant, &app.profile, "Hi", None)
        .await
        .unwrap();

    let response = authed(
        AxumTestRequest::post(&format!("/api/conversations/{}/messages", conversation.id)),
        &app,
    )
    .json(&json!({ "content": "How do refunds work?", "model": "gpt-4o-mini" }))
    .send(app.router())
    .await;
    assert_eq!(response.status(), 200);
    assert!(response.header("x-conversation-id").is_none());

    let message_id: Uuid = response.header("x-message-id").unwrap().parse().unwrap();
    let stored = app
        .database()
        .get_message(app.tenant.id, message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.model.as_deref(), Some("gpt-4o-mini"));
    assert_eq!(stored.conversation_id, conversation.id);
}

#[tokio::test]
async fn test_missing_identity_headers_are_unauthorized() {
    let app = refund_app().await;
    let response = AxumTestRequest::post("/api/conversations")
        .json(&json!({ "content": "How do refunds work?" }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 401);

    let response = AxumTestRequest::post("/api/conversations")
        .header("x-tenant-id", &app.tenant.id.to_string())
        .header("x-profile-id", "not-a-uuid")
        .json(&json!({ "content": "How do refunds work?" }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_other_profiles_conversation_is_not_found() {
    let app = refund_app().await;
    let other = seed_profile(app.database(), &app.tenant, "web-user-2").await;
    let conversation = app
        .resources
        .engine
        .start_conversation(&app.tenant, &other, "Private", None)
        .await
        .unwrap();

    let response = authed(
        AxumTestRequest::get(&format!("/api/conversations/{}/messages", conversation.id)),
        &app,
    )
    .send(app.router())
    .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let app = refund_app().await;
    let response = authed(AxumTestRequest::post("/api/conversations"), &app)
        .json(&json!({ "content": "   " }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 400);
    assert!(app.reply_requests().is_empty());
}

#[tokio::test]
async fn test_widget_returns_buffered_reply() {
    let app = refund_app().await;
    let uri = format!("/api/widget/{}/messages", app.tenant.public_chatbot_id);

    let response = AxumTestRequest::post(&uri)
        .json(&json!({ "sessionId": "visitor-1", "content": "How do refunds work?" }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json();
    assert_eq!(body["message"], "Refunds are issued within 30 days.");
    assert_eq!(
        response.header("x-message-id").unwrap(),
        body["messageId"].as_str().unwrap()
    );
    assert_eq!(body["sources"][0]["documentId"], "refund-policy");

    // Same session continues the same conversation
    let conversation_id = body["conversationId"].as_str().unwrap().to_owned();
    let response = AxumTestRequest::post(&uri)
        .json(&json!({
            "sessionId": "visitor-1",
            "content": "And for shipping?",
            "conversationId": conversation_id,
        }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 200);
    let follow_up: Value = response.json();
    assert_eq!(follow_up["conversationId"], conversation_id.as_str());

    // Another session cannot read into it
    let response = AxumTestRequest::post(&uri)
        .json(&json!({
            "sessionId": "visitor-2",
            "content": "Let me in",
            "conversationId": conversation_id,
        }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_widget_unknown_chatbot_is_not_found() {
    let app = refund_app().await;
    let response = AxumTestRequest::post(&format!("/api/widget/{}/messages", Uuid::new_v4()))
        .json(&json!({ "sessionId": "visitor-1", "content": "Hello?" }))
        .send(app.router())
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_slack_url_verification_echoes_challenge() {
    let app = refund_app().await;
    let body = json!({ "type": "url_verification", "challenge": "3eZbrw1aB" }).to_string();
    let timestamp = Utc::now().timestamp();

    let response = AxumTestRequest::post("/api/slack/events")
        .header("x-slack-request-timestamp", &timestamp.to_string())
        .header("x-slack-signature", &app.slack_signature(timestamp, body.as_bytes()))
        .header("content-type", "application/json")
        .raw(body.as_bytes())
        .send(app.router())
        .await;
    assert_eq!(response.status(), 200);
    let echoed: Value = response.json();
    assert_eq!(echoed["challenge"], "3eZbrw1aB");
}

#[tokio::test]
async fn test_slack_bad_signature_is_rejected() {
    let app = refund_app().await;
    let body = json!({ "type": "url_verification", "challenge": "x" }).to_string();
    let timestamp = Utc::now().timestamp();
    let forged = app.slack_signature(timestamp, b"something else");

    let response = AxumTestRequest::post("/api/slack/events")
        .header("x-slack-request-timestamp", &timestamp.to_string())
        .header("x-slack-signature", &forged)
        .raw(body.as_bytes())
        .send(app.router())
        .await;
    assert_eq!(response.status(), 401);

    let stale = timestamp - 3600;
    let response = AxumTestRequest::post("/api/slack/events")
        .header("x-slack-request-timestamp", &stale.to_string())
        .header("x-slack-signature", &app.slack_signature(stale, body.as_bytes()))
        .raw(body.as_bytes())
        .send(app.router())
        .await;
    assert_eq!(response.status(), 401);
}

fn message_callback(ts: &str) -> String {
    json!({
        "type": "event_callback",
        "team_id": TEAM_ID,
        "event_id": format!("Ev{ts}"),
        "event": {
            "type": "message",
            "user": "U0ALICE",
            "text": "How do refunds work?",
            "channel": "C0SUPPORT",
            "ts": ts,
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_slack_event_is_acknowledged_then_answered() {
    let app = refund_app().await;
    let body = message_callback("1700000000.000100");
    let timestamp = Utc::now().timestamp();

    let response = AxumTestRequest::post("/api/slack/events")
        .header("x-slack-request-timestamp", &timestamp.to_string())
        .header("x-slack-signature", &app.slack_signature(timestamp, body.as_bytes()))
        .raw(body.as_bytes())
        .send(app.router())
        .await;
    assert_eq!(response.status(), 200);

    let shared = &app;
    let posted = eventually(move || async move { !shared.slack.posts().is_empty() }).await;
    assert!(posted);
    let post = &app.slack.posts()[0];
    assert_eq!(post.channel, "C0SUPPORT");
    assert_eq!(post.thread_ts.as_deref(), Some("1700000000.000100"));
}

#[tokio::test]
async fn test_slack_redelivery_is_not_reprocessed() {
    let app = refund_app().await;
    let body = message_callback("1700000000.000200");
    let timestamp = Utc::now().timestamp();

    let response = AxumTestRequest::post("/api/slack/events")
        .header("x-slack-request-timestamp", &timestamp.to_string())
        .header("x-slack-signature", &app.slack_signature(timestamp, body.as_bytes()))
        .header("x-slack-retry-num", "1")
        .raw(body.as_bytes())
        .send(app.router())
        .await;
    assert_eq!(response.status(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(app.slack.calls().is_empty());
    assert!(app.provider.requests().is_empty());
}

#[tokio::test]
async fn test_client_disconnect_finalizes_with_fallback() {
    let app = TestApp::new(
        Script::answering("unused", &[]).with_reply(ScriptedReply::HangAfter(vec![
            r#"{"message":"Refunds are"#.to_owned(),
        ])),
        vec![chunk("refund-policy")],
    )
    .await;

    let request = authed(AxumTestRequest::post("/api/conversations"), &app)
        .json(&json!({ "content": "How do refunds work?" }))
        .build();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
    let message_id: Uuid = response
        .headers()
        .get("x-message-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .parse()
        .unwrap();

    let mut body = Body::into_data_stream(response.into_body());
    let first = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .expect("first event arrives")
        .unwrap()
        .unwrap();
    let frames = parse_sse(str::from_utf8(&first).unwrap());
    assert_eq!(frames[0].event, "partial");
    assert_eq!(frames[0].data["message"], "Refunds are");

    drop(body);

    let shared = &app;
    let finalized = eventually(move || async move {
        shared
            .database()
            .get_message(shared.tenant.id, message_id)
            .await
            .unwrap()
            .is_some_and(|m| m.content.as_deref() == Some(FALLBACK))
    })
    .await;
    assert!(finalized);
}

#[tokio::test]
async fn test_unread_response_dropped_finalizes_with_fallback() {
    let app = TestApp::new(
        Script::answering("unused", &[]).with_reply(ScriptedReply::Hang),
        vec![chunk("refund-policy")],
    )
    .await;

    let request = authed(AxumTestRequest::post("/api/conversations"), &app)
        .json(&json!({ "content": "How do refunds work?" }))
        .build();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);
    let message_id: Uuid = response
        .headers()
        .get("x-message-id")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .parse()
        .unwrap();

    // Never poll the body
    drop(response);

    let shared = &app;
    let finalized = eventually(move || async move {
        shared
            .database()
            .get_message(shared.tenant.id, message_id)
            .await
            .unwrap()
            .is_some_and(|m| m.content.as_deref() == Some(FALLBACK))
    })
    .await;
    assert!(finalized);
}
