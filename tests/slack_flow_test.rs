// ABOUTME: Integration tests for Slack channel message handling
// ABOUTME: Gates, thinking reaction, threaded posting with sources and thread-scoped conversations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::{Duration, Instant};

use base_chat::{
    database::Database,
    errors::ErrorCode,
    models::{Message, MessageRole},
    services::{SkipReason, SlackOutcome},
    slack::InboundMessage,
    test_utils::{
        chunk, RecordingSlack, ScriptedProvider, ScriptedReply, SlackCall, StaticRetriever,
    },
};
use common::{call_kind, CallKind, Script, TestApp, TEAM_ID};

fn inbound(text: &str, ts: &str, thread_ts: &str) -> InboundMessage {
    InboundMessage {
        team_id: TEAM_ID.to_owned(),
        channel: "C0SUPPORT".to_owned(),
        user: "U0ALICE".to_owned(),
        text: text.to_owned(),
        ts: ts.to_owned(),
        thread_ts: thread_ts.to_owned(),
        mentioned: false,
    }
}

async fn handle(app: &TestApp, message: &InboundMessage) -> SlackOutcome {
    app.resources
        .engine
        .prompt_from_message_event(message, app.slack.as_ref())
        .await
        .unwrap()
}

fn roles(messages: &[Message]) -> Vec<MessageRole> {
    messages.iter().map(|m| m.role).collect()
}

#[tokio::test]
async fn test_answered_question_posts_in_thread_with_sources() {
    let app = TestApp::new(
        Script::answering("Refunds are issued within **30 days**.", &[0]),
        vec![chunk("refund-policy"), chunk("pricing")],
    )
    .await;
    let message = inbound("How do refunds work?", "1700000000.000100", "1700000000.000100");

    let outcome = handle(&app, &message).await;
    let reply = match outcome {
        SlackOutcome::Posted(reply) => reply,
        other => panic!("expected a posted reply, got {other:?}"),
    };

    let calls = app.slack.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(
        &calls[0],
        SlackCall::AddReaction { ts, name, .. } if ts == "1700000000.000100" && name == "thinking_face"
    ));
    assert!(matches!(&calls[2], SlackCall::RemoveReaction { .. }));

    let SlackCall::Post(post) = &calls[1] else {
        panic!("expected the reply between the reactions");
    };
    assert_eq!(post.channel, "C0SUPPORT");
    assert_eq!(post.thread_ts.as_deref(), Some("1700000000.000100"));
    assert!(post.text.starts_with("Refunds are issued within *30 days*."));
    assert!(post.text.contains("*Sources:*"));
    assert!(post.text.contains("<https://docs.example/refund-policy|refund-policy.pdf>"));
    assert!(!post.text.contains("pricing"));

    let messages = app
        .database()
        .get_messages_for_conversation(app.tenant.id, reply.conversation_id)
        .await
        .unwrap();
    assert_eq!(roles(&messages), vec![MessageRole::User, MessageRole::Assistant]);
    assert_eq!(messages[1].sources.len(), 1);
}

#[tokio::test]
async fn test_broadcast_mentions_in_reply_are_not_live() {
    let app = TestApp::new(
        Script::answering("Per the doc: <!channel> refunds take 30 days.", &[0]),
        vec![chunk("refund-policy")],
    )
    .await;
    let message = inbound("How do refunds work?", "1700000000.000150", "1700000000.000150");

    let outcome = handle(&app, &message).await;
    assert!(matches!(outcome, SlackOutcome::Posted(_)));

    let posts = app.slack.posts();
    assert_eq!(posts.len(), 1);
    assert!(posts[0]
        .text
        .starts_with("Per the doc: &lt;!channel&gt; refunds take 30 days."));
    assert!(!posts[0].text.contains("<!channel>"));
}

#[tokio::test]
async fn test_reply_without_sources_is_not_posted() {
    let app = TestApp::new(
        Script::answering("I am not sure.", &[]),
        vec![chunk("refund-policy")],
    )
    .await;
    let message = inbound("How do refunds work?", "1700000000.000200", "1700000000.000200");

    let outcome = handle(&app, &message).await;
    let (conversation_id, reason) = match outcome {
        SlackOutcome::Suppressed {
            conversation_id,
            reason,
        } => (conversation_id, reason),
        other => panic!("expected a suppressed reply, got {other:?}"),
    };
    assert_eq!(reason, SkipReason::NoSources);

    assert!(app.slack.posts().is_empty());
    let calls = app.slack.calls();
    assert!(matches!(calls.last(), Some(SlackCall::RemoveReaction { .. })));

    let messages = app
        .database()
        .get_messages_for_conversation(app.tenant.id, conversation_id)
        .await
        .unwrap();
    assert_eq!(roles(&messages), vec![MessageRole::User]);
}

#[tokio::test]
async fn test_reply_judged_unanswered_is_held_back() {
    let app = TestApp::new(
        Script::answering("Maybe ask finance.", &[0]).answered(false),
        vec![chunk("refund-policy")],
    )
    .await;
    let message = inbound("How do refunds work?", "1700000000.000300", "1700000000.000300");

    let outcome = handle(&app, &message).await;
    assert!(matches!(
        outcome,
        SlackOutcome::Suppressed {
            reason: SkipReason::NotAnswered,
            ..
        }
    ));
    assert!(app.slack.posts().is_empty());
}

#[tokio::test]
async fn test_chatter_is_skipped_without_side_effects() {
    let app = TestApp::new(
        Script::answering("unused", &[0]).question(false),
        vec![chunk("refund-policy")],
    )
    .await;
    let message = inbound("lunch is here!", "1700000000.000400", "1700000000.000400");

    let outcome = handle(&app, &message).await;
    assert_eq!(outcome, SlackOutcome::Skipped(SkipReason::NotAQuestion));
    assert!(app.slack.calls().is_empty());
    assert!(app.reply_requests().is_empty());
    assert!(app.retriever.queries().is_empty());
    assert!(app
        .database()
        .find_conversation_by_slack_thread(app.tenant.id, &message.thread_key())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_mention_bypasses_question_check() {
    let app = TestApp::new(
        Script::answering("Refunds take 30 days.", &[0]).question(false),
        vec![chunk("refund-policy")],
    )
    .await;
    let mut message = inbound("refunds", "1700000000.000500", "1700000000.000500");
    message.mentioned = true;

    let outcome = handle(&app, &message).await;
    assert!(matches!(outcome, SlackOutcome::Posted(_)));
    assert!(app
        .provider
        .requests()
        .iter()
        .all(|r| call_kind(r) != CallKind::IsQuestion));
}

#[tokio::test]
async fn test_unknown_workspace_is_rejected() {
    let app = TestApp::new(Script::answering("unused", &[0]), Vec::new()).await;
    let mut message = inbound("How do refunds work?", "1.1", "1.1");
    message.team_id = "T0UNKNOWN".to_owned();

    let err = app
        .resources
        .engine
        .prompt_from_message_event(&message, app.slack.as_ref())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownTenant);
    assert!(app.slack.calls().is_empty());
}

#[tokio::test]
async fn test_thread_follow_up_continues_the_conversation() {
    let app = TestApp::new(
        Script::answering("Refunds take 30 days.", &[0]),
        vec![chunk("refund-policy")],
    )
    .await;
    let root = "1700000000.000600";

    let first = handle(&app, &inbound("How do refunds work?", root, root)).await;
    let second = handle(
        &app,
        &inbound("Does that include shipping?", "1700000000.000700", root),
    )
    .await;

    let (SlackOutcome::Posted(first), SlackOutcome::Posted(second)) = (first, second) else {
        panic!("expected both replies to be posted");
    };
    assert_eq!(first.conversation_id, second.conversation_id);

    let messages = app
        .database()
        .get_messages_for_conversation(app.tenant.id, first.conversation_id)
        .await
        .unwrap();
    assert_eq!(
        roles(&messages),
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant
        ]
    );

    // The follow-up prompt carries the earlier exchange
    let requests = app.reply_requests();
    let last = requests.last().unwrap();
    assert!(last
        .messages
        .iter()
        .any(|m| m.content == "How do refunds work?"));
}

#[tokio::test]
async fn test_slow_gate_fails_closed() {
    let provider = ScriptedProvider::from_fn(|request| match call_kind(request) {
        CallKind::IsQuestion => ScriptedReply::Hang,
        _ => ScriptedReply::Text(common::reply_json("unused", &[0])),
    });
    let database = Database::new("sqlite::memory:").await.unwrap();
    let app = TestApp::build(
        database,
        provider,
        StaticRetriever::new(vec![chunk("refund-policy")]),
        RecordingSlack::new(),
    )
    .await;

    let started = Instant::now();
    let outcome = handle(&app, &inbound("How do refunds work?", "2.1", "2.1")).await;
    assert_eq!(outcome, SlackOutcome::Skipped(SkipReason::GateUnavailable));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(app.slack.calls().is_empty());
}

#[tokio::test]
async fn test_failed_post_still_clears_reaction() {
    let database = Database::new("sqlite::memory:").await.unwrap();
    let app = TestApp::build(
        database,
        Script::answering("Refunds take 30 days.", &[0]).provider(),
        StaticRetriever::new(vec![chunk("refund-policy")]),
        RecordingSlack::failing_posts(),
    )
    .await;

    let result = app
        .resources
        .engine
        .prompt_from_message_event(&inbound("How do refunds work?", "3.1", "3.1"), app.slack.as_ref())
        .await;
    assert!(result.is_err());
    assert!(matches!(
        app.slack.calls().last(),
        Some(SlackCall::RemoveReaction { .. })
    ));
}
