// ABOUTME: Integration tests for storage under concurrent writers on a file-backed database
// ABOUTME: Message sequences stay ordered and external identities map to a single user and profile
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::collections::HashSet;

use base_chat::{
    database::Database,
    models::NewMessage,
    services::{slack_sign_in, widget_sign_in},
    test_utils::{seed_profile, test_tenant, with_slack},
};
use serial_test::serial;
use tempfile::TempDir;

async fn file_database() -> (Database, TempDir) {
    common::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("chat.db").display());
    (Database::new(&url).await.unwrap(), dir)
}

#[tokio::test]
#[serial]
async fn test_concurrent_messages_get_distinct_increasing_sequences() {
    let (database, _dir) = file_database().await;
    let tenant = test_tenant("Acme Co.");
    database.create_tenant(&tenant).await.unwrap();
    let profile = seed_profile(&database, &tenant, "u-1").await;
    let conversation = database
        .create_conversation(tenant.id, profile.id, "Busy thread", None)
        .await
        .unwrap();

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let database = database.clone();
            let tenant_id = tenant.id;
            let conversation_id = conversation.id;
            tokio::spawn(async move {
                database
                    .create_message(&NewMessage::user(
                        tenant_id,
                        conversation_id,
                        format!("message {i}"),
                    ))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut created = Vec::new();
    for writer in writers {
        created.push(writer.await.unwrap());
    }

    let sequences: HashSet<_> = created.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences.len(), created.len());

    let stored = database
        .get_messages_for_conversation(tenant.id, conversation.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 16);
    assert!(stored.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test]
#[serial]
async fn test_concurrent_slack_sign_ins_share_one_identity() {
    let (database, _dir) = file_database().await;
    let tenant = with_slack(test_tenant("Acme Co."), "T0ACME");
    database.create_tenant(&tenant).await.unwrap();

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let database = database.clone();
            tokio::spawn(async move { slack_sign_in(&database, "T0ACME", "U0ALICE").await })
        })
        .collect();

    let mut profiles = HashSet::new();
    for attempt in attempts {
        let (signed_into, profile) = attempt.await.unwrap().unwrap();
        assert_eq!(signed_into.id, tenant.id);
        profiles.insert(profile.id);
    }

    assert_eq!(profiles.len(), 1);
    assert_eq!(database.count_users("slack").await.unwrap(), 1);
    assert_eq!(database.count_profiles(tenant.id).await.unwrap(), 1);
}

#[tokio::test]
#[serial]
async fn test_widget_sessions_are_scoped_to_their_chatbot() {
    let (database, _dir) = file_database().await;
    let acme = test_tenant("Acme Co.");
    let globex = test_tenant("Globex");
    database.create_tenant(&acme).await.unwrap();
    database.create_tenant(&globex).await.unwrap();

    let (_, acme_first) = widget_sign_in(&database, acme.public_chatbot_id, "session-1")
        .await
        .unwrap();
    let (_, acme_again) = widget_sign_in(&database, acme.public_chatbot_id, "session-1")
        .await
        .unwrap();
    let (found, globex_same_session) =
        widget_sign_in(&database, globex.public_chatbot_id, "session-1")
            .await
            .unwrap();

    assert_eq!(acme_first.id, acme_again.id);
    assert_eq!(found.id, globex.id);
    assert_ne!(acme_first.id, globex_same_session.id);
    assert_eq!(database.count_users("widget").await.unwrap(), 2);
    assert_eq!(database.count_profiles(acme.id).await.unwrap(), 1);
    assert_eq!(database.count_profiles(globex.id).await.unwrap(), 1);
}
