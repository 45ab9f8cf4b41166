use serde_json::json;
use tempfile::tempdir;

use parley::domains::records::{
    ChatRecord, MessageRecord, Role, UserRecord, Visibility, VoteRecord,
};
use parley::interfaces::storage::{BackendKind, StorageBackend};
use parley::providers::sqlite::SqliteStorageProvider;

async fn provider(dir: &tempfile::TempDir) -> SqliteStorageProvider {
    let path = dir.path().join("parley.db");
    SqliteStorageProvider::new(path.to_str().unwrap())
        .await
        .unwrap()
}

fn chat(id: &str, user_id: &str, created_at: i64) -> ChatRecord {
    ChatRecord {
        id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("chat {id}"),
        visibility: Visibility::Private,
        created_at,
        last_context: None,
    }
}

fn message(id: &str, chat_id: &str, role: Role, created_at: i64) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        role,
        parts: vec![json!({"type": "text", "text": format!("message {id}")})],
        attachments: Vec::new(),
        created_at,
    }
}

#[tokio::test]
async fn chats_round_trip_with_json_columns() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    assert_eq!(db.kind(), BackendKind::Hosted);

    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.update_chat_last_context("c1", json!({"totalTokens": 30}))
        .await
        .unwrap();
    db.update_chat_visibility("c1", Visibility::Public)
        .await
        .unwrap();
    db.update_chat_title("c1", "renamed").await.unwrap();

    let loaded = db.chat_by_id("c1").await.unwrap().unwrap();
    assert_eq!(loaded.title, "renamed");
    assert_eq!(loaded.visibility, Visibility::Public);
    assert_eq!(loaded.last_context.unwrap()["totalTokens"], 30);

    let saved = db
        .save_messages(vec![message("m1", "c1", Role::User, 110)])
        .await
        .unwrap();
    let loaded = db.message_by_id("m1").await.unwrap().unwrap();
    assert_eq!(loaded, saved[0]);
    assert_eq!(loaded.parts[0]["text"], "message m1");
}

#[tokio::test]
async fn chats_by_user_come_back_newest_first() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("old", "u1", 100)).await.unwrap();
    db.save_chat(chat("new", "u1", 300)).await.unwrap();
    db.save_chat(chat("mid", "u1", 200)).await.unwrap();
    db.save_chat(chat("other", "u2", 400)).await.unwrap();

    let chats = db.chats_by_user("u1").await.unwrap();
    assert_eq!(
        chats.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["new", "mid", "old"]
    );
}

#[tokio::test]
async fn delete_chat_cascades_in_one_transaction() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.save_messages(vec![
        message("m1", "c1", Role::User, 110),
        message("m2", "c1", Role::Assistant, 120),
    ])
    .await
    .unwrap();
    db.upsert_vote(VoteRecord {
        chat_id: "c1".to_string(),
        message_id: "m2".to_string(),
        is_upvoted: true,
    })
    .await
    .unwrap();
    db.create_stream(parley::domains::records::StreamRecord {
        id: "s1".to_string(),
        chat_id: "c1".to_string(),
        created_at: 130,
    })
    .await
    .unwrap();

    let removed = db.delete_chat("c1").await.unwrap().unwrap();
    assert_eq!(removed.id, "c1");
    assert!(db.chat_by_id("c1").await.unwrap().is_none());
    assert!(db.messages_by_chat("c1").await.unwrap().is_empty());
    assert!(db.votes_by_chat("c1").await.unwrap().is_empty());
    assert!(db.stream_ids_by_chat("c1").await.unwrap().is_empty());

    assert!(db.delete_chat("c1").await.unwrap().is_none());
}

#[tokio::test]
async fn vote_conflict_updates_in_place() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.save_messages(vec![message("m1", "c1", Role::Assistant, 110)])
        .await
        .unwrap();

    let vote = |up: bool| VoteRecord {
        chat_id: "c1".to_string(),
        message_id: "m1".to_string(),
        is_upvoted: up,
    };
    db.upsert_vote(vote(true)).await.unwrap();
    db.upsert_vote(vote(false)).await.unwrap();

    let votes = db.votes_by_chat("c1").await.unwrap();
    assert_eq!(votes.len(), 1);
    assert!(!votes[0].is_upvoted);
}

#[tokio::test]
async fn delete_messages_from_cutoff_takes_their_votes() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.save_messages(vec![
        message("m1", "c1", Role::User, 110),
        message("m2", "c1", Role::Assistant, 120),
        message("m3", "c1", Role::User, 130),
    ])
    .await
    .unwrap();
    for id in ["m1", "m3"] {
        db.upsert_vote(VoteRecord {
            chat_id: "c1".to_string(),
            message_id: id.to_string(),
            is_upvoted: true,
        })
        .await
        .unwrap();
    }

    let removed = db.delete_messages_from("c1", 120).await.unwrap();
    assert_eq!(removed, 2);

    let remaining = db.messages_by_chat("c1").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, "m1");

    let votes = db.votes_by_chat("c1").await.unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].message_id, "m1");
}

#[tokio::test]
async fn multi_row_saves_land_every_record() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.save_messages(vec![
        message("m1", "c1", Role::User, 110),
        message("m2", "c1", Role::Assistant, 120),
        message("m3", "c1", Role::User, 130),
    ])
    .await
    .unwrap();
    assert_eq!(db.messages_by_chat("c1").await.unwrap().len(), 3);

    db.save_document(parley::domains::records::DocumentRecord {
        id: "d1".to_string(),
        user_id: "u1".to_string(),
        title: "doc".to_string(),
        kind: "text".to_string(),
        content: "content".to_string(),
        created_at: 200,
    })
    .await
    .unwrap();
    let suggestions = (1..=3)
        .map(|i| parley::domains::records::SuggestionRecord {
            id: format!("s{i}"),
            document_id: "d1".to_string(),
            document_created_at: 200,
            original_text: format!("was {i}"),
            suggested_text: format!("now {i}"),
            description: None,
            is_resolved: false,
            user_id: "u1".to_string(),
            created_at: 210 + i,
        })
        .collect();
    db.save_suggestions(suggestions).await.unwrap();
    assert_eq!(db.suggestions_by_document("d1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn ensure_user_never_clobbers_an_existing_row() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.create_user(UserRecord {
        id: "u1".to_string(),
        email: "real@example.com".to_string(),
        password: Some("hash".to_string()),
    })
    .await
    .unwrap();

    db.ensure_user(UserRecord {
        id: "u1".to_string(),
        email: "u1@placeholder.local".to_string(),
        password: None,
    })
    .await
    .unwrap();

    let users = db.users_by_email("real@example.com").await.unwrap();
    assert_eq!(users.len(), 1);
    assert!(db
        .users_by_email("u1@placeholder.local")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn user_message_count_spans_all_of_a_users_chats() {
    let dir = tempdir().unwrap();
    let db = provider(&dir).await;
    db.save_chat(chat("c1", "u1", 100)).await.unwrap();
    db.save_chat(chat("c2", "u1", 200)).await.unwrap();
    db.save_messages(vec![
        message("m1", "c1", Role::User, 500),
        message("m2", "c1", Role::Assistant, 510),
        message("m3", "c2", Role::User, 520),
        message("m4", "c2", Role::User, 10),
    ])
    .await
    .unwrap();

    assert_eq!(db.user_message_count_since("u1", 100).await.unwrap(), 2);
    assert_eq!(db.user_message_count_since("u2", 0).await.unwrap(), 0);
}
