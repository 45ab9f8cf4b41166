use serde_json::json;
use tempfile::tempdir;

use parley::domains::records::{ChatRecord, MessageRecord, Role, Visibility, VoteRecord};
use parley::interfaces::storage::{BackendKind, StorageBackend};
use parley::providers::local::LocalStorageProvider;

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

fn message(id: &str, chat_id: &str, created_at: i64) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        role: Role::User,
        parts: vec![json!({"type": "text", "text": format!("message {id}")})],
        attachments: Vec::new(),
        created_at,
    }
}

#[tokio::test]
async fn records_survive_a_new_provider_over_the_same_profile() {
    let dir = tempdir().unwrap();

    {
        let store = LocalStorageProvider::new(dir.path());
        assert_eq!(store.kind(), BackendKind::ClientLocal);
        store.save_chat(chat("c1", "u1", 100)).await.unwrap();
        store
            .save_messages(vec![message("m1", "c1", 110)])
            .await
            .unwrap();
    }

    let reopened = LocalStorageProvider::new(dir.path());
    let loaded = reopened.chat_by_id("c1").await.unwrap().unwrap();
    assert_eq!(loaded.title, "chat c1");
    let messages = reopened.messages_by_chat("c1").await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(reopened.message_by_id("m1").await.unwrap().unwrap().id, "m1");
}

#[tokio::test]
async fn delete_chat_cleans_lists_and_indexes() {
    let dir = tempdir().unwrap();
    let store = LocalStorageProvider::new(dir.path());
    store.save_chat(chat("c1", "u1", 100)).await.unwrap();
    store
        .save_messages(vec![message("m1", "c1", 110), message("m2", "c1", 120)])
        .await
        .unwrap();
    store
        .upsert_vote(VoteRecord {
            chat_id: "c1".to_string(),
            message_id: "m1".to_string(),
            is_upvoted: true,
        })
        .await
        .unwrap();

    let removed = store.delete_chat("c1").await.unwrap().unwrap();
    assert_eq!(removed.id, "c1");
    assert!(store.chat_by_id("c1").await.unwrap().is_none());
    assert!(store.messages_by_chat("c1").await.unwrap().is_empty());
    assert!(store.votes_by_chat("c1").await.unwrap().is_empty());
    // The message index is swept with the chat.
    assert!(store.message_by_id("m1").await.unwrap().is_none());
}

#[tokio::test]
async fn ordering_contracts_match_the_other_backends() {
    let dir = tempdir().unwrap();
    let store = LocalStorageProvider::new(dir.path());
    store.save_chat(chat("old", "u1", 100)).await.unwrap();
    store.save_chat(chat("new", "u1", 300)).await.unwrap();
    store.save_chat(chat("mid", "u1", 200)).await.unwrap();

    let chats = store.chats_by_user("u1").await.unwrap();
    assert_eq!(
        chats.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["new", "mid", "old"]
    );

    store
        .save_messages(vec![message("m2", "new", 220), message("m1", "new", 210)])
        .await
        .unwrap();
    let messages = store.messages_by_chat("new").await.unwrap();
    assert_eq!(
        messages.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
        vec!["m1", "m2"]
    );
}

#[tokio::test]
async fn trailing_delete_updates_votes_and_index() {
    let dir = tempdir().unwrap();
    let store = LocalStorageProvider::new(dir.path());
    store.save_chat(chat("c1", "u1", 100)).await.unwrap();
    store
        .save_messages(vec![
            message("m1", "c1", 110),
            message("m2", "c1", 120),
            message("m3", "c1", 130),
        ])
        .await
        .unwrap();
    for id in ["m1", "m3"] {
        store
            .upsert_vote(VoteRecord {
                chat_id: "c1".to_string(),
                message_id: id.to_string(),
                is_upvoted: true,
            })
            .await
            .unwrap();
    }

    let removed = store.delete_messages_from("c1", 120).await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.message_by_id("m2").await.unwrap().is_none());
    let votes = store.votes_by_chat("c1").await.unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].message_id, "m1");
}
