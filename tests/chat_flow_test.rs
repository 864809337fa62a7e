// Messaging flow tests driven through the event router with in-memory stores

mod common;

use common::Harness;
use direct_chat_service::error::AppError;
use serde_json::json;

#[tokio::test]
async fn test_two_sends_leave_one_conversation_with_latest_text() {
    let h = Harness::new();
    let (mut alice, a) = h.joined("alice").await;
    let (mut bob, b) = h.joined("bob").await;
    alice.drain();

    alice
        .send(&h.state, json!({ "type": "send_message", "recipient_id": b.id, "content": "hi" }))
        .await;
    bob.send(&h.state, json!({ "type": "send_message", "recipient_id": a.id, "content": "yo" }))
        .await;

    let conversation = h.state.ledger.find(a.id, b.id).await.unwrap().unwrap();
    assert_eq!(conversation.last_message, "yo");
    assert_eq!(
        h.state.stores.conversations.list_for_account(a.id).await.unwrap().len(),
        1
    );

    let alice_frames = alice.drain();
    let sent: Vec<_> = alice_frames.iter().filter(|f| f["type"] == "message_sent").collect();
    let received: Vec<_> = alice_frames
        .iter()
        .filter(|f| f["type"] == "receive_message")
        .collect();
    assert_eq!(sent.len(), 1);
    // Her own "hi" echoed to her room plus bob's "yo"
    assert_eq!(received.len(), 2);
    assert_eq!(received[1]["message"]["content"], "yo");
    assert_eq!(received[1]["message"]["sender"], "bob");
    assert_eq!(received[1]["message"]["delivered"], false);
    assert_eq!(received[1]["message"]["read"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_sends_create_one_conversation() {
    let h = Harness::new();
    let (alice, a) = h.joined("alice").await;
    let (bob, b) = h.joined("bob").await;

    let s1 = h.state.clone();
    let s2 = h.state.clone();
    let (c1, c2) = (alice.conn, bob.conn);
    let t1 = tokio::spawn(async move { s1.messages.send(c1, b.id, "from alice").await });
    let t2 = tokio::spawn(async move { s2.messages.send(c2, a.id, "from bob").await });
    t1.await.unwrap().unwrap();
    t2.await.unwrap().unwrap();

    let for_alice = h.state.stores.conversations.list_for_account(a.id).await.unwrap();
    let for_bob = h.state.stores.conversations.list_for_account(b.id).await.unwrap();
    assert_eq!(for_alice.len(), 1);
    assert_eq!(for_bob.len(), 1);
    assert_eq!(for_alice[0].id, for_bob[0].id);
}

#[tokio::test]
async fn test_only_recipient_can_mark_read() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let (mut bob, b) = h.joined("bob").await;

    let view = h.state.messages.send(alice.conn, b.id, "read me").await.unwrap();
    alice.drain();
    bob.drain();

    alice
        .send(&h.state, json!({ "type": "message_seen", "message_id": view.id }))
        .await;
    let errors = alice.take("error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["context"], "message_seen");
    assert_eq!(errors[0]["kind"], "conflict");

    let stored = h.state.stores.messages.find_by_id(view.id).await.unwrap().unwrap();
    assert!(!stored.read);

    bob.send(&h.state, json!({ "type": "message_seen", "message_id": view.id }))
        .await;
    assert_eq!(bob.take("message_seen_success").len(), 1);
    let acks = alice.take("message_seen_ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["reader_id"], json!(b.id));

    let stored = h.state.stores.messages.find_by_id(view.id).await.unwrap().unwrap();
    assert!(stored.read);
    let first_read_at = stored.read_at;

    // A repeat receipt keeps the original timestamp
    h.state.messages.mark_read(bob.conn, view.id).await.unwrap();
    let stored = h.state.stores.messages.find_by_id(view.id).await.unwrap().unwrap();
    assert_eq!(stored.read_at, first_read_at);
}

#[tokio::test]
async fn test_delivery_receipt_notifies_sender() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let (mut bob, b) = h.joined("bob").await;

    let view = h.state.messages.send(alice.conn, b.id, "ping").await.unwrap();
    alice.drain();

    bob.send(&h.state, json!({ "type": "message_delivered", "message_id": view.id }))
        .await;
    assert_eq!(bob.take("message_delivered_success").len(), 1);
    let acks = alice.take("message_delivered_ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["message_id"], json!(view.id));

    let err = h.state.messages.mark_delivered(alice.conn, view.id).await;
    assert!(matches!(err, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_history_second_page_of_45() {
    let h = Harness::new();
    let (mut alice, a) = h.joined("alice").await;
    let (mut bob, b) = h.joined("bob").await;

    for i in 0..45 {
        h.state
            .messages
            .send(alice.conn, b.id, &format!("m{i}"))
            .await
            .unwrap();
    }
    alice.drain();
    bob.drain();

    bob.send(
        &h.state,
        json!({ "type": "load_history", "partner_id": a.id, "page": 2, "limit": 20 }),
    )
    .await;

    let history = bob.take("chat_history");
    assert_eq!(history.len(), 1);
    let messages = history[0]["messages"].as_array().unwrap();
    let contents: Vec<&str> = messages
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    let expected: Vec<String> = (5..25).map(|i| format!("m{i}")).collect();
    assert_eq!(contents, expected);

    let pagination = &history[0]["pagination"];
    assert_eq!(pagination["page"], 2);
    assert_eq!(pagination["limit"], 20);
    assert_eq!(pagination["total_messages"], 45);
    assert_eq!(pagination["total_pages"], 3);

    // Loading history marks everything alice sent as read
    let read = alice.take("messages_read");
    assert_eq!(read.len(), 1);
    assert_eq!(read[0]["reader_id"], json!(b.id));
    assert_eq!(read[0]["message_ids"].as_array().unwrap().len(), 45);
}

#[tokio::test]
async fn test_history_rejects_zero_limit() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let b = h.seed_account("bob").await;

    alice
        .send(
            &h.state,
            json!({ "type": "load_history", "partner_id": b.id, "page": 1, "limit": 0 }),
        )
        .await;
    let errors = alice.take("error");
    assert_eq!(errors[0]["kind"], "validation_error");
}

#[tokio::test]
async fn test_send_to_disconnected_account_is_persisted_undelivered() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let (bob, b) = h.joined("bob").await;

    h.close(&bob).await;
    let stored_bob = h.state.stores.accounts.find_by_id(b.id).await.unwrap().unwrap();
    assert!(!stored_bob.is_online);
    assert!(stored_bob.connection_id.is_none());
    alice.drain();

    alice
        .send(&h.state, json!({ "type": "send_message", "recipient_id": b.id, "content": "you there?" }))
        .await;
    let sent = alice.take("message_sent");
    assert_eq!(sent.len(), 1);

    let id: uuid::Uuid = serde_json::from_value(sent[0]["message"]["id"].clone()).unwrap();
    let stored = h.state.stores.messages.find_by_id(id).await.unwrap().unwrap();
    assert!(!stored.delivered);
    assert_eq!(stored.content, "you there?");
}

#[tokio::test]
async fn test_unbound_sender_gets_error() {
    let h = Harness::new();
    let b = h.seed_account("bob").await;
    let mut stranger = h.connect().await;

    stranger
        .send(&h.state, json!({ "type": "send_message", "recipient_id": b.id, "content": "hi" }))
        .await;
    let errors = stranger.take("error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["context"], "send_message");
    assert_eq!(errors[0]["kind"], "not_found");
    assert_eq!(h.state.stores.messages.count_between(b.id, b.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_validation_and_unknown_recipient() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;

    alice
        .send(&h.state, json!({ "type": "send_message", "recipient_id": uuid::Uuid::new_v4(), "content": "hi" }))
        .await;
    let errors = alice.take("error");
    assert_eq!(errors[0]["kind"], "not_found");
    assert_eq!(errors[0]["message"], "recipient not found");

    let b = h.seed_account("bob").await;
    alice
        .send(&h.state, json!({ "type": "send_message", "recipient_id": b.id, "content": "   " }))
        .await;
    let errors = alice.take("error");
    assert_eq!(errors[0]["kind"], "validation_error");
}

#[tokio::test]
async fn test_malformed_frames_report_context() {
    let h = Harness::new();
    let mut client = h.connect().await;

    client
        .send_raw(&h.state, r#"{"type":"send_message","content":"missing recipient"}"#)
        .await;
    let errors = client.take("error");
    assert_eq!(errors[0]["context"], "send_message");
    assert_eq!(errors[0]["kind"], "validation_error");

    client.send_raw(&h.state, "not json").await;
    let errors = client.take("error");
    assert_eq!(errors[0]["context"], "unknown");
}

#[tokio::test]
async fn test_join_unknown_username_is_not_found() {
    let h = Harness::new();
    let mut client = h.connect().await;
    client
        .send(&h.state, json!({ "type": "join", "username": "ghost" }))
        .await;
    let errors = client.take("error");
    assert_eq!(errors[0]["context"], "join");
    assert_eq!(errors[0]["kind"], "not_found");
    assert!(h.state.stores.accounts.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_roster_changes_reach_every_connection() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let (bob, b) = h.joined("bob").await;

    let frames = alice.drain();
    let joined: Vec<_> = frames.iter().filter(|f| f["type"] == "user_joined").collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0]["username"], "bob");
    let rosters: Vec<_> = frames.iter().filter(|f| f["type"] == "users_list").collect();
    assert_eq!(rosters.last().unwrap()["users"].as_array().unwrap().len(), 2);

    bob.send(&h.state, json!({ "type": "disconnect" })).await;
    let frames = alice.drain();
    let left: Vec<_> = frames.iter().filter(|f| f["type"] == "user_left").collect();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["user_id"], json!(b.id));
    let roster = frames.iter().rev().find(|f| f["type"] == "users_list").unwrap();
    assert_eq!(roster["users"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_contact_lists() {
    let h = Harness::new();
    let (mut alice, _a) = h.joined("alice").await;
    let (_carol, _c) = h.joined("carol").await;
    let b = h.seed_account("bob").await;
    let z = h.seed_account("zed").await;

    h.state.messages.send(alice.conn, b.id, "first").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    h.state.messages.send(alice.conn, z.id, "second").await.unwrap();
    alice.drain();

    alice.send(&h.state, json!({ "type": "get_all_contacts" })).await;
    let all = alice.take("all_contacts");
    let names: Vec<&str> = all[0]["contacts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["username"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["carol", "bob", "zed"]);

    alice.send(&h.state, json!({ "type": "get_chat_contacts" })).await;
    let chats = alice.take("chat_contacts");
    let contacts = chats[0]["contacts"].as_array().unwrap();
    assert_eq!(contacts.len(), 2);
    assert_eq!(contacts[0]["user"]["username"], "zed");
    assert_eq!(contacts[0]["last_message"], "second");
}

#[tokio::test]
async fn test_typing_requires_bound_sender() {
    let h = Harness::new();
    let b = h.seed_account("bob").await;
    let mut stranger = h.connect().await;

    stranger
        .send(&h.state, json!({ "type": "typing", "recipient_id": b.id, "is_typing": true }))
        .await;
    let errors = stranger.take("error");
    assert_eq!(errors[0]["context"], "typing");
    assert_eq!(h.state.typing.active_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_clears_ephemeral_state() {
    let h = Harness::new();
    let (alice, _a) = h.joined("alice").await;
    let b = h.seed_account("bob").await;
    let a_id = h.state.presence.require(alice.conn).await.unwrap();
    h.state.typing.set_typing(a_id, b.id, true).await;

    h.state.shutdown().await;

    assert_eq!(h.state.typing.active_count().await, 0);
    assert_eq!(h.state.presence.bound_count().await, 0);
    assert!(h.state.pending.is_empty().await);
    assert!(h.state.stores.accounts.list_online().await.unwrap().is_empty());
}
