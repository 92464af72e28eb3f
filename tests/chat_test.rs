mod common;

use std::time::Duration;

use serde_json::{json, Value};

use common::{
    assert_no_event_named, create_conversation, emit, next_event_named, send_rest, TestServer,
};
use marketchat_server::config::ChatConfig;
use marketchat_server::db::models::Role;

#[tokio::test]
async fn test_rest_and_socket_share_one_conversation() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);

    // REST create from one side
    let resp = server
        .http()
        .post(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(&alice_token)
        .json(&json!({ "participantId": bob.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["created"], true);
    let conversation_id = created["conversation"]["id"].as_str().unwrap().to_string();

    // Socket send from the other side, without naming the conversation
    let mut bob_ws = server.connect(&bob_token).await;
    emit(
        &mut bob_ws,
        "message:send",
        json!({ "receiverId": alice.id, "content": "Hi Alice" }),
    )
    .await;
    let sent = next_event_named(&mut bob_ws, "message:sent").await;
    assert_eq!(sent["conversationId"], conversation_id.as_str());

    // Creating again returns the same record
    let resp = server
        .http()
        .post(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(&bob_token)
        .json(&json!({ "participantId": alice.id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let again: Value = resp.json().await.unwrap();
    assert_eq!(again["created"], false);
    assert_eq!(again["conversation"]["id"], conversation_id.as_str());

    let list: Value = server
        .http()
        .get(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["conversations"].as_array().unwrap().len(), 1);
    assert_eq!(list["conversations"][0]["messageCount"], 1);
}

#[tokio::test]
async fn test_send_read_end_to_end() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;

    emit(
        &mut alice_ws,
        "message:send",
        json!({ "receiverId": bob.id, "content": "  Is the flat still available?  " }),
    )
    .await;

    let sent = next_event_named(&mut alice_ws, "message:sent").await;
    assert_eq!(sent["content"], "Is the flat still available?");
    assert_eq!(sent["sequence"], 1);
    assert_eq!(sent["isRead"], false);

    let received = next_event_named(&mut bob_ws, "message:received").await;
    assert_eq!(received["id"], sent["id"]);
    assert_eq!(received["senderId"], alice.id.as_str());
    assert_eq!(received["sender"]["displayName"], "Alice");

    let notification = next_event_named(&mut bob_ws, "notification:new").await;
    assert_eq!(notification["title"], "New message from Alice");
    assert_eq!(notification["messageId"], sent["id"]);

    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();
    emit(
        &mut bob_ws,
        "message:markRead",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let ack = next_event_named(&mut bob_ws, "message:marked_read").await;
    assert_eq!(ack["count"], 1);

    let receipt = next_event_named(&mut alice_ws, "message:read").await;
    assert_eq!(receipt["readerId"], bob.id.as_str());
    assert_eq!(receipt["readCount"], 1);
    assert_eq!(receipt["messageIds"], json!([sent["id"]]));

    // A second markRead affects nothing and sends no receipt
    emit(
        &mut bob_ws,
        "message:markRead",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let ack = next_event_named(&mut bob_ws, "message:marked_read").await;
    assert_eq!(ack["count"], 0);
    assert_no_event_named(&mut alice_ws, "message:read", Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_offline_receiver_catches_up_through_rest() {
    let server = TestServer::start().await;
    let (_, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let mut alice_ws = server.connect(&alice_token).await;

    for text in ["one", "two", "three"] {
        emit(
            &mut alice_ws,
            "message:send",
            json!({ "receiverId": bob.id, "content": text }),
        )
        .await;
        next_event_named(&mut alice_ws, "message:sent").await;
    }
    // Frames are handled in order, so the ack means every send has finished
    emit(&mut alice_ws, "heartbeat", json!({})).await;
    next_event_named(&mut alice_ws, "heartbeat:ack").await;

    let unread: Value = server
        .http()
        .get(format!("{}/api/messages/unread-count", server.base_url()))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unread["count"], 3);

    let list: Value = server
        .http()
        .get(format!("{}/api/conversations", server.base_url()))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let conversation_id = list["conversations"][0]["id"].as_str().unwrap();
    assert_eq!(list["conversations"][0]["unreadCount"], 3);
    assert_eq!(list["conversations"][0]["lastMessage"]["content"], "three");

    let page: Value = server
        .http()
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url(),
            conversation_id
        ))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let contents: Vec<&str> = page["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    let notifications: Value = server
        .http()
        .get(format!("{}/api/notifications", server.base_url()))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(notifications["notifications"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_outsider_cannot_reach_conversation() {
    let server = TestServer::start().await;
    let (_, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, _) = server.add_user("Bob", Role::Provider);
    let (_, carol_token) = server.add_user("Carol", Role::Seeker);
    let conversation_id = create_conversation(&server, &alice_token, &bob.id).await;

    let mut carol_ws = server.connect(&carol_token).await;
    for event in ["room:join", "conversation:load", "room:participants"] {
        emit(&mut carol_ws, event, json!({ "conversationId": conversation_id })).await;
        let err = next_event_named(&mut carol_ws, "error").await;
        assert_eq!(err["message"], "Access denied", "{}", event);
        assert_eq!(err["event"], event);
    }

    emit(
        &mut carol_ws,
        "message:markRead",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let err = next_event_named(&mut carol_ws, "error").await;
    assert_eq!(err["message"], "Access denied");

    // Naming someone else's conversation does not let an outsider post into it
    emit(
        &mut carol_ws,
        "message:send",
        json!({ "conversationId": conversation_id, "receiverId": bob.id, "content": "hi" }),
    )
    .await;
    let err = next_event_named(&mut carol_ws, "error").await;
    assert_eq!(err["message"], "Access denied");

    let resp = server
        .http()
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url(),
            conversation_id
        ))
        .bearer_auth(&carol_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    emit(&mut carol_ws, "room:join", json!({ "conversationId": "missing" })).await;
    let err = next_event_named(&mut carol_ws, "error").await;
    assert_eq!(err["message"], "Conversation not found");
}

#[tokio::test]
async fn test_room_join_and_participants() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let conversation_id = create_conversation(&server, &alice_token, &bob.id).await;

    let mut bob_ws = server.connect(&bob_token).await;
    emit(&mut bob_ws, "room:join", json!({ "conversationId": conversation_id })).await;
    let joined = next_event_named(&mut bob_ws, "room:joined").await;
    assert_eq!(joined["conversationId"], conversation_id.as_str());

    let mut alice_ws = server.connect(&alice_token).await;
    emit(&mut alice_ws, "room:join", json!({ "conversationId": conversation_id })).await;
    next_event_named(&mut alice_ws, "room:joined").await;

    let member = next_event_named(&mut bob_ws, "room:user_joined").await;
    assert_eq!(member["user"]["id"], alice.id.as_str());

    emit(
        &mut alice_ws,
        "room:participants",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let list = next_event_named(&mut alice_ws, "room:participants").await;
    let participants = list["participants"].as_array().unwrap();
    assert_eq!(participants.len(), 2);
    assert!(participants.iter().all(|p| p["online"] == true));

    emit(&mut alice_ws, "room:leave", json!({ "conversationId": conversation_id })).await;
    next_event_named(&mut alice_ws, "room:left").await;
    let left = next_event_named(&mut bob_ws, "room:user_left").await;
    assert_eq!(left["user"]["id"], alice.id.as_str());
}

#[tokio::test]
async fn test_typing_is_relayed_to_receiver() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let conversation_id = create_conversation(&server, &alice_token, &bob.id).await;
    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;

    let payload = json!({ "conversationId": conversation_id, "receiverId": bob.id });
    emit(&mut alice_ws, "typing:start", payload.clone()).await;
    let typing = next_event_named(&mut bob_ws, "typing:start").await;
    assert_eq!(typing["userId"], alice.id.as_str());
    assert_eq!(typing["displayName"], "Alice");

    emit(&mut alice_ws, "typing:stop", payload).await;
    next_event_named(&mut bob_ws, "typing:stop").await;
}

/// Next presence update about `user_id`, skipping everyone else's.
async fn next_presence_of(ws: &mut common::WsStream, user_id: &str) -> Value {
    loop {
        let update = next_event_named(ws, "presence:update").await;
        if update["userId"] == user_id {
            return update;
        }
    }
}

#[tokio::test]
async fn test_presence_follows_connections() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (_, bob_token) = server.add_user("Bob", Role::Provider);
    let mut bob_ws = server.connect(&bob_token).await;

    let first = server.connect(&alice_token).await;
    let online = next_presence_of(&mut bob_ws, &alice.id).await;
    assert_eq!(online["status"], "online");
    assert_eq!(online["displayName"], "Alice");
    let second = server.connect(&alice_token).await;

    // Closing one of two connections keeps the user online
    drop(first);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(marketchat_server::ws::is_online(server.state.hub.as_ref(), &alice.id));

    drop(second);
    let update = next_presence_of(&mut bob_ws, &alice.id).await;
    assert_eq!(update["status"], "offline");
    assert!(!marketchat_server::ws::is_online(server.state.hub.as_ref(), &alice.id));
}

#[tokio::test]
async fn test_status_update_reaches_others() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (_, bob_token) = server.add_user("Bob", Role::Provider);
    let mut bob_ws = server.connect(&bob_token).await;
    let mut alice_ws = server.connect(&alice_token).await;

    emit(&mut alice_ws, "user:status", json!({ "status": "busy" })).await;
    loop {
        let update = next_event_named(&mut bob_ws, "user:status:update").await;
        if update["userId"] == alice.id.as_str() {
            assert_eq!(update["status"], "busy");
            break;
        }
    }

    emit(&mut alice_ws, "presence:update", json!({ "status": "away" })).await;
    loop {
        let update = next_presence_of(&mut bob_ws, &alice.id).await;
        if update["status"] == "away" {
            break;
        }
    }
}

#[tokio::test]
async fn test_delete_rules() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let (_, admin_token) = server.add_user("Admin", Role::Admin);

    let first = send_rest(&server, &alice_token, &bob.id, "first").await;
    let second = send_rest(&server, &alice_token, &bob.id, "second").await;

    let mut alice_ws = server.connect(&alice_token).await;
    let mut bob_ws = server.connect(&bob_token).await;

    // The receiver may not delete the sender's message
    emit(&mut bob_ws, "message:delete", json!({ "messageId": first["id"] })).await;
    let err = next_event_named(&mut bob_ws, "error").await;
    assert_eq!(err["message"], "Access denied");
    assert_eq!(err["event"], "message:delete");

    // The sender's delete is always soft, even when asking for everyone
    emit(
        &mut alice_ws,
        "message:delete",
        json!({ "messageId": first["id"], "deleteForEveryone": true }),
    )
    .await;
    let done = next_event_named(&mut alice_ws, "message:delete_success").await;
    assert_eq!(done["mode"], "soft");
    assert_eq!(done["message"]["content"], "This message was deleted");
    assert_eq!(done["message"]["type"], "system");
    assert_eq!(done["message"]["metadata"]["deleted"], true);

    let seen = next_event_named(&mut bob_ws, "message:deleted").await;
    assert_eq!(seen["messageId"], first["id"]);
    assert_eq!(seen["deletedBy"], alice.id.as_str());

    // An administrator cannot soft delete someone else's message
    let mut admin_ws = server.connect(&admin_token).await;
    emit(&mut admin_ws, "message:delete", json!({ "messageId": second["id"] })).await;
    let err = next_event_named(&mut admin_ws, "error").await;
    assert_eq!(err["message"], "Access denied");
    assert_eq!(err["event"], "message:delete");

    // An administrator may remove a message outright
    let resp = server
        .http()
        .delete(format!(
            "{}/api/messages/{}?forEveryone=true",
            server.base_url(),
            second["id"].as_str().unwrap()
        ))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let notice: Value = resp.json().await.unwrap();
    assert_eq!(notice["mode"], "hard");
    assert!(notice["message"].is_null());
    next_event_named(&mut bob_ws, "message:deleted").await;

    let page: Value = server
        .http()
        .get(format!(
            "{}/api/conversations/{}/messages",
            server.base_url(),
            first["conversationId"].as_str().unwrap()
        ))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = page["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["id"], first["id"]);
    assert_eq!(messages[0]["content"], "This message was deleted");
}

#[tokio::test]
async fn test_admin_monitor_mirrors_traffic() {
    let server = TestServer::start().await;
    let (_, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let (_, admin_token) = server.add_user("Admin", Role::Admin);
    let conversation_id = create_conversation(&server, &alice_token, &bob.id).await;
    send_rest(&server, &alice_token, &bob.id, "before monitoring").await;

    let mut admin_ws = server.connect(&admin_token).await;
    emit(
        &mut admin_ws,
        "admin:conversation:monitor",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    next_event_named(&mut admin_ws, "room:joined").await;
    let history = next_event_named(&mut admin_ws, "conversation:loaded").await;
    assert_eq!(history["messages"][0]["content"], "before monitoring");

    let mut bob_ws = server.connect(&bob_token).await;
    send_rest(&server, &alice_token, &bob.id, "while monitored").await;
    next_event_named(&mut bob_ws, "message:received").await;

    let mirrored = next_event_named(&mut admin_ws, "message:received").await;
    assert_eq!(mirrored["content"], "while monitored");
    // Exactly one mirror per message
    assert_no_event_named(&mut admin_ws, "message:received", Duration::from_millis(300)).await;

    emit(&mut admin_ws, "admin:conversations:list", json!({})).await;
    let all = next_event_named(&mut admin_ws, "admin:conversations").await;
    assert_eq!(all["conversations"].as_array().unwrap().len(), 1);

    // Non-administrators get neither the list nor the monitor
    let mut bob_ws = server.connect(&bob_token).await;
    emit(&mut bob_ws, "admin:conversations:list", json!({})).await;
    let err = next_event_named(&mut bob_ws, "error").await;
    assert_eq!(err["message"], "Access denied");
    emit(
        &mut bob_ws,
        "admin:room:join",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let err = next_event_named(&mut bob_ws, "error").await;
    assert_eq!(err["event"], "admin:room:join");
}

#[tokio::test]
async fn test_admin_cannot_mark_others_read() {
    let server = TestServer::start().await;
    let (_, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, bob_token) = server.add_user("Bob", Role::Provider);
    let (_, admin_token) = server.add_user("Admin", Role::Admin);
    let sent = send_rest(&server, &alice_token, &bob.id, "unread for Bob").await;
    let conversation_id = sent["conversationId"].as_str().unwrap();

    let mut admin_ws = server.connect(&admin_token).await;
    emit(
        &mut admin_ws,
        "message:markRead",
        json!({ "conversationId": conversation_id }),
    )
    .await;
    let err = next_event_named(&mut admin_ws, "error").await;
    assert_eq!(err["message"], "Access denied");
    assert_eq!(err["event"], "message:markRead");

    let unread: Value = server
        .http()
        .get(format!("{}/api/messages/unread-count", server.base_url()))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(unread["count"], 1);
}

#[tokio::test]
async fn test_send_that_times_out_is_not_stored() {
    let server = TestServer::start_with(ChatConfig {
        db_timeout_ms: 200,
        ..Default::default()
    })
    .await;
    let (_, alice_token) = server.add_user("Alice", Role::Seeker);
    let (bob, _) = server.add_user("Bob", Role::Provider);
    let mut alice_ws = server.connect(&alice_token).await;

    // Hold the database well past the timeout
    let db = server.state.db.clone();
    let (locked_tx, locked_rx) = std::sync::mpsc::channel();
    let holder = std::thread::spawn(move || {
        let _conn = db.lock().unwrap();
        locked_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(800));
    });
    locked_rx.recv().unwrap();

    emit(
        &mut alice_ws,
        "message:send",
        json!({ "receiverId": bob.id, "content": "too late" }),
    )
    .await;
    let err = next_event_named(&mut alice_ws, "error").await;
    assert_eq!(err["message"], "Request timed out");
    assert_eq!(err["event"], "message:send");

    holder.join().unwrap();
    // Give the abandoned task time to pick up the lock and give up
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stored: i64 = server
        .state
        .db
        .lock()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
        .unwrap();
    assert_eq!(stored, 0);
    assert_no_event_named(&mut alice_ws, "message:sent", Duration::from_millis(200)).await;
}
