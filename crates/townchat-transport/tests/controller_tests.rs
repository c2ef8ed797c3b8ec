//! Session controller tests over the in-memory network
//!
//! These tests run the real controller task and channel pumps; only the socket
//! is replaced by [`memory_network`].

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

use townchat_core::{
    ConnectionState, ConversationId, Credential, ReconnectConfig, SendOutcome, SessionConfig,
    SessionNotice, SkipReason, StaticCredential,
};
use townchat_transport::{
    memory_network, ConversationHost, EndpointTemplate, MemoryConnector, MemoryServer,
    ServerConnection, SessionBuilder, SessionHandle, SessionView,
};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);

fn conversation(id: &str) -> ConversationId {
    ConversationId::new(id).unwrap()
}

fn endpoint() -> EndpointTemplate {
    EndpointTemplate::new("http://chat.test").unwrap()
}

fn spawn_session(
    connector: MemoryConnector,
    id: &str,
    token: Option<&str>,
    config: SessionConfig,
) -> SessionHandle {
    SessionBuilder::new(conversation(id))
        .with_credential(token.and_then(Credential::new))
        .with_config(config)
        .with_endpoint(endpoint())
        .with_connector(connector)
        .spawn()
        .unwrap()
}

async fn accept(server: &mut MemoryServer) -> ServerConnection {
    timeout(WAIT, server.accept())
        .await
        .expect("connection attempt")
        .expect("connector alive")
}

async fn next_json(connection: &mut ServerConnection) -> serde_json::Value {
    timeout(WAIT, connection.recv_json())
        .await
        .expect("client frame")
        .expect("client still connected")
}

/// Accept a connection and complete the auth → fetch handshake
async fn handshake(server: &mut MemoryServer, token: &str) -> ServerConnection {
    let mut connection = accept(server).await;
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "auth", "token": token})
    );
    connection.send_json(json!({"event": "auth"}));
    assert_eq!(next_json(&mut connection).await, json!({"event": "fetch"}));
    connection
}

async fn wait_for<F>(handle: &SessionHandle, predicate: F) -> SessionView
where
    F: FnMut(&SessionView) -> bool,
{
    let view = timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("view condition reached in time");
    assert_ok!(view)
}

fn contents(view: &SessionView) -> Vec<&str> {
    view.messages.iter().map(|m| m.content.as_str()).collect()
}

// ----------------------------------------------------------------------------
// Handshake and Messages
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_handshake_history_and_live_messages() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());

    let connection = handshake(&mut server, "T1").await;
    assert_eq!(
        connection.endpoint().as_str(),
        "ws://chat.test/town/ws/chat/abc/"
    );

    connection.send_json(json!({
        "event": "fetch",
        "messages": [
            {"id": 2, "content": "second", "created_at": "2024-01-01T10:00:00Z"},
            {"id": 1, "content": "first", "created_at": "2024-01-01T09:00:00Z"},
        ],
    }));
    let view = wait_for(&handle, |v| v.history_loaded).await;
    assert_eq!(view.connection_state, ConnectionState::Ready);
    assert_eq!(contents(&view), vec!["first", "second"]);

    // Timestamp older than history; still appended last
    connection.send_json(json!({
        "event": "message", "id": 3, "content": "hi", "created_at": "2023-01-01T00:00:00Z",
    }));
    let view = wait_for(&handle, |v| v.messages.len() == 3).await;
    assert_eq!(contents(&view), vec!["first", "second", "hi"]);
}

#[tokio::test]
async fn test_send_transmits_without_touching_store() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());

    let mut connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": []}));
    wait_for(&handle, |v| v.history_loaded).await;

    assert_eq!(handle.send_message("hello").await, SendOutcome::Transmitted);
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "message", "content": "hello", "type": "text"})
    );
    assert!(handle.view().messages.is_empty());

    assert_eq!(
        handle.send_message("   ").await,
        SendOutcome::Skipped(SkipReason::EmptyContent)
    );
}

#[tokio::test]
async fn test_draft_is_cleared_only_after_transmission() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());
    let mut connection = handshake(&mut server, "T1").await;

    assert_ok!(handle.set_draft("typed"));
    wait_for(&handle, |v| v.draft == "typed").await;

    assert_eq!(handle.submit_draft().await, SendOutcome::Transmitted);
    assert_eq!(next_json(&mut connection).await["content"], "typed");
    wait_for(&handle, |v| v.draft.is_empty()).await;
}

#[tokio::test]
async fn test_send_during_authentication_follows_config() {
    // Default: an open channel is enough
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());
    let mut connection = accept(&mut server).await;
    assert_eq!(next_json(&mut connection).await["event"], "auth");
    wait_for(&handle, |v| v.connection_state == ConnectionState::Authenticating).await;

    assert_eq!(handle.send_message("early").await, SendOutcome::Transmitted);
    assert_eq!(next_json(&mut connection).await["content"], "early");

    // Strict: wait for Ready
    let (connector, mut server) = memory_network();
    let config = SessionConfig {
        require_ready_for_send: true,
        ..SessionConfig::default()
    };
    let handle = spawn_session(connector, "abc", Some("T1"), config);
    let _connection = accept(&mut server).await;
    wait_for(&handle, |v| v.connection_state == ConnectionState::Authenticating).await;

    assert_eq!(
        handle.send_message("early").await,
        SendOutcome::Skipped(SkipReason::NotReady)
    );
}

#[tokio::test]
async fn test_sign_document_round_trip() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());
    let mut notices = handle.subscribe_notices();
    let mut connection = handshake(&mut server, "T1").await;

    assert_eq!(handle.sign_document("doc-1").await, SendOutcome::Transmitted);
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "update", "type": "sign", "content": "doc-1"})
    );

    connection.send_json(json!({"event": "update", "status": "signed"}));
    connection.send_json(json!({"error": "document locked"}));

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match timeout(WAIT, notices.recv()).await.unwrap().unwrap() {
            notice @ SessionNotice::UpdateAcknowledged { .. } => seen.push(notice),
            notice @ SessionNotice::ServerError { .. } => seen.push(notice),
            _ => {}
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionNotice::UpdateAcknowledged {
                status: Some("signed".to_string())
            },
            SessionNotice::ServerError {
                reason: "document locked".to_string()
            },
        ]
    );
}

// ----------------------------------------------------------------------------
// Credentials
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_missing_credential_waits_for_host() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", None, SessionConfig::default());
    let mut notices = handle.subscribe_notices();

    let mut connection = accept(&mut server).await;
    loop {
        let notice = timeout(WAIT, notices.recv()).await.unwrap().unwrap();
        if notice == SessionNotice::CredentialMissing {
            break;
        }
    }
    assert_eq!(
        handle.view().connection_state,
        ConnectionState::Authenticating
    );

    assert_ok!(handle.provide_credential(Credential::new("late").unwrap()));
    assert_eq!(
        next_json(&mut connection).await,
        json!({"event": "auth", "token": "late"})
    );
    connection.send_json(json!({"event": "auth"}));
    wait_for(&handle, |v| v.connection_state == ConnectionState::Ready).await;
}

#[tokio::test]
async fn test_rejected_credential_fails_session() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("bad"), SessionConfig::default());

    let mut connection = accept(&mut server).await;
    next_json(&mut connection).await;
    connection.send_json(json!({"event": "auth", "status": "failed"}));

    wait_for(&handle, |v| v.connection_state == ConnectionState::Failed).await;
    assert_eq!(
        timeout(WAIT, connection.recv_text()).await.unwrap(),
        None,
        "client releases the channel"
    );
}

// ----------------------------------------------------------------------------
// Failure and Reconnect
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_keeps_history_and_skips_sends() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());

    let connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": [{"id": 1, "content": "kept"}]}));
    wait_for(&handle, |v| v.history_loaded).await;

    connection.abort();
    let view = wait_for(&handle, |v| v.connection_state == ConnectionState::Failed).await;
    assert_eq!(contents(&view), vec!["kept"]);

    assert_eq!(
        handle.send_message("hello?").await,
        SendOutcome::Skipped(SkipReason::ChannelUnavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_loss_replaces_history() {
    let (connector, mut server) = memory_network();
    let config = SessionConfig {
        reconnect: ReconnectConfig::Exponential {
            base_ms: 1_000,
            max_delay_ms: 8_000,
            max_retries: 3,
            jitter: 0.0,
        },
        ..SessionConfig::default()
    };
    let handle = spawn_session(connector, "abc", Some("T1"), config);

    let connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": [{"id": 1, "content": "old"}]}));
    let first = wait_for(&handle, |v| v.history_loaded).await;
    connection.close(Some("server restart"));

    let failed = wait_for(&handle, |v| v.connection_state == ConnectionState::Failed).await;
    assert!(failed.reconnecting);
    assert!(handle.is_running());
    let started = tokio::time::Instant::now();

    let connection = handshake(&mut server, "T1").await;
    assert!(started.elapsed() >= Duration::from_secs(1));

    connection.send_json(json!({
        "event": "fetch",
        "messages": [{"id": 2, "content": "new"}, {"id": 1, "content": "old"}],
    }));
    let second = wait_for(&handle, |v| v.history_loaded && v.messages.len() == 2).await;
    assert_eq!(contents(&second), vec!["old", "new"]);
    assert_ne!(first.generation, second.generation);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connections_retry_until_accepted() {
    let (connector, mut server) = memory_network();
    server.refuse_next(2);
    let config = SessionConfig {
        reconnect: ReconnectConfig::Exponential {
            base_ms: 100,
            max_delay_ms: 1_000,
            max_retries: 3,
            jitter: 0.0,
        },
        ..SessionConfig::default()
    };
    let handle = spawn_session(connector, "abc", Some("T1"), config);

    let _connection = handshake(&mut server, "T1").await;
    wait_for(&handle, |v| v.connection_state == ConnectionState::Ready).await;
}

#[tokio::test]
async fn test_refused_connection_without_policy_stays_failed() {
    let (connector, server) = memory_network();
    server.refuse_next(1);
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());

    let view = wait_for(&handle, |v| v.connection_state == ConnectionState::Failed).await;
    assert!(view.messages.is_empty());
}

// ----------------------------------------------------------------------------
// Teardown and Switching
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let (connector, mut server) = memory_network();
    let handle = spawn_session(connector, "abc", Some("T1"), SessionConfig::default());

    let mut connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": [{"id": 1, "content": "x"}]}));
    wait_for(&handle, |v| v.history_loaded).await;

    handle.teardown().await;
    handle.teardown().await;

    let view = handle.view();
    assert_eq!(view.connection_state, ConnectionState::Closed);
    assert!(view.messages.is_empty());
    assert!(!handle.is_running());
    assert_eq!(timeout(WAIT, connection.recv_text()).await.unwrap(), None);

    assert_eq!(
        handle.send_message("after close").await,
        SendOutcome::Skipped(SkipReason::ChannelUnavailable)
    );
}

#[tokio::test]
async fn test_switching_conversations_isolates_sessions() {
    let (connector, mut server) = memory_network();
    let mut host = ConversationHost::new(endpoint(), Arc::new(StaticCredential::from_token("T1")))
        .with_connector(connector);

    let first = host.switch_to(conversation("abc")).await.unwrap();
    let mut first_connection = handshake(&mut server, "T1").await;
    first_connection.send_json(json!({"event": "fetch", "messages": [{"id": 1, "content": "abc-1"}]}));
    wait_for(&first, |v| v.history_loaded).await;

    // Same conversation again keeps the session
    let again = host.switch_to(conversation("abc")).await.unwrap();
    assert_eq!(again.session_id(), first.session_id());

    let second = host.switch_to(conversation("xyz")).await.unwrap();
    assert_ne!(second.session_id(), first.session_id());
    assert_eq!(first.view().connection_state, ConnectionState::Closed);
    assert!(first.view().messages.is_empty());
    assert_eq!(
        timeout(WAIT, first_connection.recv_text()).await.unwrap(),
        None
    );

    let second_connection = handshake(&mut server, "T1").await;
    assert!(second_connection.endpoint().path().ends_with("/xyz/"));
    assert!(second.view().messages.is_empty());

    // The old channel is gone; anything it still sends goes nowhere
    first_connection.send_json(json!({"event": "message", "id": 9, "content": "stale"}));
    second_connection.send_json(json!({"event": "fetch", "messages": [{"id": 5, "content": "xyz-1"}]}));
    let view = wait_for(&second, |v| v.history_loaded).await;
    assert_eq!(contents(&view), vec!["xyz-1"]);

    host.close().await;
    assert!(host.current().is_none());
    assert_eq!(second.view().connection_state, ConnectionState::Closed);
}

#[tokio::test]
async fn test_reselecting_failed_conversation_starts_new_session() {
    let (connector, mut server) = memory_network();
    let mut host = ConversationHost::new(endpoint(), Arc::new(StaticCredential::from_token("T1")))
        .with_connector(connector);

    let first = host.switch_to(conversation("abc")).await.unwrap();
    let connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": [{"id": 1, "content": "old"}]}));
    wait_for(&first, |v| v.history_loaded).await;

    connection.abort();
    wait_for(&first, |v| v.connection_state == ConnectionState::Failed).await;
    assert!(!first.is_running());

    let second = host.switch_to(conversation("abc")).await.unwrap();
    assert_ne!(second.session_id(), first.session_id());
    assert_eq!(first.view().connection_state, ConnectionState::Closed);

    let connection = handshake(&mut server, "T1").await;
    connection.send_json(json!({"event": "fetch", "messages": [{"id": 2, "content": "fresh"}]}));
    let view = wait_for(&second, |v| v.history_loaded).await;
    assert_eq!(contents(&view), vec!["fresh"]);
    assert!(second.is_running());

    host.close().await;
}
