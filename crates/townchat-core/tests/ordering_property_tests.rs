//! Property-based tests for message ordering and history replacement
//!
//! These tests verify that the store always reflects arrival order, that a
//! history page replaces everything before it, and that live messages racing
//! the history fetch land after it in the order they arrived.

use proptest::prelude::*;
use serde_json::json;
use townchat_core::{
    ChannelEvent, CloseReason, ConversationId, Credential, GenerationCounter, MessageStore,
    Session, SessionConfig,
};

/// Generate a wire message with an arbitrary (unordered) timestamp
fn arb_wire_message() -> impl Strategy<Value = serde_json::Value> {
    (
        1u64..1_000_000,
        "[a-z]{1,12}",
        0u32..86_400,
        any::<bool>(),
    )
        .prop_map(|(id, content, seconds, is_self)| {
            json!({
                "id": id,
                "content": content,
                "is_self": is_self,
                "created_at": format!("2024-01-01T{:02}:{:02}:{:02}Z", seconds / 3600, (seconds / 60) % 60, seconds % 60),
            })
        })
}

fn ready_session(config: SessionConfig) -> Session {
    let mut session = Session::new(
        ConversationId::new("abc").unwrap(),
        Credential::new("T1"),
        config,
        GenerationCounter::new(),
    )
    .unwrap();
    session.start();
    deliver(&mut session, ChannelEvent::Opened);
    deliver_frame(&mut session, json!({"event": "auth"}));
    session
}

fn deliver(session: &mut Session, event: ChannelEvent) {
    let generation = session.current_generation().unwrap();
    session.on_channel_event(generation, event);
}

fn deliver_frame(session: &mut Session, value: serde_json::Value) {
    deliver(session, ChannelEvent::Frame(value.to_string()));
}

fn live(message: &serde_json::Value) -> serde_json::Value {
    let mut frame = message.clone();
    frame["event"] = json!("message");
    frame
}

fn contents(session: &Session) -> Vec<String> {
    session.messages().iter().map(|m| m.content.clone()).collect()
}

fn expected(messages: &[serde_json::Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m["content"].as_str().unwrap().to_string())
        .collect()
}

proptest! {
    /// Property: live messages are stored in arrival order, never by timestamp
    #[test]
    fn live_messages_keep_arrival_order(
        messages in prop::collection::vec(arb_wire_message(), 0..40)
    ) {
        let mut session = ready_session(SessionConfig::default());
        deliver_frame(&mut session, json!({"event": "fetch", "messages": []}));

        for message in &messages {
            deliver_frame(&mut session, live(message));
        }

        prop_assert_eq!(contents(&session), expected(&messages));
    }

    /// Property: a history page holds exactly its messages, oldest-first
    #[test]
    fn history_replaces_prior_content(
        before in prop::collection::vec(arb_wire_message(), 0..10),
        page in prop::collection::vec(arb_wire_message(), 0..40),
    ) {
        let mut store = MessageStore::new();
        for message in &before {
            store.append(serde_json::from_value(message.clone()).unwrap());
        }

        let mut oldest_first: Vec<_> = page
            .iter()
            .map(|m| serde_json::from_value(m.clone()).unwrap())
            .collect();
        oldest_first.reverse();
        store.replace_all(oldest_first, false);

        let mut reversed = expected(&page);
        reversed.reverse();
        let stored: Vec<_> = store.messages().iter().map(|m| m.content.clone()).collect();
        prop_assert_eq!(stored, reversed);
    }

    /// Property: live messages that overtake the history land after it, in order
    #[test]
    fn racing_live_messages_follow_history(
        page in prop::collection::vec(arb_wire_message(), 0..20),
        racing in prop::collection::vec(arb_wire_message(), 0..20),
        after in prop::collection::vec(arb_wire_message(), 0..20),
    ) {
        let mut session = ready_session(SessionConfig::default());

        for message in &racing {
            deliver_frame(&mut session, live(message));
        }
        prop_assert!(session.messages().is_empty());

        deliver_frame(&mut session, json!({"event": "fetch", "messages": page}));
        for message in &after {
            deliver_frame(&mut session, live(message));
        }

        let mut wanted = expected(&page);
        wanted.reverse();
        wanted.extend(expected(&racing));
        wanted.extend(expected(&after));
        prop_assert_eq!(contents(&session), wanted);
    }

    /// Property: with dedup enabled no id appears twice
    #[test]
    fn dedup_keeps_ids_unique(
        page in prop::collection::vec(arb_wire_message(), 0..20),
        live_messages in prop::collection::vec(arb_wire_message(), 0..20),
    ) {
        let config = SessionConfig { dedup_by_id: true, ..SessionConfig::default() };
        let mut session = ready_session(config);

        deliver_frame(&mut session, json!({"event": "fetch", "messages": page}));
        for message in live_messages.iter().chain(page.iter()) {
            deliver_frame(&mut session, live(message));
        }

        let mut ids: Vec<_> = session
            .messages()
            .iter()
            .filter_map(|m| m.id.clone())
            .collect();
        let total = ids.len();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids.dedup();
        prop_assert_eq!(ids.len(), total);
    }

    /// Property: teardown always empties the store, however often it is called
    #[test]
    fn teardown_empties_store(
        page in prop::collection::vec(arb_wire_message(), 0..20),
        repeats in 1usize..4,
    ) {
        let mut session = ready_session(SessionConfig::default());
        deliver_frame(&mut session, json!({"event": "fetch", "messages": page}));

        for _ in 0..repeats {
            session.teardown(CloseReason::Teardown);
            prop_assert!(session.messages().is_empty());
        }
    }
}
