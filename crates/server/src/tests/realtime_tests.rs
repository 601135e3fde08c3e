use std::time::Duration;

use client_core::{
    ChatApi, ChatEngine, ChatState, ClientEvent, Draft, HttpChatApi, RealtimeConnection,
};
use tokio::net::TcpListener;

use super::*;

struct Peer {
    profile: UserProfile,
    api: HttpChatApi,
    engine: Arc<ChatEngine>,
    _connection: RealtimeConnection,
}

async fn spawn_server() -> (SocketAddr, String) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let state = Arc::new(AppState::new(ApiContext { storage }));
    let app = build_router(state, &Settings::default()).expect("router");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, format!("http://{addr}"))
}

async fn join(server_url: &str, username: &str, typing_idle: Duration) -> Peer {
    let (api, profile) = HttpChatApi::login(server_url, username, None)
        .await
        .expect("login");
    let connection = RealtimeConnection::connect(server_url, &profile.id)
        .await
        .expect("realtime");
    let engine =
        ChatEngine::new_with_typing_idle(profile.id.clone(), Arc::new(api.clone()), typing_idle);
    engine.attach(&connection);
    Peer {
        profile,
        api,
        engine,
        _connection: connection,
    }
}

async fn wait_until(engine: &ChatEngine, check: impl Fn(&ChatState) -> bool) -> ChatState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = engine.snapshot().await;
            if check(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state never matched")
}

/// Two online users, each seeing the other in presence and in the sidebar.
async fn pair() -> (Peer, Peer) {
    let (_, server_url) = spawn_server().await;
    let alice = join(&server_url, "alice", Duration::from_millis(150)).await;
    let bob = join(&server_url, "bob", Duration::from_millis(150)).await;
    let bob_id = bob.profile.id.clone();
    wait_until(&alice.engine, |state| state.is_online(&bob_id)).await;
    alice.engine.load_conversations(None).await.expect("alice list");
    bob.engine.load_conversations(None).await.expect("bob list");
    (alice, bob)
}

#[tokio::test]
async fn message_reaches_partner_and_seen_receipt_flows_back() {
    let (alice, bob) = pair().await;
    let mut bob_events = bob.engine.subscribe();

    alice
        .engine
        .open_conversation(&bob.profile.id)
        .await
        .expect("open");
    let sent = alice.engine.send(Draft::text("hi")).await.expect("send");
    assert!(!sent.id.is_temporary());
    assert!(!sent.seen);

    let state = alice.engine.snapshot().await;
    assert_eq!(state.store.len(), 1);
    assert_eq!(state.store.temporary_count(), 0);
    assert_eq!(state.store.entries()[0].message.id, sent.id);

    let alice_id = alice.profile.id.clone();
    wait_until(&bob.engine, |state| state.unseen_from(&alice_id) == 1).await;
    let incoming = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ClientEvent::IncomingMessage(message)) = bob_events.recv().await {
                return message;
            }
        }
    })
    .await
    .expect("incoming message");
    assert_eq!(incoming.text.as_deref(), Some("hi"));

    bob.engine
        .open_conversation(&alice.profile.id)
        .await
        .expect("bob opens");
    let bob_state = bob.engine.snapshot().await;
    assert_eq!(bob_state.store.len(), 1);
    assert!(bob_state.store.entries()[0].message.seen);

    let sent_id = sent.id.clone();
    wait_until(&alice.engine, |state| {
        state
            .store
            .get(&sent_id)
            .map(|entry| entry.message.seen)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn live_message_in_open_chat_is_acknowledged() {
    let (alice, bob) = pair().await;
    alice
        .engine
        .open_conversation(&bob.profile.id)
        .await
        .expect("alice opens");
    bob.engine
        .open_conversation(&alice.profile.id)
        .await
        .expect("bob opens");

    let sent = alice.engine.send(Draft::text("ping")).await.expect("send");
    let sent_id = sent.id.clone();
    wait_until(&bob.engine, |state| state.store.contains(&sent_id)).await;
    wait_until(&alice.engine, |state| {
        state
            .store
            .get(&sent_id)
            .map(|entry| entry.message.seen)
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn reaction_is_pushed_to_both_sides_and_toggles_off() {
    let (alice, bob) = pair().await;
    bob.engine
        .open_conversation(&alice.profile.id)
        .await
        .expect("bob opens");
    let message = bob.engine.send(Draft::text("react to me")).await.expect("send");
    alice
        .engine
        .open_conversation(&bob.profile.id)
        .await
        .expect("alice opens");

    alice.engine.react(&message.id, "👍").await.expect("react");
    let message_id = message.id.clone();
    let reacted = |state: &ChatState| {
        state
            .store
            .get(&message_id)
            .map(|entry| entry.message.reactions.len() == 1)
            .unwrap_or(false)
    };
    let bob_state = wait_until(&bob.engine, reacted).await;
    let reactions = &bob_state.store.get(&message.id).expect("message").message.reactions;
    assert_eq!(reactions[0].user_id, alice.profile.id);
    assert_eq!(reactions[0].emoji, "👍");
    wait_until(&alice.engine, reacted).await;

    alice.engine.react(&message.id, "👍").await.expect("toggle off");
    wait_until(&bob.engine, |state| {
        state
            .store
            .get(&message_id)
            .map(|entry| entry.message.reactions.is_empty())
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test]
async fn typing_is_relayed_to_the_open_partner() {
    let (alice, bob) = pair().await;
    alice
        .engine
        .open_conversation(&bob.profile.id)
        .await
        .expect("alice opens");
    bob.engine
        .open_conversation(&alice.profile.id)
        .await
        .expect("bob opens");

    alice.engine.input_changed().await;
    wait_until(&bob.engine, |state| state.partner_typing).await;
    wait_until(&bob.engine, |state| !state.partner_typing).await;
}

#[tokio::test]
async fn offline_partner_catches_up_on_next_fetch() {
    let (_, server_url) = spawn_server().await;
    let alice = join(&server_url, "alice", Duration::from_millis(150)).await;
    let (bob_api, bob_profile) = HttpChatApi::login(&server_url, "bob", None)
        .await
        .expect("bob login");

    alice.engine.load_conversations(None).await.expect("list");
    alice
        .engine
        .open_conversation(&bob_profile.id)
        .await
        .expect("open");
    let sent = alice.engine.send(Draft::text("hi")).await.expect("send");
    assert!(!sent.seen);

    let history = bob_api
        .list_messages(&alice.profile.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert!(history[0].seen);

    let sent_id = sent.id.clone();
    wait_until(&alice.engine, |state| {
        state
            .store
            .get(&sent_id)
            .map(|entry| entry.message.seen)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(alice.api.user_id(), &alice.profile.id);
}

#[tokio::test]
async fn realtime_handshake_for_unknown_user_is_refused() {
    let (addr, _) = spawn_server().await;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?user_id=ghost")).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should be refused"),
    }
}
