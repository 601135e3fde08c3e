use shared::domain::MessageId;
use tokio::sync::mpsc;

use super::*;
use crate::presence::ConnectionHandle;

async fn online(
    router: &EventRouter,
    user: &str,
) -> mpsc::UnboundedReceiver<ServerEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    router
        .presence()
        .register(UserId::from(user), ConnectionHandle::new(tx))
        .await;
    rx
}

fn seen(id: &str) -> ServerEvent {
    ServerEvent::MessagesSeen {
        message_ids: vec![MessageId::from(id)],
    }
}

#[tokio::test]
async fn emit_to_offline_user_is_dropped() {
    let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
    assert!(!router.emit_to(&UserId::from("ghost"), seen("m1")).await);
}

#[tokio::test]
async fn events_for_one_connection_keep_emit_order() {
    let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
    let mut bob = online(&router, "bob").await;

    for n in 0..50 {
        assert!(router.emit_to(&UserId::from("bob"), seen(&format!("m{n}"))).await);
    }
    for n in 0..50 {
        assert_eq!(bob.recv().await, Some(seen(&format!("m{n}"))));
    }
}

#[tokio::test]
async fn emit_to_closed_writer_reports_failure() {
    let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
    let rx = online(&router, "bob").await;
    drop(rx);
    assert!(!router.emit_to(&UserId::from("bob"), seen("m1")).await);
}

#[tokio::test]
async fn broadcast_presence_reaches_everyone_with_sorted_ids() {
    let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
    let mut carol = online(&router, "carol").await;
    let mut alice = online(&router, "alice").await;

    router.broadcast_presence().await;
    let expected = ServerEvent::GetOnlineUsers(vec![UserId::from("alice"), UserId::from("carol")]);
    assert_eq!(alice.recv().await, Some(expected.clone()));
    assert_eq!(carol.recv().await, Some(expected));
}

#[tokio::test]
async fn dispatch_routes_each_delivery_to_its_target() {
    let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
    let mut alice = online(&router, "alice").await;

    router
        .dispatch(vec![
            Delivery::new(UserId::from("bob"), seen("lost")),
            Delivery::new(UserId::from("alice"), seen("m1")),
            Delivery::new(UserId::from("alice"), seen("m2")),
        ])
        .await;

    assert_eq!(alice.recv().await, Some(seen("m1")));
    assert_eq!(alice.recv().await, Some(seen("m2")));
    assert!(alice.try_recv().is_err());
}

fn last_online(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Option<Vec<UserId>> {
    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        if let ServerEvent::GetOnlineUsers(online) = event {
            last = Some(online);
        }
    }
    last
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_end_on_the_full_online_set() {
    for _ in 0..100 {
        let router = EventRouter::new(Arc::new(PresenceRegistry::new()));
        let connect = |user: &'static str| {
            let router = router.clone();
            tokio::spawn(async move {
                let rx = online(&router, user).await;
                router.broadcast_presence().await;
                rx
            })
        };
        let (alice, bob) = tokio::join!(connect("alice"), connect("bob"));
        let (mut alice, mut bob) = (alice.expect("alice"), bob.expect("bob"));

        let everyone = vec![UserId::from("alice"), UserId::from("bob")];
        assert_eq!(last_online(&mut alice), Some(everyone.clone()));
        assert_eq!(last_online(&mut bob), Some(everyone));
    }
}
