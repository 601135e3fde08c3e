use chrono::Utc;
use shared::domain::{Reaction, UserId};

use super::*;

fn message(id: &str, text: &str) -> Message {
    Message {
        id: MessageId::from(id),
        sender_id: UserId::from("alice"),
        receiver_id: UserId::from("bob"),
        text: Some(text.into()),
        image: None,
        video: None,
        reply_to: None,
        created_at: Utc::now(),
        seen: false,
        is_edited: false,
        reactions: Vec::new(),
    }
}

fn ids(store: &MessageStore) -> Vec<&str> {
    store.messages().map(|m| m.id.as_str()).collect()
}

#[test]
fn replace_keeps_position_of_optimistic_entry() {
    let mut store = MessageStore::new();
    store.push(StoreEntry::confirmed(message("m1", "first")));
    let mut pending = message("temp-1", "second");
    pending.image = Some("data:image/png;base64,AA==".into());
    store.push(StoreEntry::optimistic(pending));
    store.push(StoreEntry::confirmed(message("m3", "third")));
    assert!(store.get(&MessageId::from("temp-1")).expect("temp").is_uploading);
    assert_eq!(store.temporary_count(), 1);

    assert!(store.replace(&MessageId::from("temp-1"), message("m2", "second")));
    assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);
    assert!(!store.get(&MessageId::from("m2")).expect("m2").is_uploading);
    assert_eq!(store.temporary_count(), 0);
    assert!(!store.replace(&MessageId::from("temp-1"), message("m4", "late")));
}

#[test]
fn merge_is_idempotent_and_ignores_unknown_ids() {
    let mut store = MessageStore::new();
    store.upsert(message("m1", "hi"));

    let mut reacted = message("m1", "hi");
    reacted.reactions.push(Reaction {
        user_id: UserId::from("bob"),
        emoji: "👍".into(),
    });
    assert!(store.merge(&reacted));
    assert!(store.merge(&reacted));
    let stored = &store.get(&MessageId::from("m1")).expect("m1").message;
    assert_eq!(stored.reactions.len(), 1);

    assert!(!store.merge(&message("other", "x")));
    assert_eq!(store.len(), 1);

    store.upsert(reacted.clone());
    assert_eq!(store.len(), 1);
}

#[test]
fn load_keeps_entries_that_arrived_during_fetch() {
    let mut store = MessageStore::new();
    store.upsert(message("m3", "pushed while loading"));
    store.load(vec![
        message("m1", "a"),
        message("m2", "b"),
        message("m3", "pushed while loading"),
    ]);
    assert_eq!(ids(&store), vec!["m1", "m2", "m3"]);

    store.upsert(message("m4", "late"));
    store.load(vec![message("m1", "a")]);
    assert_eq!(ids(&store), vec!["m1", "m2", "m3", "m4"]);
}

#[test]
fn mark_seen_and_remove() {
    let mut store = MessageStore::new();
    store.upsert(message("m1", "a"));
    store.upsert(message("m2", "b"));

    let seen = [MessageId::from("m1"), MessageId::from("missing")];
    assert_eq!(store.mark_seen(&seen), 1);
    assert_eq!(store.mark_seen(&seen), 0);
    assert!(store.get(&MessageId::from("m1")).expect("m1").message.seen);

    assert!(store.remove(&MessageId::from("m1")));
    assert!(!store.remove(&MessageId::from("m1")));
    assert_eq!(ids(&store), vec!["m2"]);

    store.clear();
    assert!(store.is_empty());
}

#[test]
fn changes_recorded_during_load_are_replayed_over_the_fetch() {
    let mut store = MessageStore::new();
    store.begin_load();
    assert!(store.is_loading());

    assert!(!store.remove(&MessageId::from("m1")));
    let mut edited = message("m2", "fixed");
    edited.is_edited = true;
    assert!(!store.merge(&edited));
    assert_eq!(store.mark_seen(&[MessageId::from("m3")]), 0);

    store.load(vec![message("m1", "a"), message("m2", "b"), message("m3", "c")]);
    assert!(!store.is_loading());
    assert_eq!(ids(&store), vec!["m2", "m3"]);
    let m2 = &store.get(&MessageId::from("m2")).expect("m2").message;
    assert!(m2.is_edited);
    assert_eq!(m2.text.as_deref(), Some("fixed"));
    assert!(store.get(&MessageId::from("m3")).expect("m3").message.seen);
}

#[test]
fn aborted_load_stops_recording() {
    let mut store = MessageStore::new();
    store.begin_load();
    store.remove(&MessageId::from("m1"));
    store.abort_load();
    assert!(!store.is_loading());

    store.load(vec![message("m1", "a")]);
    assert_eq!(ids(&store), vec!["m1"]);
}

#[test]
fn seen_receipt_before_replace_marks_the_confirmed_entry() {
    let mut store = MessageStore::new();
    store.push(StoreEntry::optimistic(message("temp-1", "hi")));
    assert_eq!(store.mark_seen(&[MessageId::from("m1")]), 0);

    assert!(store.replace(&MessageId::from("temp-1"), message("m1", "hi")));
    assert!(store.get(&MessageId::from("m1")).expect("m1").message.seen);

    store.clear();
    store.upsert(message("m1", "hi"));
    assert!(!store.get(&MessageId::from("m1")).expect("m1").message.seen);
}
