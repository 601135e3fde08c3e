//! Client-side reconciliation of the open conversation with the server.
//!
//! Local actions update [`ChatState`] optimistically and then settle against the REST
//! reply. Pushed [`ServerEvent`]s are merged by id, so replaying one converges to the
//! same state. All mutations go through one async mutex.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use chrono::Utc;
use shared::{
    domain::{Message, MessageId, UserId},
    protocol::{SendMessageRequest, ServerEvent},
};
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    attachment::{MediaAttachment, MediaKind},
    error::{ClientError, ClientResult},
    realtime::RealtimeConnection,
    sidebar::Sidebar,
    store::{MessageStore, StoreEntry},
    transport::ChatApi,
    typing::{TypingIndicator, DEFAULT_TYPING_IDLE},
};

#[derive(Debug, Clone)]
pub struct ChatState {
    pub me: UserId,
    pub open_partner: Option<UserId>,
    pub store: MessageStore,
    pub sidebar: Sidebar,
    /// Unread messages per partner. Absent means zero.
    pub unseen: HashMap<UserId, u32>,
    /// Whether the open partner is typing.
    pub partner_typing: bool,
    pub online: Vec<UserId>,
}

impl ChatState {
    fn new(me: UserId) -> Self {
        Self {
            me,
            open_partner: None,
            store: MessageStore::new(),
            sidebar: Sidebar::new(),
            unseen: HashMap::new(),
            partner_typing: false,
            online: Vec::new(),
        }
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.contains(user_id)
    }

    pub fn unseen_from(&self, partner_id: &UserId) -> u32 {
        self.unseen.get(partner_id).copied().unwrap_or(0)
    }

    fn is_open(&self, partner_id: &UserId) -> bool {
        self.open_partner.as_ref() == Some(partner_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged,
    /// A user-visible error.
    Notice(String),
    /// A message from someone else arrived.
    IncomingMessage(Message),
}

/// What the user composed. Blank text counts as no text.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: Option<String>,
    pub attachment: Option<MediaAttachment>,
    pub reply_to: Option<MessageId>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_attachment(mut self, attachment: MediaAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Identifies one attachment of the engine to a realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    generation: u64,
}

pub struct ChatEngine {
    me: UserId,
    api: Arc<dyn ChatApi>,
    state: Mutex<ChatState>,
    events: broadcast::Sender<ClientEvent>,
    last_temp_id: AtomicI64,
    generation: AtomicU64,
    subscription: StdMutex<Option<JoinHandle<()>>>,
    typing: StdMutex<Option<TypingIndicator>>,
    typing_idle: Duration,
}

impl ChatEngine {
    pub fn new(me: UserId, api: Arc<dyn ChatApi>) -> Arc<Self> {
        Self::new_with_typing_idle(me, api, DEFAULT_TYPING_IDLE)
    }

    pub fn new_with_typing_idle(
        me: UserId,
        api: Arc<dyn ChatApi>,
        typing_idle: Duration,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            state: Mutex::new(ChatState::new(me.clone())),
            me,
            api,
            events,
            last_temp_id: AtomicI64::new(0),
            generation: AtomicU64::new(0),
            subscription: StdMutex::new(None),
            typing: StdMutex::new(None),
            typing_idle,
        })
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ChatState {
        self.state.lock().await.clone()
    }

    /// Starts applying events from `connection`. Any previous attachment is torn down
    /// first, and events it still delivers are ignored.
    pub fn attach(self: &Arc<Self>, connection: &RealtimeConnection) -> SubscriptionToken {
        if let Some(previous) = lock(&self.subscription).take() {
            previous.abort();
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut rx = connection.subscribe();
        let engine = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(engine) = engine.upgrade() else {
                            break;
                        };
                        engine.apply(Some(generation), event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagged; reopen the conversation");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *lock(&self.subscription) = Some(task);
        *lock(&self.typing) = Some(TypingIndicator::new(
            Arc::new(connection.signal_sender()),
            self.typing_idle,
        ));
        debug!(generation, "engine attached");
        SubscriptionToken { generation }
    }

    /// Stops the attachment named by `token`. Stale tokens are ignored.
    pub fn detach(&self, token: SubscriptionToken) {
        if self
            .generation
            .compare_exchange(
                token.generation,
                token.generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }
        if let Some(task) = lock(&self.subscription).take() {
            task.abort();
        }
        lock(&self.typing).take();
        debug!(generation = token.generation, "engine detached");
    }

    pub async fn load_conversations(&self, limit: Option<usize>) -> ClientResult<()> {
        let list = match self.api.list_conversations(limit).await {
            Ok(list) => list,
            Err(err) => return Err(self.notice(err)),
        };
        {
            let mut state = self.state.lock().await;
            state.sidebar.load(list.partners);
            state.unseen = list.unseen;
        }
        self.changed();
        Ok(())
    }

    /// Switches the transcript to `partner_id` and fetches its history. The server marks
    /// the partner's messages seen as a side effect.
    pub async fn open_conversation(&self, partner_id: &UserId) -> ClientResult<()> {
        {
            let mut state = self.state.lock().await;
            state.open_partner = Some(partner_id.clone());
            state.store.clear();
            state.store.begin_load();
            state.partner_typing = false;
            state.unseen.remove(partner_id);
        }
        self.stop_typing();
        self.changed();

        let messages = match self.api.list_messages(partner_id).await {
            Ok(messages) => messages,
            Err(err) => {
                let mut state = self.state.lock().await;
                if state.is_open(partner_id) {
                    state.store.abort_load();
                }
                drop(state);
                return Err(self.notice(err));
            }
        };
        {
            let mut state = self.state.lock().await;
            if !state.is_open(partner_id) {
                debug!(%partner_id, "dropping history for a conversation that was closed");
                return Ok(());
            }
            state.store.load(messages);
        }
        self.changed();
        Ok(())
    }

    pub async fn close_conversation(&self) {
        {
            let mut state = self.state.lock().await;
            state.open_partner = None;
            state.store.clear();
            state.partner_typing = false;
        }
        self.stop_typing();
        self.changed();
    }

    /// Sends `draft` to the open partner. The message shows up immediately under a
    /// temporary id and is swapped in place for the stored one once the server accepts it.
    pub async fn send(&self, draft: Draft) -> ClientResult<Message> {
        let text = draft.text.filter(|text| !text.trim().is_empty());
        let (image, video) = match draft.attachment {
            Some(attachment) => match attachment.kind() {
                MediaKind::Image => (Some(attachment.data_url().to_string()), None),
                MediaKind::Video => (None, Some(attachment.data_url().to_string())),
            },
            None => (None, None),
        };
        if text.is_none() && image.is_none() && video.is_none() {
            return Err(ClientError::EmptyMessage);
        }

        let (partner_id, temp_id) = {
            let mut state = self.state.lock().await;
            let Some(partner_id) = state.open_partner.clone() else {
                return Err(ClientError::NoOpenConversation);
            };
            let reply_to = draft
                .reply_to
                .as_ref()
                .and_then(|id| state.store.get(id))
                .map(|entry| entry.message.to_ref());
            let optimistic = Message {
                id: self.next_temp_id(),
                sender_id: self.me.clone(),
                receiver_id: partner_id.clone(),
                text: text.clone(),
                image: image.clone(),
                video: video.clone(),
                reply_to,
                created_at: Utc::now(),
                seen: false,
                is_edited: false,
                reactions: Vec::new(),
            };
            let temp_id = optimistic.id.clone();
            state.sidebar.touch(&partner_id, optimistic.summary());
            state.store.push(StoreEntry::optimistic(optimistic));
            (partner_id, temp_id)
        };
        self.stop_typing();
        self.changed();

        let request = SendMessageRequest {
            text,
            image,
            video,
            reply_to: draft.reply_to,
        };
        match self.api.send_message(&partner_id, &request).await {
            Ok(saved) => {
                let saved = {
                    let mut state = self.state.lock().await;
                    state.store.replace(&temp_id, saved.clone());
                    // A seen receipt may have beaten the reply.
                    state
                        .store
                        .get(&saved.id)
                        .map(|entry| entry.message.clone())
                        .unwrap_or(saved)
                };
                self.changed();
                Ok(saved)
            }
            Err(err) => {
                // The sidebar keeps the optimistic touch.
                self.state.lock().await.store.remove(&temp_id);
                self.changed();
                warn!(%partner_id, %err, "send failed");
                Err(self.notice(err))
            }
        }
    }

    pub async fn edit(&self, message_id: &MessageId, text: &str) -> ClientResult<Message> {
        let updated = match self.api.edit_message(message_id, text).await {
            Ok(updated) => updated,
            Err(err) => return Err(self.notice(err)),
        };
        self.state.lock().await.store.merge(&updated);
        self.changed();
        Ok(updated)
    }

    /// Deletes a message for both participants.
    pub async fn delete(&self, message_id: &MessageId) -> ClientResult<()> {
        if let Err(err) = self.api.delete_message(message_id).await {
            return Err(self.notice(err));
        }
        self.state.lock().await.store.remove(message_id);
        self.changed();
        Ok(())
    }

    pub async fn delete_chat(&self, partner_id: &UserId) -> ClientResult<u64> {
        let deleted = match self.api.delete_chat(partner_id).await {
            Ok(deleted) => deleted,
            Err(err) => return Err(self.notice(err)),
        };
        {
            let mut state = self.state.lock().await;
            if state.is_open(partner_id) {
                state.store.clear();
            }
            state.sidebar.clear_summary(partner_id);
            state.unseen.remove(partner_id);
        }
        self.changed();
        Ok(deleted.removed)
    }

    /// Toggles a reaction. The transcript only changes when `messageReacted` arrives.
    pub async fn react(&self, message_id: &MessageId, emoji: &str) -> ClientResult<()> {
        match self.api.react(message_id, emoji).await {
            Ok(_) => Ok(()),
            Err(err) => Err(self.notice(err)),
        }
    }

    /// Call on every change of the compose box.
    pub async fn input_changed(&self) {
        let partner_id = self.state.lock().await.open_partner.clone();
        let Some(partner_id) = partner_id else {
            return;
        };
        if let Some(typing) = lock(&self.typing).as_ref() {
            typing.keystroke(partner_id);
        }
    }

    /// Merges one pushed event into the state.
    pub async fn apply_event(&self, event: ServerEvent) {
        self.apply(None, event).await;
    }

    async fn apply(&self, generation: Option<u64>, event: ServerEvent) {
        let mut acknowledge = None;
        let mut incoming = None;
        {
            let mut state = self.state.lock().await;
            if let Some(generation) = generation {
                if generation != self.generation.load(Ordering::SeqCst) {
                    debug!(generation, event = event.name(), "ignoring stale subscription");
                    return;
                }
            }
            match event {
                ServerEvent::GetOnlineUsers(online) => state.online = online,
                ServerEvent::NewMessage(mut message) => {
                    let partner_id = message.partner_of(&self.me).clone();
                    state.sidebar.touch(&partner_id, message.summary());
                    let from_partner = message.sender_id != self.me;
                    if state.is_open(&partner_id) {
                        if from_partner && !message.seen {
                            message.seen = true;
                            acknowledge = Some(message.id.clone());
                        }
                        state.store.upsert(message.clone());
                    } else if from_partner {
                        *state.unseen.entry(partner_id).or_default() += 1;
                    }
                    if from_partner {
                        incoming = Some(message);
                    }
                }
                ServerEvent::SidebarUpdate { user_id, message } => {
                    state.sidebar.touch(&user_id, message.summary());
                }
                ServerEvent::MessageEdited(message) | ServerEvent::MessageReacted(message) => {
                    state.store.merge(&message);
                }
                ServerEvent::MessageDeleted { message_id } => {
                    state.store.remove(&message_id);
                }
                ServerEvent::ChatDeleted { partner_id } => {
                    info!(%partner_id, "conversation deleted by partner");
                    if state.is_open(&partner_id) {
                        state.store.clear();
                    }
                    state.sidebar.clear_summary(&partner_id);
                    state.unseen.remove(&partner_id);
                }
                ServerEvent::MessagesSeen { message_ids } => {
                    state.store.mark_seen(&message_ids);
                }
                ServerEvent::UserTyping { sender_id } => {
                    if state.is_open(&sender_id) {
                        state.partner_typing = true;
                    }
                }
                ServerEvent::UserStopTyping { sender_id } => {
                    if state.is_open(&sender_id) {
                        state.partner_typing = false;
                    }
                }
            }
        }
        self.changed();
        if let Some(message) = incoming {
            let _ = self.events.send(ClientEvent::IncomingMessage(message));
        }
        if let Some(message_id) = acknowledge {
            if let Err(err) = self.api.mark_seen(&message_id).await {
                warn!(%message_id, %err, "failed to acknowledge message");
            }
        }
    }

    /// `temp-<millis>`, strictly increasing even within one millisecond.
    fn next_temp_id(&self) -> MessageId {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_temp_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| Some(now.max(prev + 1)))
            .unwrap_or_else(|prev| prev);
        MessageId::temporary(now.max(previous + 1))
    }

    fn stop_typing(&self) {
        if let Some(typing) = lock(&self.typing).as_ref() {
            typing.stop();
        }
    }

    fn changed(&self) {
        let _ = self.events.send(ClientEvent::StateChanged);
    }

    fn notice(&self, err: ClientError) -> ClientError {
        let _ = self.events.send(ClientEvent::Notice(err.to_string()));
        err
    }
}

impl Drop for ChatEngine {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.subscription).take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
