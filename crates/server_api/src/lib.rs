use std::{cmp::Reverse, collections::HashMap};

use shared::{
    domain::{Message, MessageId, UserId, UserProfile},
    error::ApiError,
    protocol::{
        ChatDeleted, ConversationList, EditMessageRequest, LoginRequest, MessageDeleted,
        PartnerSummary, ReactRequest, SeenReceipt, SendMessageRequest, ServerEvent,
        UpdateProfileRequest,
    },
};
use storage::{NewMessage, Storage};
use tracing::{debug, error};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// One realtime event addressed to one user, handed to the fan-out router after the
/// request has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target: UserId,
    pub event: ServerEvent,
}

impl Delivery {
    pub fn new(target: UserId, event: ServerEvent) -> Self {
        Self { target, event }
    }
}

/// Reply payload plus the events the request caused.
#[derive(Debug)]
pub struct Outcome<T> {
    pub data: T,
    pub deliveries: Vec<Delivery>,
}

impl<T> Outcome<T> {
    fn new(data: T, deliveries: Vec<Delivery>) -> Self {
        Self { data, deliveries }
    }

    fn quiet(data: T) -> Self {
        Self::new(data, Vec::new())
    }
}

pub async fn login(ctx: &ApiContext, request: &LoginRequest) -> Result<UserProfile, ApiError> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(ApiError::validation("username cannot be empty"));
    }
    ctx.storage
        .create_or_get_user(username, request.full_name.as_deref())
        .await
        .map_err(internal)
}

pub async fn user_profile(ctx: &ApiContext, user_id: &UserId) -> Result<UserProfile, ApiError> {
    ctx.storage
        .user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn update_profile(
    ctx: &ApiContext,
    user_id: &UserId,
    request: &UpdateProfileRequest,
) -> Result<UserProfile, ApiError> {
    authenticate(ctx, user_id).await?;
    ctx.storage
        .update_profile(user_id, request)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

/// Resolves the acting user, rejecting ids that do not name an account.
pub async fn authenticate(ctx: &ApiContext, user_id: &UserId) -> Result<UserProfile, ApiError> {
    ctx.storage
        .user(user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::unauthorized("Not authorized"))
}

/// Every other account, most recently active conversation first. Partners without any
/// messages follow in username order.
pub async fn list_conversations(
    ctx: &ApiContext,
    me: &UserId,
    limit: Option<usize>,
) -> Result<ConversationList, ApiError> {
    authenticate(ctx, me).await?;
    let users = ctx.storage.list_users().await.map_err(internal)?;

    let mut partners = Vec::with_capacity(users.len());
    let mut unseen = HashMap::new();
    for profile in users.into_iter().filter(|user| &user.id != me) {
        let last_message = ctx
            .storage
            .latest_message_between(me, &profile.id)
            .await
            .map_err(internal)?
            .map(|message| message.summary());
        let count = ctx
            .storage
            .count_unseen(&profile.id, me)
            .await
            .map_err(internal)?;
        if count > 0 {
            unseen.insert(profile.id.clone(), count);
        }
        partners.push(PartnerSummary {
            profile,
            last_message,
        });
    }

    partners.sort_by_key(|partner| {
        Reverse(partner.last_message.as_ref().map(|summary| summary.created_at))
    });
    if let Some(limit) = limit {
        partners.truncate(limit);
    }
    Ok(ConversationList { partners, unseen })
}

/// Loads the conversation and marks the partner's unseen messages as seen.
pub async fn list_messages(
    ctx: &ApiContext,
    me: &UserId,
    partner: &UserId,
) -> Result<Outcome<Vec<Message>>, ApiError> {
    authenticate(ctx, me).await?;
    let seen_ids = ctx
        .storage
        .mark_conversation_seen(partner, me)
        .await
        .map_err(internal)?;
    let messages = ctx
        .storage
        .list_conversation(me, partner)
        .await
        .map_err(internal)?;

    let mut deliveries = Vec::new();
    if !seen_ids.is_empty() {
        debug!(%me, %partner, count = seen_ids.len(), "conversation marked seen");
        deliveries.push(Delivery::new(
            partner.clone(),
            ServerEvent::MessagesSeen {
                message_ids: seen_ids,
            },
        ));
    }
    Ok(Outcome::new(messages, deliveries))
}

pub async fn send_message(
    ctx: &ApiContext,
    me: &UserId,
    receiver: &UserId,
    request: SendMessageRequest,
) -> Result<Outcome<Message>, ApiError> {
    authenticate(ctx, me).await?;
    if me == receiver {
        return Err(ApiError::validation("cannot send a message to yourself"));
    }
    if !ctx.storage.user_exists(receiver).await.map_err(internal)? {
        return Err(ApiError::not_found("Receiver not found"));
    }

    let text = request
        .text
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    let image = request.image.filter(|payload| !payload.is_empty());
    let video = request.video.filter(|payload| !payload.is_empty());
    if text.is_none() && image.is_none() && video.is_none() {
        return Err(ApiError::validation(
            "a message needs text, an image or a video",
        ));
    }

    if let Some(reply_to) = &request.reply_to {
        let target = ctx
            .storage
            .message(reply_to)
            .await
            .map_err(internal)?
            .ok_or_else(|| ApiError::validation("replied message does not exist"))?;
        if !(target.involves(me) && target.involves(receiver)) {
            return Err(ApiError::validation(
                "replied message belongs to another conversation",
            ));
        }
    }

    let message = ctx
        .storage
        .insert_message(&NewMessage {
            sender_id: me.clone(),
            receiver_id: receiver.clone(),
            text,
            image,
            video,
            reply_to: request.reply_to,
        })
        .await
        .map_err(internal)?;

    let deliveries = vec![
        Delivery::new(receiver.clone(), ServerEvent::NewMessage(message.clone())),
        Delivery::new(
            receiver.clone(),
            ServerEvent::SidebarUpdate {
                user_id: me.clone(),
                message: message.clone(),
            },
        ),
        Delivery::new(
            me.clone(),
            ServerEvent::SidebarUpdate {
                user_id: receiver.clone(),
                message: message.clone(),
            },
        ),
    ];
    Ok(Outcome::new(message, deliveries))
}

pub async fn edit_message(
    ctx: &ApiContext,
    me: &UserId,
    message_id: &MessageId,
    request: &EditMessageRequest,
) -> Result<Outcome<Message>, ApiError> {
    authenticate(ctx, me).await?;
    let existing = owned_message(ctx, me, message_id).await?;
    let text = request.text.trim();
    if text.is_empty() && !existing.has_media() {
        return Err(ApiError::validation("message text cannot be empty"));
    }

    let updated = ctx
        .storage
        .update_message_text(message_id, text)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    let deliveries = to_both(&updated, ServerEvent::MessageEdited(updated.clone()));
    Ok(Outcome::new(updated, deliveries))
}

pub async fn delete_message(
    ctx: &ApiContext,
    me: &UserId,
    message_id: &MessageId,
) -> Result<Outcome<MessageDeleted>, ApiError> {
    authenticate(ctx, me).await?;
    let existing = owned_message(ctx, me, message_id).await?;
    if !ctx
        .storage
        .delete_message(message_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("Message not found"));
    }

    let deliveries = to_both(
        &existing,
        ServerEvent::MessageDeleted {
            message_id: message_id.clone(),
        },
    );
    Ok(Outcome::new(
        MessageDeleted {
            message_id: message_id.clone(),
        },
        deliveries,
    ))
}

/// Removes the whole conversation for both participants; only the partner is told.
pub async fn delete_chat(
    ctx: &ApiContext,
    me: &UserId,
    partner: &UserId,
) -> Result<Outcome<ChatDeleted>, ApiError> {
    authenticate(ctx, me).await?;
    if !ctx.storage.user_exists(partner).await.map_err(internal)? {
        return Err(ApiError::not_found("User not found"));
    }
    let removed = ctx
        .storage
        .delete_conversation(me, partner)
        .await
        .map_err(internal)?;

    Ok(Outcome::new(
        ChatDeleted {
            partner_id: partner.clone(),
            removed,
        },
        vec![Delivery::new(
            partner.clone(),
            ServerEvent::ChatDeleted {
                partner_id: me.clone(),
            },
        )],
    ))
}

pub async fn react(
    ctx: &ApiContext,
    me: &UserId,
    message_id: &MessageId,
    request: &ReactRequest,
) -> Result<Outcome<Message>, ApiError> {
    authenticate(ctx, me).await?;
    let emoji = request.emoji.trim();
    if emoji.is_empty() {
        return Err(ApiError::validation("emoji cannot be empty"));
    }
    let existing = find_message(ctx, message_id).await?;
    if !existing.involves(me) {
        return Err(ApiError::unauthorized("Not authorized"));
    }

    let change = ctx
        .storage
        .apply_reaction(message_id, me, emoji)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;
    debug!(%me, %message_id, ?change, "reaction applied");

    let updated = find_message(ctx, message_id).await?;
    let deliveries = to_both(&updated, ServerEvent::MessageReacted(updated.clone()));
    Ok(Outcome::new(updated, deliveries))
}

/// Marks one received message seen. Only the receiver may do this, and the sender is only
/// notified when the flag actually changed.
pub async fn mark_seen(
    ctx: &ApiContext,
    me: &UserId,
    message_id: &MessageId,
) -> Result<Outcome<SeenReceipt>, ApiError> {
    authenticate(ctx, me).await?;
    let existing = find_message(ctx, message_id).await?;
    if &existing.receiver_id != me {
        return Err(ApiError::unauthorized("Not authorized"));
    }

    let flipped = ctx
        .storage
        .mark_message_seen(message_id)
        .await
        .map_err(internal)?;
    if !flipped {
        return Ok(Outcome::quiet(SeenReceipt::default()));
    }

    let message_ids = vec![message_id.clone()];
    Ok(Outcome::new(
        SeenReceipt {
            message_ids: message_ids.clone(),
        },
        vec![Delivery::new(
            existing.sender_id,
            ServerEvent::MessagesSeen { message_ids },
        )],
    ))
}

async fn find_message(ctx: &ApiContext, message_id: &MessageId) -> Result<Message, ApiError> {
    ctx.storage
        .message(message_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("Message not found"))
}

async fn owned_message(
    ctx: &ApiContext,
    me: &UserId,
    message_id: &MessageId,
) -> Result<Message, ApiError> {
    let message = find_message(ctx, message_id).await?;
    if &message.sender_id != me {
        return Err(ApiError::unauthorized("Not authorized"));
    }
    Ok(message)
}

fn to_both(message: &Message, event: ServerEvent) -> Vec<Delivery> {
    vec![
        Delivery::new(message.sender_id.clone(), event.clone()),
        Delivery::new(message.receiver_id.clone(), event),
    ]
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %err, "storage request failed");
    ApiError::internal(err.to_string())
}
