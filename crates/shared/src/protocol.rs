use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::{LastMessageSummary, Message, MessageId, UserId, UserProfile};

/// Events pushed from the server over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    GetOnlineUsers(Vec<UserId>),
    NewMessage(Message),
    SidebarUpdate {
        user_id: UserId,
        message: Message,
    },
    MessageEdited(Message),
    MessageDeleted {
        message_id: MessageId,
    },
    /// `partner_id` is the participant who deleted the conversation.
    ChatDeleted {
        partner_id: UserId,
    },
    MessagesSeen {
        message_ids: Vec<MessageId>,
    },
    MessageReacted(Message),
    UserTyping {
        sender_id: UserId,
    },
    UserStopTyping {
        sender_id: UserId,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetOnlineUsers(_) => "getOnlineUsers",
            Self::NewMessage(_) => "newMessage",
            Self::SidebarUpdate { .. } => "sidebarUpdate",
            Self::MessageEdited(_) => "messageEdited",
            Self::MessageDeleted { .. } => "messageDeleted",
            Self::ChatDeleted { .. } => "chatDeleted",
            Self::MessagesSeen { .. } => "messagesSeen",
            Self::MessageReacted(_) => "messageReacted",
            Self::UserTyping { .. } => "userTyping",
            Self::UserStopTyping { .. } => "userStopTyping",
        }
    }
}

/// Signals a connected client may send to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientSignal {
    Typing { receiver_id: UserId },
    StopTyping { receiver_id: UserId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditMessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerSummary {
    pub profile: UserProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessageSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationList {
    pub partners: Vec<PartnerSummary>,
    #[serde(default)]
    pub unseen: HashMap<UserId, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeleted {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatDeleted {
    pub partner_id: UserId,
    pub removed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenReceipt {
    pub message_ids: Vec<MessageId>,
}
