use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(MessageId);

/// Prefix carried by client-side optimistic message ids until the server assigns one.
pub const TEMP_ID_PREFIX: &str = "temp-";

impl MessageId {
    pub fn temporary(timestamp_millis: i64) -> Self {
        Self(format!("{TEMP_ID_PREFIX}{timestamp_millis}"))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

/// The subset of a replied-to message that travels with the reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Replaced,
    Removed,
}

/// Applies one user's reaction to an ordered reaction list.
///
/// A user holds at most one reaction per message: reacting with the emoji already held
/// removes it, a different emoji replaces it in place, otherwise it is appended.
pub fn toggle_reaction(
    reactions: &mut Vec<Reaction>,
    user_id: &UserId,
    emoji: &str,
) -> ReactionChange {
    match reactions.iter().position(|r| &r.user_id == user_id) {
        Some(index) if reactions[index].emoji == emoji => {
            reactions.remove(index);
            ReactionChange::Removed
        }
        Some(index) => {
            reactions[index].emoji = emoji.to_string();
            ReactionChange::Replaced
        }
        None => {
            reactions.push(Reaction {
                user_id: user_id.clone(),
                emoji: emoji.to_string(),
            });
            ReactionChange::Added
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default)]
    pub reply_to: Option<MessageRef>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn has_media(&self) -> bool {
        self.image.is_some() || self.video.is_some()
    }

    /// The other participant as seen from `me`.
    pub fn partner_of(&self, me: &UserId) -> &UserId {
        if &self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    pub fn involves(&self, user_id: &UserId) -> bool {
        &self.sender_id == user_id || &self.receiver_id == user_id
    }

    /// Copies the mutable fields of `update` onto `self`. Identity fields never change.
    pub fn merge_from(&mut self, update: &Message) {
        self.text = update.text.clone();
        self.image = update.image.clone();
        self.video = update.video.clone();
        self.reply_to = update.reply_to.clone();
        self.seen = update.seen;
        self.is_edited = update.is_edited;
        self.reactions = update.reactions.clone();
    }

    pub fn to_ref(&self) -> MessageRef {
        MessageRef {
            id: self.id.clone(),
            sender_id: self.sender_id.clone(),
            text: self.text.clone(),
            image: self.image.clone(),
            video: self.video.clone(),
        }
    }

    /// Short preview used for sidebar ordering.
    pub fn summary(&self) -> LastMessageSummary {
        let text = match (&self.text, &self.image, &self.video) {
            (Some(text), _, _) if !text.is_empty() => text.clone(),
            (_, Some(_), _) => "📷 Photo".to_string(),
            (_, _, Some(_)) => "🎥 Video".to_string(),
            _ => String::new(),
        };
        LastMessageSummary {
            text,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageSummary {
    pub text: String,
    pub created_at: DateTime<Utc>,
}
