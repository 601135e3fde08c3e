use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{
        toggle_reaction, Message, MessageId, MessageRef, Reaction, ReactionChange, UserId,
        UserProfile,
    },
    protocol::UpdateProfileRequest,
};

const MESSAGE_COLUMNS: &str = "seq, id, sender_id, receiver_id, text, image, video, reply_to_id, \
                               created_at_ms, seen, is_edited";
const USER_COLUMNS: &str = "id, username, full_name, bio, profile_pic, created_at_ms";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// A message about to be persisted. Ids and timestamps are assigned by [`Storage`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: Option<String>,
    pub image: Option<String>,
    pub video: Option<String>,
    pub reply_to: Option<MessageId>,
}

struct MessageRow {
    id: MessageId,
    sender_id: UserId,
    receiver_id: UserId,
    text: Option<String>,
    image: Option<String>,
    video: Option<String>,
    reply_to_id: Option<MessageId>,
    created_at: DateTime<Utc>,
    seen: bool,
    is_edited: bool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to `sqlite::memory:` opens a separate database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(%database_url, max_connections, "storage ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns the account registered under `username`, creating it on first use.
    pub async fn create_or_get_user(
        &self,
        username: &str,
        full_name: Option<&str>,
    ) -> Result<UserProfile> {
        if let Some(existing) = self.user_by_username(username).await? {
            return Ok(existing);
        }

        let id = UserId::generate();
        let full_name = full_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(username);
        sqlx::query(
            "INSERT INTO users (id, username, full_name, created_at_ms) VALUES (?, ?, ?, ?)
             ON CONFLICT(username) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(username)
        .bind(full_name)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.user_by_username(username)
            .await?
            .with_context(|| format!("user '{username}' missing after insert"))
    }

    pub async fn user(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    pub async fn user_exists(&self, user_id: &UserId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(user_from_row).collect()
    }

    pub async fn update_profile(
        &self,
        user_id: &UserId,
        update: &UpdateProfileRequest,
    ) -> Result<Option<UserProfile>> {
        let result = sqlx::query(
            "UPDATE users SET
                full_name = COALESCE(?, full_name),
                bio = COALESCE(?, bio),
                profile_pic = COALESCE(?, profile_pic)
             WHERE id = ?",
        )
        .bind(update.full_name.as_deref())
        .bind(update.bio.as_deref())
        .bind(update.profile_pic.as_deref())
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.user(user_id).await
    }

    pub async fn insert_message(&self, new_message: &NewMessage) -> Result<Message> {
        let id = MessageId::generate();
        sqlx::query(
            "INSERT INTO messages
                (id, sender_id, receiver_id, text, image, video, reply_to_id, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.as_str())
        .bind(new_message.sender_id.as_str())
        .bind(new_message.receiver_id.as_str())
        .bind(new_message.text.as_deref())
        .bind(new_message.image.as_deref())
        .bind(new_message.video.as_deref())
        .bind(new_message.reply_to.as_ref().map(MessageId::as_str))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.message(&id)
            .await?
            .with_context(|| format!("message {id} missing after insert"))
    }

    pub async fn message(&self, message_id: &MessageId) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(message_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut hydrated = self.hydrate(vec![message_from_row(&row)?]).await?;
        Ok(hydrated.pop())
    }

    /// All messages exchanged between `a` and `b`, oldest first.
    pub async fn list_conversation(&self, a: &UserId, b: &UserId) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY seq ASC"
        ))
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_all(&self.pool)
        .await?;
        let rows = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        self.hydrate(rows).await
    }

    pub async fn latest_message_between(&self, a: &UserId, b: &UserId) -> Result<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.hydrate(vec![message_from_row(&row)?]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn count_unseen(&self, sender_id: &UserId, receiver_id: &UserId) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE sender_id = ? AND receiver_id = ? AND seen = 0",
        )
        .bind(sender_id.as_str())
        .bind(receiver_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Marks every unseen message from `sender_id` to `receiver_id` seen and returns the
    /// ids that changed.
    pub async fn mark_conversation_seen(
        &self,
        sender_id: &UserId,
        receiver_id: &UserId,
    ) -> Result<Vec<MessageId>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM messages
             WHERE sender_id = ? AND receiver_id = ? AND seen = 0 ORDER BY seq",
        )
        .bind(sender_id.as_str())
        .bind(receiver_id.as_str())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE messages SET seen = 1 WHERE sender_id = ? AND receiver_id = ? AND seen = 0",
        )
            .bind(sender_id.as_str())
            .bind(receiver_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(ids.into_iter().map(MessageId).collect())
    }

    /// Returns `true` when the message flipped from unseen to seen.
    pub async fn mark_message_seen(&self, message_id: &MessageId) -> Result<bool> {
        let result = sqlx::query("UPDATE messages SET seen = 1 WHERE id = ? AND seen = 0")
            .bind(message_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_message_text(
        &self,
        message_id: &MessageId,
        text: &str,
    ) -> Result<Option<Message>> {
        let result = sqlx::query("UPDATE messages SET text = ?, is_edited = 1 WHERE id = ?")
            .bind(text)
            .bind(message_id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.message(message_id).await
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(message_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes every message between the two users, in both directions.
    pub async fn delete_conversation(&self, a: &UserId, b: &UserId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1)",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Toggles or replaces `user_id`'s reaction on a message. `None` when the message
    /// does not exist.
    pub async fn apply_reaction(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Option<ReactionChange>> {
        let mut tx = self.pool.begin().await?;
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE id = ?")
            .bind(message_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
        if exists == 0 {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT user_id, emoji FROM message_reactions WHERE message_id = ? ORDER BY seq",
        )
        .bind(message_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        let mut reactions = rows
            .iter()
            .map(|row| -> Result<Reaction> {
                Ok(Reaction {
                    user_id: UserId(row.try_get("user_id")?),
                    emoji: row.try_get("emoji")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let change = toggle_reaction(&mut reactions, user_id, emoji);
        let statement = match change {
            ReactionChange::Added => {
                "INSERT INTO message_reactions (emoji, message_id, user_id) VALUES (?, ?, ?)"
            }
            ReactionChange::Replaced => {
                "UPDATE message_reactions SET emoji = ? WHERE message_id = ? AND user_id = ?"
            }
            ReactionChange::Removed => {
                "DELETE FROM message_reactions WHERE emoji = ? AND message_id = ? AND user_id = ?"
            }
        };
        sqlx::query(statement)
            .bind(emoji)
            .bind(message_id.as_str())
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(change))
    }

    /// Attaches reactions and reply previews to raw message rows.
    async fn hydrate(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let reaction_rows = {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "SELECT message_id, user_id, emoji FROM message_reactions WHERE message_id IN (",
            );
            let mut ids = builder.separated(", ");
            for row in &rows {
                ids.push_bind(row.id.0.clone());
            }
            ids.push_unseparated(") ORDER BY seq");
            builder.build().fetch_all(&self.pool).await?
        };
        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            let message_id: String = row.try_get("message_id")?;
            reactions.entry(message_id).or_default().push(Reaction {
                user_id: UserId(row.try_get("user_id")?),
                emoji: row.try_get("emoji")?,
            });
        }

        let mut reply_cache: HashMap<MessageId, Option<MessageRef>> = HashMap::new();
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let reply_to = match &row.reply_to_id {
                Some(reply_id) => {
                    if let Some(cached) = reply_cache.get(reply_id) {
                        cached.clone()
                    } else {
                        let resolved = self.message_ref(reply_id).await?;
                        reply_cache.insert(reply_id.clone(), resolved.clone());
                        resolved
                    }
                }
                None => None,
            };
            messages.push(Message {
                reactions: reactions.remove(row.id.as_str()).unwrap_or_default(),
                id: row.id,
                sender_id: row.sender_id,
                receiver_id: row.receiver_id,
                text: row.text,
                image: row.image,
                video: row.video,
                reply_to,
                created_at: row.created_at,
                seen: row.seen,
                is_edited: row.is_edited,
            });
        }
        Ok(messages)
    }

    async fn message_ref(&self, message_id: &MessageId) -> Result<Option<MessageRef>> {
        let row = sqlx::query("SELECT id, sender_id, text, image, video FROM messages WHERE id = ?")
            .bind(message_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<MessageRef> {
            Ok(MessageRef {
                id: MessageId(row.try_get("id")?),
                sender_id: UserId(row.try_get("sender_id")?),
                text: row.try_get("text")?,
                image: row.try_get("image")?,
                video: row.try_get("video")?,
            })
        })
        .transpose()
    }
}

fn message_from_row(row: &SqliteRow) -> Result<MessageRow> {
    Ok(MessageRow {
        id: MessageId(row.try_get("id")?),
        sender_id: UserId(row.try_get("sender_id")?),
        receiver_id: UserId(row.try_get("receiver_id")?),
        text: row.try_get("text")?,
        image: row.try_get("image")?,
        video: row.try_get("video")?,
        reply_to_id: row
            .try_get::<Option<String>, _>("reply_to_id")?
            .map(MessageId),
        created_at: millis_to_datetime(row.try_get("created_at_ms")?),
        seen: row.try_get::<i64, _>("seen")? != 0,
        is_edited: row.try_get::<i64, _>("is_edited")? != 0,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<UserProfile> {
    Ok(UserProfile {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        bio: row.try_get("bio")?,
        profile_pic: row.try_get("profile_pic")?,
        created_at: millis_to_datetime(row.try_get("created_at_ms")?),
    })
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
