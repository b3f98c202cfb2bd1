use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::contacts::ContactStatus;
use crate::error::{ApiError, ApiResult};
use crate::notify::{Event, PresenceRegistry};

pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Delivery lifecycle. The ordering is meaningful: a message only ever moves
/// forward, so any transition is `max(current, requested)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Created,
    Delivered,
    Seen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Audio,
    Video,
}

impl MessageType {
    pub fn parse(value: &str) -> ApiResult<Self> {
        match value {
            "text" => Ok(Self::Text),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            _ => Err(ApiError::validation("Invalid message type")),
        }
    }
}

/// A message joined with both parties' phone numbers and any linked media
/// metadata; this is the wire shape clients see.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    pub message: Option<String>,
    pub message_type: MessageType,
    pub status: MessageStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub media_type: Option<String>,
    pub media_content_id: Option<String>,
    pub duration: Option<f64>,
}

const RECORD_SELECT: &str = "SELECT m.id, sender.phone_number AS sender,
        receiver.phone_number AS receiver, m.message, m.message_type, m.status,
        m.created_at, mc.media_type, mc.id AS media_content_id, mc.duration
 FROM messages m
 JOIN users sender ON m.sender_id = sender.id
 JOIN users receiver ON m.receiver_id = receiver.id
 LEFT JOIN media_content mc ON mc.message_id = m.id";

pub struct NewMessage {
    pub message_type: MessageType,
    pub text: Option<String>,
    pub media_content_id: Option<String>,
}

async fn contact_status(
    conn: &mut SqliteConnection,
    owner: Uuid,
    peer: Uuid,
) -> Result<Option<ContactStatus>, sqlx::Error> {
    let row: Option<(ContactStatus,)> =
        sqlx::query_as("SELECT status FROM contacts WHERE user_id = ? AND contact_id = ?")
            .bind(owner.to_string())
            .bind(peer.to_string())
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(status,)| status))
}

/// Best-effort forward transition; a no-op once the message is at or past
/// `delivered`, so a late delivery confirmation can never undo `seen`.
async fn advance_to_delivered(db_pool: &SqlitePool, message_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE messages SET status = 'delivered' WHERE id = ? AND status = 'created'")
        .bind(message_id)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Sends a message from an accepted contact. The message row, the media
/// link, the last-touch bump on both edges and the receiver's unread
/// increment commit as one unit; only then is the receiver's connection
/// poked, and a confirmed live push upgrades the status to `delivered`.
pub async fn send(
    db_pool: &SqlitePool,
    presence: &PresenceRegistry,
    sender: Uuid,
    sender_phone: &str,
    receiver: Uuid,
    new: NewMessage,
) -> ApiResult<MessageRecord> {
    let message_id = Uuid::now_v7().to_string();
    let now = OffsetDateTime::now_utc();

    let mut tx = db_pool.begin().await?;

    if contact_status(&mut tx, sender, receiver).await? != Some(ContactStatus::Accepted) {
        return Err(ApiError::forbidden(
            "You are not allowed to send messages to this user",
        ));
    }

    if matches!(new.message_type, MessageType::Audio | MessageType::Video) {
        let media_id = new
            .media_content_id
            .as_deref()
            .ok_or_else(|| ApiError::validation("Missing media content id"))?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM media_content WHERE id = ?")
            .bind(media_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(ApiError::not_found("Media content not found"));
        }
    }

    sqlx::query(
        "INSERT INTO messages (id, sender_id, receiver_id, message, message_type, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&message_id)
    .bind(sender.to_string())
    .bind(receiver.to_string())
    .bind(&new.text)
    .bind(new.message_type)
    .bind(MessageStatus::Created)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if let Some(media_id) = &new.media_content_id {
        sqlx::query("UPDATE media_content SET message_id = ? WHERE id = ?")
            .bind(&message_id)
            .bind(media_id)
            .execute(&mut *tx)
            .await?;
    }

    // Contact lists order by last touch; both sides move to the top.
    sqlx::query(
        "UPDATE contacts SET last_touch_at = ?
         WHERE (user_id = ? AND contact_id = ?) OR (user_id = ? AND contact_id = ?)",
    )
    .bind(now)
    .bind(sender.to_string())
    .bind(receiver.to_string())
    .bind(receiver.to_string())
    .bind(sender.to_string())
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE contacts SET unread_messages = unread_messages + 1
         WHERE user_id = ? AND contact_id = ?",
    )
    .bind(receiver.to_string())
    .bind(sender.to_string())
    .execute(&mut *tx)
    .await?;

    let mut record = sqlx::query_as::<_, MessageRecord>(&format!("{RECORD_SELECT} WHERE m.id = ?"))
        .bind(&message_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    // Push after commit; the notifier's answer tells us whether the message
    // already reached a live connection. Once the commit lands the send has
    // happened, so a failed status bump is logged and the record is returned
    // at its committed status instead of surfacing an error.
    if presence.notify(receiver, &Event::messages_updated(sender_phone)) {
        match advance_to_delivered(db_pool, &message_id).await {
            Ok(()) => record.status = MessageStatus::Delivered,
            Err(err) => {
                tracing::warn!(message_id = %message_id, error = %err, "delivery bump failed")
            }
        }
    }

    Ok(record)
}

/// Exact recount of the reader's unread messages from one sender. A recount
/// rather than a decrement: concurrent sends and reads cannot drift it.
async fn recount_unread(
    conn: &mut SqliteConnection,
    reader: Uuid,
    sender: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE contacts
         SET unread_messages = (SELECT COUNT(*) FROM messages
                                WHERE sender_id = ? AND receiver_id = ?
                                AND status != 'seen')
         WHERE user_id = ? AND contact_id = ?",
    )
    .bind(sender.to_string())
    .bind(reader.to_string())
    .bind(reader.to_string())
    .bind(sender.to_string())
    .execute(conn)
    .await?;
    Ok(())
}

/// Marks one message seen. Only the receiver may do this; repeating it is a
/// no-op and leaves the unread counter untouched.
pub async fn mark_read(db_pool: &SqlitePool, reader: Uuid, message_id: &str) -> ApiResult<()> {
    let row: Option<(String, String, MessageStatus)> =
        sqlx::query_as("SELECT sender_id, receiver_id, status FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(db_pool)
            .await?;

    let Some((sender_id, receiver_id, status)) = row else {
        return Err(ApiError::not_found("Message not found"));
    };
    if receiver_id != reader.to_string() {
        return Err(ApiError::forbidden(
            "You are not authorized to mark this message as seen",
        ));
    }
    if status == MessageStatus::Seen {
        return Ok(());
    }

    let sender = Uuid::parse_str(&sender_id).map_err(anyhow::Error::from)?;

    let mut tx = db_pool.begin().await?;
    sqlx::query("UPDATE messages SET status = 'seen' WHERE id = ?")
        .bind(message_id)
        .execute(&mut *tx)
        .await?;
    recount_unread(&mut tx, reader, sender).await?;
    tx.commit().await?;
    Ok(())
}

/// Bulk read receipt for all text messages from one peer, with the same
/// recount-based counter reconciliation.
pub async fn mark_all_text_read(db_pool: &SqlitePool, reader: Uuid, peer: Uuid) -> ApiResult<()> {
    let mut tx = db_pool.begin().await?;
    sqlx::query(
        "UPDATE messages SET status = 'seen'
         WHERE sender_id = ? AND receiver_id = ? AND message_type = 'text'
         AND status != 'seen'",
    )
    .bind(peer.to_string())
    .bind(reader.to_string())
    .execute(&mut *tx)
    .await?;
    recount_unread(&mut tx, reader, peer).await?;
    tx.commit().await?;
    Ok(())
}

/// Messages between the requester and one peer, or all of the requester's
/// messages when no peer is given. Newest first, capped at `limit`.
pub async fn list(
    db_pool: &SqlitePool,
    requester: Uuid,
    peer: Option<Uuid>,
    limit: i64,
) -> ApiResult<Vec<MessageRecord>> {
    let records = match peer {
        Some(peer) => {
            sqlx::query_as::<_, MessageRecord>(&format!(
                "{RECORD_SELECT}
                 WHERE (m.sender_id = ? AND m.receiver_id = ?)
                 OR (m.sender_id = ? AND m.receiver_id = ?)
                 ORDER BY m.created_at DESC LIMIT ?"
            ))
            .bind(requester.to_string())
            .bind(peer.to_string())
            .bind(peer.to_string())
            .bind(requester.to_string())
            .bind(limit)
            .fetch_all(db_pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, MessageRecord>(&format!(
                "{RECORD_SELECT}
                 WHERE m.sender_id = ? OR m.receiver_id = ?
                 ORDER BY m.created_at DESC LIMIT ?"
            ))
            .bind(requester.to_string())
            .bind(requester.to_string())
            .bind(limit)
            .fetch_all(db_pool)
            .await?
        }
    };
    Ok(records)
}
