use sqlx::SqlitePool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Some containers defeat duration extraction; the original probe falls back
/// to this so voice notes still render a progress bar.
pub const DEFAULT_DURATION_SECS: f64 = 10.0;

/// Seam for the media inspection collaborator. The default implementation
/// extracts nothing and every upload gets the fallback duration; a real
/// deployment plugs an ffprobe-backed implementation in here.
pub trait DurationProbe: Send + Sync {
    fn probe(&self, media_type: &str, data: &[u8]) -> Option<f64>;
}

pub type SharedProbe = Arc<dyn DurationProbe>;

pub struct NoProbe;

impl DurationProbe for NoProbe {
    fn probe(&self, _media_type: &str, _data: &[u8]) -> Option<f64> {
        None
    }
}

#[derive(Debug)]
pub struct StoredMedia {
    pub creator_id: String,
    pub message_id: Option<String>,
    pub media_type: String,
    pub media_data: Vec<u8>,
}

/// Stores an uploaded blob and returns its reference id. The row starts
/// unlinked; `send` attaches it to a message later, atomically with the
/// message insert.
pub async fn save(
    db_pool: &SqlitePool,
    probe: &SharedProbe,
    creator: Uuid,
    media_type: &str,
    data: &[u8],
) -> ApiResult<String> {
    if data.is_empty() {
        return Err(ApiError::validation("No file uploaded"));
    }
    if !media_type.starts_with("audio/") && !media_type.starts_with("video/") {
        return Err(ApiError::validation("Invalid media type"));
    }

    let duration = probe
        .probe(media_type, data)
        .unwrap_or(DEFAULT_DURATION_SECS);
    tracing::info!(%media_type, bytes = data.len(), duration, "media uploaded");

    let id = Uuid::now_v7().to_string();
    sqlx::query(
        "INSERT INTO media_content (id, creator_id, media_type, media_data, duration, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(creator.to_string())
    .bind(media_type)
    .bind(data)
    .bind(duration)
    .bind(OffsetDateTime::now_utc())
    .execute(db_pool)
    .await?;

    Ok(id)
}

/// Fetches a media blob for `requester`. Access is limited to the uploader
/// and, once linked, the two parties of the carrying message.
pub async fn fetch(
    db_pool: &SqlitePool,
    requester: Uuid,
    media_id: &str,
) -> ApiResult<StoredMedia> {
    let row: Option<(String, Option<String>, String, Vec<u8>)> = sqlx::query_as(
        "SELECT creator_id, message_id, media_type, media_data FROM media_content WHERE id = ?",
    )
    .bind(media_id)
    .fetch_optional(db_pool)
    .await?;

    let Some((creator_id, message_id, media_type, media_data)) = row else {
        return Err(ApiError::not_found("Media content not found"));
    };

    let mut allowed = vec![creator_id.clone()];
    if let Some(message_id) = &message_id {
        let parties: Option<(String, String)> =
            sqlx::query_as("SELECT sender_id, receiver_id FROM messages WHERE id = ?")
                .bind(message_id)
                .fetch_optional(db_pool)
                .await?;
        if let Some((sender_id, receiver_id)) = parties {
            allowed.push(sender_id);
            allowed.push(receiver_id);
        }
    }

    if !allowed.contains(&requester.to_string()) {
        return Err(ApiError::forbidden(
            "You are not authorized to access this media content",
        ));
    }

    Ok(StoredMedia {
        creator_id,
        message_id,
        media_type,
        media_data,
    })
}
