use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::notify::{Event, PresenceRegistry};
use crate::sms::SharedSms;
use crate::users::{self, UserStatus};

/// One directional contact edge. Every live relationship is two rows, one per
/// direction; all transitions below write both rows in one transaction so a
/// reader can never observe half a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    /// I sent a request that the peer has not answered.
    Requesting,
    /// The peer sent me a request I have not answered.
    Requested,
    Accepted,
    /// I removed this contact.
    Deleted,
    /// The peer removed me; I cannot message or plainly re-request.
    Blocked,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ContactEntry {
    pub contact_id: String,
    pub phone_number: String,
    pub display_name: Option<String>,
    pub status: ContactStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_touch_at: OffsetDateTime,
    pub unread_messages: i64,
}

async fn edge_status(
    conn: &mut SqliteConnection,
    owner: Uuid,
    peer: Uuid,
) -> Result<Option<ContactStatus>, sqlx::Error> {
    let row: Option<(ContactStatus,)> =
        sqlx::query_as("SELECT status FROM contacts WHERE user_id = ? AND contact_id = ?")
            .bind(owner.to_string())
            .bind(peer.to_string())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.map(|(status,)| status))
}

async fn set_edge_status(
    conn: &mut SqliteConnection,
    owner: Uuid,
    peer: Uuid,
    status: ContactStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE contacts SET status = ? WHERE user_id = ? AND contact_id = ?")
        .bind(status)
        .bind(owner.to_string())
        .bind(peer.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

async fn delete_edge(
    conn: &mut SqliteConnection,
    owner: Uuid,
    peer: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM contacts WHERE user_id = ? AND contact_id = ?")
        .bind(owner.to_string())
        .bind(peer.to_string())
        .execute(conn)
        .await?;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Resolves a phone number to a user id for contact operations. Unknown
/// numbers get an invite SMS and an `inviting` placeholder row; if the
/// gateway refuses the invite, no placeholder is created and the whole
/// request fails visibly.
pub async fn resolve_or_invite(
    db_pool: &SqlitePool,
    sms: &SharedSms,
    owner_phone: &str,
    peer_phone: &str,
) -> ApiResult<Uuid> {
    if let Some(user) = users::find_by_phone(db_pool, peer_phone).await? {
        return Ok(user.id);
    }

    let text = format!(
        "You are invited to join terntalk by phone number +{owner_phone}. \
         Send and receive messages free with your friends."
    );
    match sms.send(peer_phone, &text).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(ApiError::collaborator(
                "Cannot send inviting SMS to phone number",
            ));
        }
        Err(err) => {
            tracing::warn!(to = %peer_phone, error = %err, "invite sms failed");
            return Err(ApiError::collaborator(
                "Cannot send inviting SMS to phone number",
            ));
        }
    }
    tracing::info!(to = %peer_phone, "sent inviting sms");

    Ok(users::create(db_pool, peer_phone, UserStatus::Inviting).await?)
}

/// Friend request from `owner` to `peer`. Transition table:
///
/// - no edges: insert `requesting` / `requested`
/// - my edge `requested` (the peer asked first): flip both to `accepted`
/// - my edge `deleted` while the peer's is `blocked` (I removed the peer and
///   the peer never blocked back): flip both to `accepted`; re-requesting
///   quietly resumes the relationship
/// - my edge `requesting` or `accepted`: conflict
/// - anything else (including the blocked side re-requesting): conflict
///
/// A lone orphan edge in either direction is treated as corruption: both rows
/// are dropped and the request proceeds as if no edge existed.
pub async fn request(
    db_pool: &SqlitePool,
    presence: &PresenceRegistry,
    owner: Uuid,
    peer: Uuid,
    display_name: Option<String>,
) -> ApiResult<()> {
    let mut tx = db_pool.begin().await?;

    let mut forward = edge_status(&mut tx, owner, peer).await?;
    let mut reverse = edge_status(&mut tx, peer, owner).await?;

    if forward.is_some() != reverse.is_some() {
        tracing::warn!(%owner, %peer, "inconsistent contact pair, dropping both edges");
        delete_edge(&mut tx, owner, peer).await?;
        delete_edge(&mut tx, peer, owner).await?;
        forward = None;
        reverse = None;
    }

    match (forward, reverse) {
        (None, None) => {
            let now = OffsetDateTime::now_utc();
            let insert = sqlx::query(
                "INSERT INTO contacts (user_id, contact_id, status, created_at, last_touch_at)
                 VALUES (?, ?, ?, ?, ?), (?, ?, ?, ?, ?)",
            )
            .bind(owner.to_string())
            .bind(peer.to_string())
            .bind(ContactStatus::Requesting)
            .bind(now)
            .bind(now)
            .bind(peer.to_string())
            .bind(owner.to_string())
            .bind(ContactStatus::Requested)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            // A concurrent request for the same pair lost the race on the
            // composite primary key.
            if let Err(err) = insert {
                if is_unique_violation(&err) {
                    return Err(ApiError::conflict("Friend request already sent"));
                }
                return Err(err.into());
            }
        }
        (Some(ContactStatus::Requested), _)
        | (Some(ContactStatus::Deleted), Some(ContactStatus::Blocked)) => {
            set_edge_status(&mut tx, owner, peer, ContactStatus::Accepted).await?;
            set_edge_status(&mut tx, peer, owner, ContactStatus::Accepted).await?;
        }
        (Some(ContactStatus::Requesting), _) => {
            return Err(ApiError::conflict("Friend request already sent"));
        }
        (Some(ContactStatus::Accepted), _) => {
            return Err(ApiError::conflict("Already friend"));
        }
        _ => return Err(ApiError::conflict("Cannot become friend")),
    }

    if let Some(display_name) = display_name {
        sqlx::query("UPDATE contacts SET display_name = ? WHERE user_id = ? AND contact_id = ?")
            .bind(display_name)
            .bind(owner.to_string())
            .bind(peer.to_string())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    presence.notify(peer, &Event::contacts_updated());
    Ok(())
}

/// Accepts a pending request. Only valid when my edge reads `requested`.
pub async fn accept(
    db_pool: &SqlitePool,
    presence: &PresenceRegistry,
    owner: Uuid,
    peer: Uuid,
) -> ApiResult<()> {
    let mut tx = db_pool.begin().await?;

    if edge_status(&mut tx, owner, peer).await? != Some(ContactStatus::Requested) {
        return Err(ApiError::not_found("Friend request not found"));
    }
    set_edge_status(&mut tx, owner, peer, ContactStatus::Accepted).await?;
    set_edge_status(&mut tx, peer, owner, ContactStatus::Accepted).await?;

    tx.commit().await?;

    presence.notify(peer, &Event::contacts_updated());
    Ok(())
}

/// Removes a contact. An unanswered outgoing request is cancelled outright
/// (both rows deleted); anything else is a soft block: my edge goes
/// `deleted`, the peer's goes `blocked`.
pub async fn remove(
    db_pool: &SqlitePool,
    presence: &PresenceRegistry,
    owner: Uuid,
    peer: Uuid,
) -> ApiResult<()> {
    let mut tx = db_pool.begin().await?;

    let Some(status) = edge_status(&mut tx, owner, peer).await? else {
        return Err(ApiError::not_found("Contact not found"));
    };

    if status == ContactStatus::Requesting {
        delete_edge(&mut tx, owner, peer).await?;
        delete_edge(&mut tx, peer, owner).await?;
    } else {
        set_edge_status(&mut tx, owner, peer, ContactStatus::Deleted).await?;
        set_edge_status(&mut tx, peer, owner, ContactStatus::Blocked).await?;
    }

    tx.commit().await?;

    presence.notify(peer, &Event::contacts_updated());
    Ok(())
}

/// Owner-local label change; the relationship status is untouched.
pub async fn rename(
    db_pool: &SqlitePool,
    owner: Uuid,
    peer: Uuid,
    display_name: &str,
) -> ApiResult<()> {
    let result =
        sqlx::query("UPDATE contacts SET display_name = ? WHERE user_id = ? AND contact_id = ?")
            .bind(display_name)
            .bind(owner.to_string())
            .bind(peer.to_string())
            .execute(db_pool)
            .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Contact not found"));
    }
    Ok(())
}

/// Lists the owner's edges joined with the peer's phone number, most recently
/// touched first. Without a peer filter, `deleted` edges are hidden; asking
/// for a specific peer still returns one.
pub async fn list(
    db_pool: &SqlitePool,
    owner: Uuid,
    peer_phone: Option<&str>,
) -> ApiResult<Vec<ContactEntry>> {
    let entries = match peer_phone {
        Some(phone) => {
            sqlx::query_as::<_, ContactEntry>(
                "SELECT c.contact_id, u.phone_number, c.display_name, c.status,
                        c.last_touch_at, c.unread_messages
                 FROM contacts c
                 JOIN users u ON c.contact_id = u.id
                 WHERE c.user_id = ? AND u.phone_number = ?
                 ORDER BY c.last_touch_at DESC",
            )
            .bind(owner.to_string())
            .bind(phone)
            .fetch_all(db_pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, ContactEntry>(
                "SELECT c.contact_id, u.phone_number, c.display_name, c.status,
                        c.last_touch_at, c.unread_messages
                 FROM contacts c
                 JOIN users u ON c.contact_id = u.id
                 WHERE c.user_id = ? AND c.status != 'deleted'
                 ORDER BY c.last_touch_at DESC",
            )
            .bind(owner.to_string())
            .fetch_all(db_pool)
            .await?
        }
    };
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn two_users(pool: &SqlitePool) -> (Uuid, Uuid) {
        let a = users::create(pool, "15550001", UserStatus::Registered)
            .await
            .unwrap();
        let b = users::create(pool, "15550002", UserStatus::Registered)
            .await
            .unwrap();
        (a, b)
    }

    async fn statuses(
        pool: &SqlitePool,
        a: Uuid,
        b: Uuid,
    ) -> (Option<ContactStatus>, Option<ContactStatus>) {
        let mut conn = pool.acquire().await.unwrap();
        let forward = edge_status(&mut conn, a, b).await.unwrap();
        let reverse = edge_status(&mut conn, b, a).await.unwrap();
        (forward, reverse)
    }

    #[tokio::test]
    async fn request_then_accept_makes_both_edges_accepted() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        request(&pool, &presence, a, b, Some("Bea".to_owned()))
            .await
            .unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (
                Some(ContactStatus::Requesting),
                Some(ContactStatus::Requested)
            )
        );

        accept(&pool, &presence, b, a).await.unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (Some(ContactStatus::Accepted), Some(ContactStatus::Accepted))
        );

        let listed = list(&pool, a, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].phone_number, "15550002");
        assert_eq!(listed[0].display_name.as_deref(), Some("Bea"));
    }

    #[tokio::test]
    async fn crossing_requests_converge_to_accepted() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        let (ra, rb) = tokio::join!(
            request(&pool, &presence, a, b, None),
            request(&pool, &presence, b, a, None),
        );
        // Whoever ran second found the mirror request and accepted it; the
        // pair must never end up stuck as requesting/requested on both sides.
        assert!(ra.is_ok() || rb.is_ok());
        assert_eq!(
            statuses(&pool, a, b).await,
            (Some(ContactStatus::Accepted), Some(ContactStatus::Accepted))
        );
    }

    #[tokio::test]
    async fn duplicate_request_and_existing_friendship_conflict() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        request(&pool, &presence, a, b, None).await.unwrap();
        let err = request(&pool, &presence, a, b, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        accept(&pool, &presence, b, a).await.unwrap();
        let err = request(&pool, &presence, a, b, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn removing_an_unanswered_request_cancels_it_entirely() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        request(&pool, &presence, a, b, None).await.unwrap();
        remove(&pool, &presence, a, b).await.unwrap();
        assert_eq!(statuses(&pool, a, b).await, (None, None));

        // and the pair can start over
        request(&pool, &presence, a, b, None).await.unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (
                Some(ContactStatus::Requesting),
                Some(ContactStatus::Requested)
            )
        );
    }

    #[tokio::test]
    async fn only_the_remover_can_resume_a_soft_block() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        request(&pool, &presence, a, b, None).await.unwrap();
        accept(&pool, &presence, b, a).await.unwrap();
        remove(&pool, &presence, a, b).await.unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (Some(ContactStatus::Deleted), Some(ContactStatus::Blocked))
        );

        // the blocked side has no resumption path
        let err = request(&pool, &presence, b, a, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        // the remover re-requesting silently restores the friendship
        request(&pool, &presence, a, b, None).await.unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (Some(ContactStatus::Accepted), Some(ContactStatus::Accepted))
        );
    }

    #[tokio::test]
    async fn orphan_edge_is_healed_and_request_starts_fresh() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        // Fabricate the documented corruption: one direction only.
        sqlx::query(
            "INSERT INTO contacts (user_id, contact_id, status, created_at, last_touch_at)
             VALUES (?, ?, 'accepted', ?, ?)",
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .bind(OffsetDateTime::now_utc())
        .bind(OffsetDateTime::now_utc())
        .execute(&pool)
        .await
        .unwrap();

        request(&pool, &presence, a, b, None).await.unwrap();
        assert_eq!(
            statuses(&pool, a, b).await,
            (
                Some(ContactStatus::Requesting),
                Some(ContactStatus::Requested)
            )
        );
    }

    #[tokio::test]
    async fn deleted_edges_are_hidden_from_the_default_listing() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        request(&pool, &presence, a, b, None).await.unwrap();
        accept(&pool, &presence, b, a).await.unwrap();
        remove(&pool, &presence, a, b).await.unwrap();

        assert!(list(&pool, a, None).await.unwrap().is_empty());
        // but the edge stays queryable when named
        let named = list(&pool, a, Some("15550002")).await.unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].status, ContactStatus::Deleted);
        // the blocked side still sees its edge in the default list
        assert_eq!(list(&pool, b, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rename_requires_an_existing_edge() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let (a, b) = two_users(&pool).await;

        let err = rename(&pool, a, b, "Bea").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        request(&pool, &presence, a, b, None).await.unwrap();
        rename(&pool, a, b, "").await.unwrap();
        let listed = list(&pool, a, Some("15550002")).await.unwrap();
        assert_eq!(listed[0].display_name.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn invite_failure_creates_no_placeholder_user() {
        use crate::sms::test_support::RecordingSms;
        use std::sync::Arc;

        let pool = test_pool().await;
        let failing: SharedSms = Arc::new(RecordingSms {
            fail: true,
            ..Default::default()
        });

        let err = resolve_or_invite(&pool, &failing, "15550001", "15559999")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Collaborator(_)));
        assert!(users::find_by_phone(&pool, "15559999").await.unwrap().is_none());

        // a working gateway yields an inviting placeholder
        let working: SharedSms = Arc::new(RecordingSms::default());
        let id = resolve_or_invite(&pool, &working, "15550001", "15559999")
            .await
            .unwrap();
        let user = users::find_by_phone(&pool, "15559999").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.status, UserStatus::Inviting);
    }
}
