use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use super::{Event, PresenceRegistry};

/// On-connect catch-up: every message addressed to `user_id` still in
/// `created` was sent while the user had no connection. Flip them all to
/// `delivered` and tell each distinct sender once, so the sender's client can
/// show the delivery ticks. The receiver's own backlog is not pushed here; the
/// client fetches it through the normal message listing.
pub async fn deliver_pending(
    db_pool: &SqlitePool,
    presence: &PresenceRegistry,
    user_id: Uuid,
    user_phone: &str,
) -> anyhow::Result<usize> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE messages SET status = 'delivered'
         WHERE receiver_id = ? AND status = 'created'
         RETURNING sender_id",
    )
    .bind(user_id.to_string())
    .fetch_all(db_pool)
    .await?;

    if rows.is_empty() {
        return Ok(0);
    }

    let senders: HashSet<Uuid> = rows
        .iter()
        .filter_map(|(id,)| Uuid::parse_str(id).ok())
        .collect();

    tracing::info!(
        user = %user_phone,
        messages = rows.len(),
        senders = senders.len(),
        "caught up pending deliveries"
    );

    let event = Event::messages_updated(user_phone);
    for sender_id in &senders {
        presence.notify(*sender_id, &event);
    }
    Ok(senders.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::messages::MessageStatus;
    use crate::users::{self, UserStatus};
    use time::OffsetDateTime;
    use tokio::sync::mpsc;

    async fn insert_message(
        pool: &SqlitePool,
        sender: Uuid,
        receiver: Uuid,
        status: MessageStatus,
    ) -> String {
        let id = Uuid::now_v7().to_string();
        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, message, message_type, status, created_at)
             VALUES (?, ?, ?, 'hi', 'text', ?, ?)",
        )
        .bind(&id)
        .bind(sender.to_string())
        .bind(receiver.to_string())
        .bind(status)
        .bind(OffsetDateTime::now_utc())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn status_of(pool: &SqlitePool, id: &str) -> MessageStatus {
        let (status,): (MessageStatus,) =
            sqlx::query_as("SELECT status FROM messages WHERE id = ?")
                .bind(id)
                .fetch_one(pool)
                .await
                .unwrap();
        status
    }

    #[tokio::test]
    async fn queued_messages_are_delivered_and_each_sender_notified_once() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let alice = users::create(&pool, "15550001", UserStatus::Registered)
            .await
            .unwrap();
        let bob = users::create(&pool, "15550002", UserStatus::Registered)
            .await
            .unwrap();
        let receiver = users::create(&pool, "15550003", UserStatus::Registered)
            .await
            .unwrap();

        // three queued messages from two senders, plus one already delivered
        let m1 = insert_message(&pool, alice, receiver, MessageStatus::Created).await;
        let m2 = insert_message(&pool, alice, receiver, MessageStatus::Created).await;
        let m3 = insert_message(&pool, bob, receiver, MessageStatus::Created).await;
        let old = insert_message(&pool, alice, receiver, MessageStatus::Seen).await;

        let (tx_alice, mut rx_alice) = mpsc::unbounded_channel();
        let (tx_bob, mut rx_bob) = mpsc::unbounded_channel();
        presence.register(alice, tx_alice);
        presence.register(bob, tx_bob);

        let notified = deliver_pending(&pool, &presence, receiver, "15550003")
            .await
            .unwrap();
        assert_eq!(notified, 2);

        for id in [&m1, &m2, &m3] {
            assert_eq!(status_of(&pool, id).await, MessageStatus::Delivered);
        }
        assert_eq!(status_of(&pool, &old).await, MessageStatus::Seen);

        // one event per sender, carrying the connecting user's phone number
        match rx_alice.try_recv().unwrap() {
            Event::MessagesUpdated { sender, .. } => assert_eq!(sender, "15550003"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx_alice.try_recv().is_err());
        assert!(rx_bob.try_recv().is_ok());
        assert!(rx_bob.try_recv().is_err());

        // a second sweep finds nothing left to do
        let notified = deliver_pending(&pool, &presence, receiver, "15550003")
            .await
            .unwrap();
        assert_eq!(notified, 0);
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_senders_do_not_block_the_sweep() {
        let pool = test_pool().await;
        let presence = PresenceRegistry::new();
        let alice = users::create(&pool, "15550001", UserStatus::Registered)
            .await
            .unwrap();
        let receiver = users::create(&pool, "15550002", UserStatus::Registered)
            .await
            .unwrap();

        let id = insert_message(&pool, alice, receiver, MessageStatus::Created).await;
        deliver_pending(&pool, &presence, receiver, "15550002")
            .await
            .unwrap();

        // delivery state advances even though nobody heard the notification
        assert_eq!(status_of(&pool, &id).await, MessageStatus::Delivered);
    }
}
