use anyhow::Context;
use sqlx::SqlitePool;

/// Applies the schema on startup. Statements are idempotent so a restart
/// against an existing database is a no-op.
pub async fn init_schema(db_pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            phone_number TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            passcode TEXT,
            passcode_at TEXT
        )
        "#,
    )
    .execute(db_pool)
    .await
    .context("create users table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            user_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            status TEXT NOT NULL,
            display_name TEXT,
            created_at TEXT NOT NULL,
            last_touch_at TEXT NOT NULL,
            unread_messages INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (user_id, contact_id)
        )
        "#,
    )
    .execute(db_pool)
    .await
    .context("create contacts table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY NOT NULL,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            message TEXT,
            message_type TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db_pool)
    .await
    .context("create messages table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_receiver_status
         ON messages (receiver_id, status)",
    )
    .execute(db_pool)
    .await
    .context("create messages index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_content (
            id TEXT PRIMARY KEY NOT NULL,
            creator_id TEXT NOT NULL,
            message_id TEXT,
            media_type TEXT NOT NULL,
            media_data BLOB NOT NULL,
            duration REAL NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(db_pool)
    .await
    .context("create media_content table")?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // One connection only: with sqlite::memory: every pool connection would
    // otherwise get its own empty database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&pool).await.unwrap();
    pool
}
