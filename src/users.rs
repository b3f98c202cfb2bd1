use sqlx::SqlitePool;
use uuid::Uuid;

/// A user row exists as soon as any party references the phone number;
/// `Inviting` placeholders are created by contact requests to unknown numbers
/// and only become `Registered` through the signup flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum UserStatus {
    Inviting,
    Registering,
    Registered,
}

#[derive(Debug, Clone, Copy)]
pub struct UserRef {
    pub id: Uuid,
    pub status: UserStatus,
}

pub async fn find_by_phone(
    db_pool: &SqlitePool,
    phone_number: &str,
) -> Result<Option<UserRef>, sqlx::Error> {
    let row: Option<(String, UserStatus)> =
        sqlx::query_as("SELECT id, status FROM users WHERE phone_number = ?")
            .bind(phone_number)
            .fetch_optional(db_pool)
            .await?;

    Ok(row.and_then(|(id, status)| {
        Uuid::parse_str(&id).ok().map(|id| UserRef { id, status })
    }))
}

pub async fn create(
    db_pool: &SqlitePool,
    phone_number: &str,
    status: UserStatus,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO users (id, phone_number, status) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(phone_number)
        .bind(status)
        .execute(db_pool)
        .await?;
    Ok(id)
}
