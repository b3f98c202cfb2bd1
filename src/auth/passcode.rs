use rand::Rng;
use sqlx::SqlitePool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::users::UserStatus;

pub const PASSCODE_TTL: Duration = Duration::minutes(10);

pub fn generate() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

struct PasscodeRow {
    id: Uuid,
    status: UserStatus,
    passcode: Option<String>,
    passcode_at: Option<OffsetDateTime>,
}

async fn fetch(db_pool: &SqlitePool, phone_number: &str) -> ApiResult<Option<PasscodeRow>> {
    let row: Option<(String, UserStatus, Option<String>, Option<OffsetDateTime>)> =
        sqlx::query_as("SELECT id, status, passcode, passcode_at FROM users WHERE phone_number = ?")
            .bind(phone_number)
            .fetch_optional(db_pool)
            .await?;

    match row {
        None => Ok(None),
        Some((id, status, passcode, passcode_at)) => Ok(Some(PasscodeRow {
            id: Uuid::parse_str(&id).map_err(anyhow::Error::from)?,
            status,
            passcode,
            passcode_at,
        })),
    }
}

fn check_passcode(row: &PasscodeRow, passcode: &str, now: OffsetDateTime) -> ApiResult<()> {
    match &row.passcode {
        Some(stored) if stored == passcode => {}
        _ => return Err(ApiError::validation("Invalid passcode")),
    }

    let issued_at = row
        .passcode_at
        .ok_or_else(|| ApiError::validation("Invalid passcode"))?;
    if now > issued_at + PASSCODE_TTL {
        return Err(ApiError::expired("Passcode is expired"));
    }
    Ok(())
}

/// Stores a fresh signup passcode. A `registered` number cannot sign up
/// again; an `inviting` placeholder (created by someone's contact request)
/// moves to `registering` so it can complete.
pub async fn begin_signup(
    db_pool: &SqlitePool,
    phone_number: &str,
    passcode: &str,
    now: OffsetDateTime,
) -> ApiResult<()> {
    match fetch(db_pool, phone_number).await? {
        Some(row) if row.status == UserStatus::Registered => {
            Err(ApiError::conflict("Phone number already registered"))
        }
        Some(_) => {
            sqlx::query(
                "UPDATE users SET status = ?, passcode = ?, passcode_at = ?
                 WHERE phone_number = ?",
            )
            .bind(UserStatus::Registering)
            .bind(passcode)
            .bind(now)
            .bind(phone_number)
            .execute(db_pool)
            .await?;
            Ok(())
        }
        None => {
            sqlx::query(
                "INSERT INTO users (id, phone_number, status, passcode, passcode_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::now_v7().to_string())
            .bind(phone_number)
            .bind(UserStatus::Registering)
            .bind(passcode)
            .bind(now)
            .execute(db_pool)
            .await?;
            Ok(())
        }
    }
}

/// Verifies the signup passcode, promotes the user to `registered` and burns
/// the passcode. Returns the user id for token issuance.
pub async fn complete_signup(
    db_pool: &SqlitePool,
    phone_number: &str,
    passcode: &str,
    now: OffsetDateTime,
) -> ApiResult<Uuid> {
    let Some(row) = fetch(db_pool, phone_number).await? else {
        return Err(ApiError::validation("Invalid phone number"));
    };
    if row.status != UserStatus::Registering {
        return Err(ApiError::validation("Invalid phone number"));
    }
    check_passcode(&row, passcode, now)?;

    sqlx::query(
        "UPDATE users SET status = ?, passcode = NULL, passcode_at = NULL
         WHERE phone_number = ?",
    )
    .bind(UserStatus::Registered)
    .bind(phone_number)
    .execute(db_pool)
    .await?;

    Ok(row.id)
}

/// Stores a fresh signin passcode for an already registered number.
pub async fn begin_signin(
    db_pool: &SqlitePool,
    phone_number: &str,
    passcode: &str,
    now: OffsetDateTime,
) -> ApiResult<()> {
    let Some(row) = fetch(db_pool, phone_number).await? else {
        return Err(ApiError::not_found("Invalid phone number"));
    };
    if row.status != UserStatus::Registered {
        return Err(ApiError::validation("Invalid phone number"));
    }

    sqlx::query("UPDATE users SET passcode = ?, passcode_at = ? WHERE phone_number = ?")
        .bind(passcode)
        .bind(now)
        .bind(phone_number)
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Verifies a signin passcode and burns it. Returns the user id for token
/// issuance.
pub async fn complete_signin(
    db_pool: &SqlitePool,
    phone_number: &str,
    passcode: &str,
    now: OffsetDateTime,
) -> ApiResult<Uuid> {
    let Some(row) = fetch(db_pool, phone_number).await? else {
        return Err(ApiError::not_found("Invalid phone number"));
    };
    if row.status != UserStatus::Registered {
        return Err(ApiError::validation("Invalid phone number or passcode"));
    }
    check_passcode(&row, passcode, now)?;

    sqlx::query("UPDATE users SET passcode = NULL, passcode_at = NULL WHERE phone_number = ?")
        .bind(phone_number)
        .execute(db_pool)
        .await?;

    Ok(row.id)
}
