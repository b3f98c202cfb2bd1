pub mod auth;
pub mod contacts;
pub mod db;
pub mod error;
pub mod messages;
pub mod notify;
pub mod sms;
pub mod users;

use sqlx::SqlitePool;

pub use error::{ApiError, ApiResult};

/// Shared handler state: the connection pool, the live-connection registry
/// and the collaborator seams (token keys, SMS gateway, media probe).
#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub presence: notify::PresenceRegistry,
    pub tokens: auth::TokenKeys,
    pub sms: sms::SharedSms,
    pub probe: messages::media::SharedProbe,
}
