use std::sync::Arc;

use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use terntalk::{AppState, auth, contacts, db, messages, notify, sms};
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let log_filter = dotenv::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let database_url =
        dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:terntalk.db?mode=rwc".to_string());
    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect(&database_url)
        .await
        .expect("database");
    db::init_schema(&db_pool).await.expect("schema");

    let jwt_secret =
        dotenv::var("JWT_SECRET").unwrap_or_else(|_| "terntalk_jwt_secret".to_string());
    let jwt_expires_secs = dotenv::var("JWT_EXPIRES_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600);

    let app_state = AppState {
        db_pool,
        presence: notify::PresenceRegistry::new(),
        tokens: auth::TokenKeys::new(jwt_secret.as_bytes(), jwt_expires_secs),
        sms: Arc::new(sms::LogSms),
        probe: Arc::new(messages::media::NoProbe),
    };

    let app = Router::new()
        .nest("/api/auth", auth::router())
        .nest("/api/contacts", contacts::router())
        .nest("/api/messages", messages::router())
        .nest("/api/notifications", notify::router())
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let port = dotenv::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("listener");
    info!(%port, "terntalk listening");
    axum::serve(listener, app).await.expect("server");
}
