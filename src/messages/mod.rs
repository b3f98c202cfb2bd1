pub mod media;
pub mod store;

pub use store::{MessageRecord, MessageStatus, MessageType};

use axum::{
    Json, Router, debug_handler,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::{AppState, users};

const MAX_MEDIA_BYTES: usize = 100 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all))
        .route("/{phone_number}", get(list_with_peer))
        .route("/send", post(send))
        .route("/read", put(read))
        .route("/read_all_text", put(read_all_text))
        .route(
            "/upload_media",
            post(upload_media).layer(DefaultBodyLimit::max(MAX_MEDIA_BYTES)),
        )
        .route("/media/{id}", get(get_media))
}

async fn resolve_peer(state: &AppState, phone_number: &str) -> ApiResult<Uuid> {
    users::find_by_phone(&state.db_pool, phone_number)
        .await?
        .map(|user| user.id)
        .ok_or_else(|| ApiError::not_found("Recipient not found"))
}

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    count: Option<i64>,
}

#[debug_handler]
async fn list_all(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(ListQuery { count }): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = count.unwrap_or(store::DEFAULT_LIST_LIMIT);
    let messages = store::list(&state.db_pool, claims.user_id, None, limit).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

#[debug_handler]
async fn list_with_peer(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(phone_number): Path<String>,
    Query(ListQuery { count }): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let peer = resolve_peer(&state, &phone_number).await?;
    let limit = count.unwrap_or(store::DEFAULT_LIST_LIMIT);
    let messages = store::list(&state.db_pool, claims.user_id, Some(peer), limit).await?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

#[derive(Deserialize)]
pub(crate) struct SendBody {
    phone_number: Option<String>,
    message_type: Option<String>,
    message: Option<String>,
    media_content_id: Option<String>,
}

#[debug_handler]
async fn send(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<SendBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = body
        .phone_number
        .ok_or_else(|| ApiError::validation("Missing phone number"))?;
    let message_type = store::MessageType::parse(body.message_type.as_deref().unwrap_or(""))?;

    let receiver = resolve_peer(&state, &phone_number).await?;
    let record = store::send(
        &state.db_pool,
        &state.presence,
        claims.user_id,
        &claims.phone_number,
        receiver,
        store::NewMessage {
            message_type,
            text: body.message,
            media_content_id: body.media_content_id,
        },
    )
    .await?;

    Ok(Json(json!({ "success": true, "messages": [record] })))
}

#[derive(Deserialize)]
pub(crate) struct ReadBody {
    message_id: Option<String>,
}

#[debug_handler]
async fn read(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ReadBody { message_id }): Json<ReadBody>,
) -> ApiResult<impl IntoResponse> {
    let message_id = message_id.ok_or_else(|| ApiError::validation("Missing message id"))?;
    store::mark_read(&state.db_pool, claims.user_id, &message_id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub(crate) struct ReadAllBody {
    phone_number: Option<String>,
}

#[debug_handler]
async fn read_all_text(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ReadAllBody { phone_number }): Json<ReadAllBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = phone_number.ok_or_else(|| ApiError::validation("Missing phone number"))?;
    let peer = users::find_by_phone(&state.db_pool, &phone_number)
        .await?
        .map(|user| user.id)
        .ok_or_else(|| ApiError::not_found("Contact not found"))?;

    store::mark_all_text_read(&state.db_pool, claims.user_id, peer).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Deserialize)]
pub(crate) struct UploadQuery {
    media_type: Option<String>,
}

#[debug_handler]
async fn upload_media(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(UploadQuery { media_type }): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let media_type = media_type.ok_or_else(|| ApiError::validation("Invalid media type"))?;
    let id = media::save(
        &state.db_pool,
        &state.probe,
        claims.user_id,
        &media_type,
        &body,
    )
    .await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

#[derive(Deserialize)]
pub(crate) struct MediaQuery {
    token: Option<String>,
}

/// Media playback runs through plain <audio>/<video> elements which cannot
/// set headers, so the token arrives in the query string here.
#[debug_handler]
async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(MediaQuery { token }): Query<MediaQuery>,
) -> ApiResult<impl IntoResponse> {
    let token = token.ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;
    let claims = state.tokens.verify(&token)?;

    let media = media::fetch(&state.db_pool, claims.user_id, &id).await?;
    Ok(([(CONTENT_TYPE, media.media_type)], media.media_data))
}
