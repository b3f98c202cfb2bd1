pub mod store;

pub use store::{ContactEntry, ContactStatus};

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::{AppState, users};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_contacts))
        .route("/{phone_number}", get(list_contact))
        .route("/request", post(request_contact))
        .route("/accept", put(accept_contact))
        .route("/delete", put(delete_contact))
        .route("/update", put(update_contact))
}

#[derive(Deserialize)]
pub(crate) struct ContactBody {
    phone_number: Option<String>,
    display_name: Option<String>,
}

fn require_phone(phone_number: Option<String>) -> ApiResult<String> {
    phone_number.ok_or_else(|| ApiError::validation("Missing phone number"))
}

async fn resolve_existing(state: &AppState, phone_number: &str) -> ApiResult<uuid::Uuid> {
    users::find_by_phone(&state.db_pool, phone_number)
        .await?
        .map(|user| user.id)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn contacts_response(
    state: &AppState,
    owner: uuid::Uuid,
    peer_phone: Option<&str>,
) -> ApiResult<Json<serde_json::Value>> {
    let contacts = store::list(&state.db_pool, owner, peer_phone).await?;
    Ok(Json(json!({ "success": true, "contacts": contacts })))
}

#[debug_handler]
async fn list_contacts(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> ApiResult<impl IntoResponse> {
    contacts_response(&state, claims.user_id, None).await
}

#[debug_handler]
async fn list_contact(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(phone_number): Path<String>,
) -> ApiResult<impl IntoResponse> {
    contacts_response(&state, claims.user_id, Some(&phone_number)).await
}

#[debug_handler]
async fn request_contact(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ContactBody {
        phone_number,
        display_name,
    }): Json<ContactBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;

    let peer = store::resolve_or_invite(
        &state.db_pool,
        &state.sms,
        &claims.phone_number,
        &phone_number,
    )
    .await?;
    store::request(
        &state.db_pool,
        &state.presence,
        claims.user_id,
        peer,
        display_name,
    )
    .await?;

    contacts_response(&state, claims.user_id, None).await
}

#[debug_handler]
async fn accept_contact(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ContactBody { phone_number, .. }): Json<ContactBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;

    let peer = resolve_existing(&state, &phone_number).await?;
    store::accept(&state.db_pool, &state.presence, claims.user_id, peer).await?;

    contacts_response(&state, claims.user_id, None).await
}

#[debug_handler]
async fn delete_contact(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ContactBody { phone_number, .. }): Json<ContactBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;

    let peer = resolve_existing(&state, &phone_number).await?;
    store::remove(&state.db_pool, &state.presence, claims.user_id, peer).await?;

    contacts_response(&state, claims.user_id, None).await
}

#[debug_handler]
async fn update_contact(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(ContactBody {
        phone_number,
        display_name,
    }): Json<ContactBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;
    let display_name =
        display_name.ok_or_else(|| ApiError::validation("Missing phone number or display name"))?;

    let peer = resolve_existing(&state, &phone_number).await?;
    store::rename(&state.db_pool, claims.user_id, peer, &display_name).await?;

    contacts_response(&state, claims.user_id, None).await
}
