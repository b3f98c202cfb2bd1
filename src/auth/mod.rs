pub mod passcode;
pub mod token;

pub use token::{AuthUser, Claims, TokenKeys};

use axum::{Json, Router, debug_handler, extract::State, response::IntoResponse, routing::post};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::{ApiError, ApiResult};
use crate::{AppState, sms::SharedSms};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/complete-signup", post(complete_signup))
        .route("/signin", post(signin))
        .route("/complete-signin", post(complete_signin))
}

#[derive(Deserialize)]
pub(crate) struct PhoneBody {
    phone_number: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct PasscodeBody {
    phone_number: Option<String>,
    passcode: Option<String>,
}

fn require_phone(phone_number: Option<String>) -> ApiResult<String> {
    let phone_number = phone_number.ok_or_else(|| ApiError::validation("Missing phone number"))?;
    if phone_number.is_empty() || !phone_number.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::validation("Invalid phone number"));
    }
    Ok(phone_number)
}

async fn send_passcode(sms: &SharedSms, phone_number: &str, passcode: &str) {
    // The passcode is already committed; a lost SMS is degraded service, not
    // a failed signup.
    let text = format!("Your terntalk one-time passcode is {passcode}");
    match sms.send(phone_number, &text).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(to = %phone_number, "passcode sms not delivered"),
        Err(err) => tracing::warn!(to = %phone_number, error = %err, "passcode sms failed"),
    }
}

#[debug_handler]
async fn signup(
    State(state): State<AppState>,
    Json(PhoneBody { phone_number }): Json<PhoneBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;

    let code = passcode::generate();
    passcode::begin_signup(&state.db_pool, &phone_number, &code, OffsetDateTime::now_utc())
        .await?;
    send_passcode(&state.sms, &phone_number, &code).await;

    Ok(Json(json!({
        "success": true,
        "message": "One-time passcode sent to the phone number"
    })))
}

#[debug_handler]
async fn complete_signup(
    State(state): State<AppState>,
    Json(PasscodeBody {
        phone_number,
        passcode,
    }): Json<PasscodeBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;
    let code = passcode.ok_or_else(|| ApiError::validation("Missing passcode"))?;

    let user_id = passcode::complete_signup(
        &state.db_pool,
        &phone_number,
        &code,
        OffsetDateTime::now_utc(),
    )
    .await?;
    let token = state.tokens.issue(user_id, &phone_number)?;

    tracing::info!(phone = %phone_number, "signup completed");
    Ok(Json(json!({ "success": true, "token": token })))
}

#[debug_handler]
async fn signin(
    State(state): State<AppState>,
    Json(PhoneBody { phone_number }): Json<PhoneBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;

    let code = passcode::generate();
    passcode::begin_signin(&state.db_pool, &phone_number, &code, OffsetDateTime::now_utc())
        .await?;
    send_passcode(&state.sms, &phone_number, &code).await;

    Ok(Json(json!({
        "success": true,
        "message": "One-time passcode sent to the phone number"
    })))
}

#[debug_handler]
async fn complete_signin(
    State(state): State<AppState>,
    Json(PasscodeBody {
        phone_number,
        passcode,
    }): Json<PasscodeBody>,
) -> ApiResult<impl IntoResponse> {
    let phone_number = require_phone(phone_number)?;
    let code = passcode.ok_or_else(|| ApiError::validation("Missing passcode"))?;

    let user_id = passcode::complete_signin(
        &state.db_pool,
        &phone_number,
        &code,
        OffsetDateTime::now_utc(),
    )
    .await?;
    let token = state.tokens.issue(user_id, &phone_number)?;

    Ok(Json(json!({ "success": true, "token": token })))
}
