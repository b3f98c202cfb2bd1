use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

/// Identity claims carried by every issued token. The phone number rides
/// along so handlers never need a user lookup just to know who is calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub phone_number: String,
    pub exp: u64,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expires_in_secs: u64,
}

/// HS256 token issuer/verifier with a configurable expiry.
#[derive(Clone)]
pub struct TokenKeys {
    keys: Arc<Keys>,
}

impl TokenKeys {
    pub fn new(secret: &[u8], expires_in_secs: u64) -> Self {
        Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_secret(secret),
                decoding: DecodingKey::from_secret(secret),
                expires_in_secs,
            }),
        }
    }

    pub fn issue(&self, user_id: Uuid, phone_number: &str) -> anyhow::Result<String> {
        let claims = Claims {
            user_id,
            phone_number: phone_number.to_owned(),
            exp: OffsetDateTime::now_utc().unix_timestamp() as u64 + self.keys.expires_in_secs,
        };
        Ok(encode(&Header::default(), &claims, &self.keys.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.keys.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ApiError::unauthorized("Invalid token."))
    }
}

/// Extractor for bearer-authenticated routes: pulls the token from the
/// Authorization header and verifies it against the app's keys.
pub struct AuthUser(pub Claims);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;

        Ok(AuthUser(state.tokens.verify(token)?))
    }
}
