use axum::{
    debug_handler,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{Event, deliver_pending};
use crate::AppState;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub(crate) struct NotificationsQuery {
    token: Option<String>,
}

/// `GET /api/notifications?token=`, the push channel. The token rides in the
/// query string because websocket clients cannot set an Authorization header.
#[debug_handler]
pub(crate) async fn notifications_ws(
    State(state): State<AppState>,
    Query(NotificationsQuery { token }): Query<NotificationsQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let token = token.ok_or_else(|| ApiError::unauthorized("token is required"))?;
    let claims = state.tokens.verify(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, claims, socket)))
}

async fn handle_socket(state: AppState, claims: Claims, socket: WebSocket) {
    let user_id = claims.user_id;
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let connection = state.presence.register(user_id, tx.clone());
    tracing::info!(user = %claims.phone_number, "connection established");

    // Confirm the channel before anything else can be pushed over it.
    let _ = tx.send(Event::connected());

    // Catch up messages that arrived while this user was offline. A failure
    // here only degrades delivery ticks; the connection itself stays up.
    if let Err(err) =
        deliver_pending(&state.db_pool, &state.presence, user_id, &claims.phone_number)
            .await
    {
        tracing::warn!(user = %claims.phone_number, error = %err, "delivery catch-up failed");
    }

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // The client never sends application traffic; we only watch for the
    // socket going away.
    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            incoming = stream.next() => match incoming {
                Some(Ok(_)) => continue,
                _ => break,
            },
        }
    }

    forward_task.abort();
    state.presence.unregister(user_id, connection);
    tracing::info!(user = %claims.phone_number, "connection closed");
}
