use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::jwt::verify_access_token;
use crate::models::user::UserRole;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let (user_id, role) = match authenticate_ws(&state, query.token.as_deref()) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!("WebSocket auth failed: {}", e);
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, role))
}

fn authenticate_ws(state: &AppState, token: Option<&str>) -> Result<(Uuid, UserRole), &'static str> {
    let token = token.ok_or("Missing token query parameter")?;

    let claims = verify_access_token(token, &state.config)
        .map_err(|_| "Invalid, expired, or non-access token")?;

    Ok((claims.sub, claims.role))
}

/// Whether a broadcast message is addressed to `user_id`. Untagged messages
/// go to everyone.
fn is_for_user(msg: &str, user_id: Uuid) -> bool {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(msg) else {
        return true;
    };
    match parsed.get("user_id").and_then(|v| v.as_str()) {
        Some(target) => target == user_id.to_string(),
        None => true,
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid, role: UserRole) {
    let Some(mut rx) = state.ws_tx.as_ref().map(|tx| tx.subscribe()) else {
        tracing::error!(user_id = %user_id, "WebSocket broadcast channel not initialized");
        return;
    };

    let (mut sender, mut receiver) = socket.split();

    tracing::debug!(user_id = %user_id, "WebSocket connection established");

    // `rx` exists before a new session's first pass, so its progress event reaches this socket.
    let lease = state.reminders.acquire(
        state.schedules.clone(),
        state.notifier.clone(),
        state.ws_tx.clone(),
        user_id,
        role,
        Duration::from_secs(state.config.mood_check_interval_secs),
    );

    let mut send_task = tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if !is_for_user(&msg, user_id) {
                continue;
            }
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    tracing::debug!(user_id = %user_id, message = %text, "WebSocket message received");
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    drop(lease);
    tracing::debug!(user_id = %user_id, "WebSocket connection closed");
}
