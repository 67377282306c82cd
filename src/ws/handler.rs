//! WebSocket connection lifecycle.
//!
//! One task pair per connection: the reader loop runs on the upgrade task
//! and feeds commands to the room; a spawned writer forwards the room's
//! broadcast events back out. Either side dropping tears both down and
//! notifies the room.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{GameMode, RoomCommand};
use crate::http::middleware::verify_jwt;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
    #[serde(default)]
    pub mode: Option<GameMode>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let claims = match verify_jwt(&query.token, &state.config.supabase_jwt_secret) {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "WebSocket auth failed");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };

    let mode = query.mode.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub, claims.username, mode))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    user_id: Uuid,
    username: Option<String>,
    mode: GameMode,
) {
    let connection_id = Uuid::new_v4();

    let display_name = match username {
        Some(name) => name,
        None => resolve_display_name(&state, user_id).await,
    };

    let (handle, slot) = state.registry.assign(mode);
    info!(
        connection_id = %connection_id,
        room_id = %handle.id,
        slot,
        player = %display_name,
        "Player connected"
    );

    // Subscribe before joining so the gameStart the join may trigger is
    // never missed.
    let mut events = handle.events.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let (reply, ack) = tokio::sync::oneshot::channel();
    if handle
        .commands
        .send(RoomCommand::Join {
            slot,
            connection_id,
            user_id,
            display_name: display_name.clone(),
            reply,
        })
        .await
        .is_err()
    {
        debug!(room_id = %handle.id, "Room task gone before join");
        return;
    }

    // The room answers the join with its authoritative snapshot
    let Ok(snapshot) = ack.await else {
        debug!(room_id = %handle.id, "Room task ended before acknowledging join");
        return;
    };

    let init = ServerMsg::Init {
        player_id: connection_id,
        player_number: slot,
        game_state: snapshot,
        room_id: handle.id,
    };
    if send_msg(&mut sender, &init).await.is_err() {
        let _ = handle.commands.send(RoomCommand::Leave { slot }).await;
        return;
    }

    let writer = tokio::spawn(async move {
        loop {
            let msg = match events.recv().await {
                Ok(msg) => msg,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Connection lagged behind room events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let disconnect = matches!(msg, ServerMsg::GameEnd { .. })
                || matches!(msg, ServerMsg::End { .. });
            if send_msg(&mut sender, &msg).await.is_err() {
                break;
            }
            if disconnect {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let limiter = PlayerRateLimiter::new();
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(connection_id = %connection_id, error = %err, "Socket error");
                break;
            }
        };
        match frame {
            Message::Text(text) => {
                if !limiter.check_move() {
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(ClientMsg::Move { y }) => {
                        if handle
                            .commands
                            .send(RoomCommand::Move { slot, y })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(connection_id = %connection_id, error = %err, "Unparseable message");
                    }
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    info!(connection_id = %connection_id, room_id = %handle.id, "Player disconnected");
    let _ = handle.commands.send(RoomCommand::Leave { slot }).await;
    writer.abort();
}

/// Fall back to the stored profile, then to an anonymous name. Stats keyed
/// by user id still work if the profile lookup fails.
async fn resolve_display_name(state: &AppState, user_id: Uuid) -> String {
    match state.profiles.ensure_profile(user_id, "anonymous").await {
        Ok(profile) => profile
            .display_name
            .unwrap_or_else(|| "anonymous".to_string()),
        Err(err) => {
            warn!(user_id = %user_id, error = %err, "Profile lookup failed");
            "anonymous".to_string()
        }
    }
}

async fn send_msg(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}
