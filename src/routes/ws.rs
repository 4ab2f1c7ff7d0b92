use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::services::session_service::SessionContext;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Supplied by a client resuming a detached session.
    pub chat_id: Option<String>,
}

#[axum::debug_handler]
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket, user_id, params.chat_id))
}

/// Per-connection receive loop. Envelopes are processed one at a time in
/// arrival order; searches detach into their own task inside the session
/// manager, so a slow pipeline never blocks the loop.
async fn handle_socket(
    state: AppState,
    socket: WebSocket,
    user_id: String,
    requested_chat_id: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();

    let ctx = match state.sessions.connect(&user_id, requested_chat_id).await {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "session handshake rejected");
            if let Ok(json) = serde_json::to_string(&crate::dto::envelope::Outbound::error(
                e.to_string(),
            )) {
                let _ = sink.send(WsMessage::Text(json)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };
    let SessionContext {
        chat_id,
        conn_id,
        mut outbound,
        cancel,
        ..
    } = ctx;

    let mut heartbeat = tokio::time::interval(crate::config::get_config().heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            envelope = outbound.recv() => {
                let Some(envelope) = envelope else { break };
                let json = match serde_json::to_string(&envelope) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(chat_id = %chat_id, error = %e, "unserializable envelope");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    state.sessions.handle_envelope(&chat_id, &user_id, &text).await;
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    state.sessions.touch(&chat_id).await;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    // Explicit close is terminal, no grace period.
                    state.sessions.close(&chat_id).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(chat_id = %chat_id, error = %e, "socket error");
                    break;
                }
                None => break,
            },
        }
    }

    state.sessions.disconnect(&chat_id, conn_id).await;
}
