use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tether_core::types::DbId;

use crate::state::AppState;
use crate::ws::manager::ChannelIdentity;
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// The channel starts unbound; it is bound to a session by an
/// `announce-identity` message carrying a valid access token.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Manage a single WebSocket connection after upgrade.
///
/// A writer task forwards queued messages to the sink and stops after a
/// Close frame or once the registry drops the channel's sender. A reader
/// task handles inbound frames. Whichever finishes first ends the other.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let mut rx = state.ws_manager.add(conn_id.clone()).await;
    let (mut sink, mut stream) = socket.split();

    let writer_conn_id = conn_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %writer_conn_id, "WebSocket sink closed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader_state = state.clone();
    let reader_conn_id = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    handle_text(&reader_state, &reader_conn_id, text.as_str()).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(conn_id = %reader_conn_id, "Pong received");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(conn_id = %reader_conn_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let identity = state.ws_manager.identity(&conn_id).await;
    state.ws_manager.remove(&conn_id).await;
    match identity {
        Some(identity) => tracing::info!(
            conn_id = %conn_id,
            key = %identity.key,
            device_session_id = %identity.device_session_id,
            "WebSocket disconnected",
        ),
        None => tracing::info!(conn_id = %conn_id, "WebSocket disconnected"),
    }
}

async fn handle_text(state: &AppState, conn_id: &str, text: &str) {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::AnnounceIdentity {
            user_id,
            device_session_id,
            token,
        }) => announce(state, conn_id, user_id, &device_session_id, &token).await,
        Err(e) => {
            tracing::debug!(conn_id = %conn_id, error = %e, "Ignoring unrecognized WebSocket message");
            return;
        }
    };
    state.ws_manager.send_to(conn_id, reply.to_message()).await;
}

/// Authenticate an `announce-identity` through the request gate and bind.
async fn announce(
    state: &AppState,
    conn_id: &str,
    user_id: DbId,
    device_session_id: &str,
    token: &str,
) -> ServerMessage {
    let rejected = |reason: &str| {
        tracing::info!(conn_id = %conn_id, user_id, reason, "Identity announcement rejected");
        ServerMessage::AnnounceRejected {
            reason: reason.to_string(),
        }
    };

    let session = match state.gate.admit(token).await {
        Ok(session) => session,
        Err(err) => {
            let reason = err
                .auth_failure()
                .map(|f| f.message())
                .unwrap_or("Authentication unavailable");
            return rejected(reason);
        }
    };
    if session.user_id != user_id || session.device_session_id != device_session_id {
        return rejected("Announced identity does not match token");
    }

    let identity = ChannelIdentity {
        key: session.key(),
        session_id: session.session_id,
        device_session_id: session.device_session_id,
    };
    match state.ws_manager.bind(conn_id, identity).await {
        Ok(()) => {
            tracing::info!(
                conn_id = %conn_id,
                user_id,
                tenant_id = session.tenant_id,
                device_session_id,
                "WebSocket identity bound",
            );
            ServerMessage::IdentityBound {
                channel_id: conn_id.to_string(),
            }
        }
        Err(err) => rejected(&err.to_string()),
    }
}
