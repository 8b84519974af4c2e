use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tether_core::device_groups::{group_by_device, plan_termination, BoundChannel};
use tether_core::types::{SessionId, SessionKey, Timestamp};
use tokio::sync::{mpsc, RwLock};

use crate::ws::protocol::{policy_close, ServerMessage};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// The login instance a channel has been bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub key: SessionKey,
    pub session_id: SessionId,
    pub device_session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected, identity not yet announced.
    Unbound,
    Bound {
        identity: ChannelIdentity,
        bound_at: Timestamp,
    },
}

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    pub state: ChannelState,
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("channel is not registered")]
    UnknownChannel,
    #[error("channel is already bound to another identity")]
    AlreadyBound,
}

/// Registry of live WebSocket channels and the identity each is bound to.
///
/// Removing a channel drops its sender; the connection's writer task then
/// drains what was queued (a termination notice and Close frame) and exits,
/// which tears the socket down. Thread-safe via interior `RwLock`; shared
/// behind `Arc`.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new, unbound connection.
    ///
    /// Returns the receiver half of the message channel so the caller can
    /// forward messages to the WebSocket sink.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = WsConnection {
            state: ChannelState::Unbound,
            sender: tx,
            connected_at: chrono::Utc::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        rx
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn remove(&self, conn_id: &str) -> bool {
        self.connections.write().await.remove(conn_id).is_some()
    }

    pub async fn contains(&self, conn_id: &str) -> bool {
        self.connections.read().await.contains_key(conn_id)
    }

    /// Bind a channel to an identity.
    ///
    /// Re-announcing the same identity is a no-op; a bound channel can never
    /// move to a different one.
    pub async fn bind(&self, conn_id: &str, identity: ChannelIdentity) -> Result<(), BindError> {
        let mut conns = self.connections.write().await;
        let conn = conns.get_mut(conn_id).ok_or(BindError::UnknownChannel)?;
        match &conn.state {
            ChannelState::Bound { identity: bound, .. } if *bound == identity => Ok(()),
            ChannelState::Bound { .. } => Err(BindError::AlreadyBound),
            ChannelState::Unbound => {
                conn.state = ChannelState::Bound {
                    identity,
                    bound_at: chrono::Utc::now(),
                };
                Ok(())
            }
        }
    }

    pub async fn identity(&self, conn_id: &str) -> Option<ChannelIdentity> {
        match &self.connections.read().await.get(conn_id)?.state {
            ChannelState::Bound { identity, .. } => Some(identity.clone()),
            ChannelState::Unbound => None,
        }
    }

    /// Queue a message for one connection. Returns `false` if it is gone.
    pub async fn send_to(&self, conn_id: &str, message: Message) -> bool {
        match self.connections.read().await.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Point-in-time copy of every bound channel.
    pub async fn bound_snapshot(&self) -> Vec<BoundChannel> {
        self.connections
            .read()
            .await
            .iter()
            .filter_map(|(id, conn)| match &conn.state {
                ChannelState::Bound { identity, bound_at } => Some(BoundChannel {
                    channel_id: id.clone(),
                    key: identity.key,
                    session_id: identity.session_id,
                    device_session_id: identity.device_session_id.clone(),
                    bound_at: *bound_at,
                }),
                ChannelState::Unbound => None,
            })
            .collect()
    }

    /// Deliver `notice`, queue a Close frame and drop the listed channels.
    ///
    /// Channels that already disconnected are skipped. Returns how many were
    /// terminated.
    pub async fn terminate_channels(&self, conn_ids: &[String], notice: &ServerMessage) -> usize {
        if conn_ids.is_empty() {
            return 0;
        }
        let frame = notice.to_message();
        let close = policy_close(notice_reason(notice));

        let mut conns = self.connections.write().await;
        let mut count = 0;
        for conn_id in conn_ids {
            if let Some(conn) = conns.remove(conn_id) {
                let _ = conn.sender.send(frame.clone());
                let _ = conn.sender.send(close.clone());
                count += 1;
            }
        }
        count
    }

    /// Force-terminate every channel of `key` whose device session is not
    /// `keep_device`. Channels of `keep_device` are never touched.
    pub async fn terminate_other_devices(
        &self,
        key: SessionKey,
        keep_device: &str,
        reason: &str,
    ) -> usize {
        let channels: Vec<BoundChannel> = self
            .bound_snapshot()
            .await
            .into_iter()
            .filter(|c| c.key == key)
            .collect();
        let grouped = group_by_device(&channels);
        let Some(groups) = grouped.get(&key) else {
            return 0;
        };

        let plan = plan_termination(groups, keep_device);
        self.terminate_channels(&plan.terminate, &ServerMessage::force_terminate(reason))
            .await
    }

    /// End the channels of one device session (logout).
    pub async fn end_device_session(
        &self,
        key: SessionKey,
        device_session_id: &str,
        reason: &str,
    ) -> usize {
        let targets = self
            .select(|identity| {
                identity.key == key && identity.device_session_id == device_session_id
            })
            .await;
        self.terminate_channels(&targets, &ServerMessage::session_ended(reason))
            .await
    }

    /// End every channel of a (tenant, user) (administrative revocation).
    pub async fn end_all_for_user(&self, key: SessionKey, reason: &str) -> usize {
        let targets = self.select(|identity| identity.key == key).await;
        self.terminate_channels(&targets, &ServerMessage::session_ended(reason))
            .await
    }

    async fn select(&self, pred: impl Fn(&ChannelIdentity) -> bool) -> Vec<String> {
        self.connections
            .read()
            .await
            .iter()
            .filter_map(|(id, conn)| match &conn.state {
                ChannelState::Bound { identity, .. } if pred(identity) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn bound_count(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| matches!(c.state, ChannelState::Bound { .. }))
            .count()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}

fn notice_reason(notice: &ServerMessage) -> &str {
    match notice {
        ServerMessage::ForceTerminate { reason, .. }
        | ServerMessage::SessionEnded { reason }
        | ServerMessage::AnnounceRejected { reason } => reason,
        ServerMessage::IdentityBound { .. } => "",
    }
}
