//! Post-commit termination broadcasts.
//!
//! Request handlers enqueue a [`TerminationCommand`] and return; a single
//! worker task applies commands to the [`WsManager`] in order. A lost or
//! disabled broadcast never affects correctness: the request gate rejects
//! stale tokens on their own, and the session sweeper closes stale channels.

use std::sync::Arc;

use tether_core::types::SessionKey;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::ws::manager::WsManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCommand {
    /// A login committed: close every device session except `keep_device`.
    SupersedeOtherDevices {
        key: SessionKey,
        keep_device: String,
        reason: &'static str,
    },
    /// Logout: close the channels of one device session.
    EndDeviceSession {
        key: SessionKey,
        device_session_id: String,
        reason: &'static str,
    },
    /// Administrative revocation: close every channel of the user.
    EndAllForUser {
        key: SessionKey,
        reason: &'static str,
    },
}

/// Cheap, cloneable handle for enqueuing termination commands.
#[derive(Clone)]
pub struct TerminationNotifier {
    tx: Option<mpsc::UnboundedSender<TerminationCommand>>,
}

impl TerminationNotifier {
    /// Start the worker task that applies commands to `ws_manager`.
    ///
    /// The worker exits once every notifier handle has been dropped and the
    /// queue is drained.
    pub fn spawn(ws_manager: Arc<WsManager>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(ws_manager, rx));
        (Self { tx: Some(tx) }, handle)
    }

    /// A notifier that drops every command.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Enqueue without waiting. Failures are logged and swallowed.
    pub fn notify(&self, command: TerminationCommand) {
        let Some(tx) = &self.tx else {
            tracing::debug!(?command, "Termination broadcasts disabled; command dropped");
            return;
        };
        if let Err(err) = tx.send(command) {
            tracing::warn!(command = ?err.0, "Termination worker stopped; command dropped");
        }
    }
}

async fn run_worker(
    ws_manager: Arc<WsManager>,
    mut rx: mpsc::UnboundedReceiver<TerminationCommand>,
) {
    while let Some(command) = rx.recv().await {
        apply(&ws_manager, &command).await;
    }
    tracing::debug!("Termination worker stopped");
}

/// Apply one command to the registry. Returns how many channels were closed.
pub async fn apply(ws_manager: &WsManager, command: &TerminationCommand) -> usize {
    let (key, terminated) = match command {
        TerminationCommand::SupersedeOtherDevices {
            key,
            keep_device,
            reason,
        } => (
            *key,
            ws_manager
                .terminate_other_devices(*key, keep_device, reason)
                .await,
        ),
        TerminationCommand::EndDeviceSession {
            key,
            device_session_id,
            reason,
        } => (
            *key,
            ws_manager
                .end_device_session(*key, device_session_id, reason)
                .await,
        ),
        TerminationCommand::EndAllForUser { key, reason } => {
            (*key, ws_manager.end_all_for_user(*key, reason).await)
        }
    };
    if terminated > 0 {
        tracing::info!(%key, terminated, "Terminated realtime channels");
    }
    terminated
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::ws::manager::ChannelIdentity;
    use crate::ws::protocol::reasons;

    async fn bind(manager: &WsManager, conn_id: &str, device: &str) {
        let _rx = manager.add(conn_id.to_string()).await;
        manager
            .bind(
                conn_id,
                ChannelIdentity {
                    key: SessionKey::new(1, 1),
                    session_id: Uuid::new_v4(),
                    device_session_id: device.to_string(),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn worker_applies_enqueued_commands() {
        let manager = Arc::new(WsManager::new());
        bind(&manager, "old", "dev-old").await;
        bind(&manager, "new", "dev-new").await;

        let (notifier, worker) = TerminationNotifier::spawn(Arc::clone(&manager));
        notifier.notify(TerminationCommand::SupersedeOtherDevices {
            key: SessionKey::new(1, 1),
            keep_device: "dev-new".into(),
            reason: reasons::SIGNED_IN_ELSEWHERE,
        });
        drop(notifier);

        tokio::time::timeout(Duration::from_secs(2), worker)
            .await
            .expect("worker drains and exits")
            .unwrap();
        assert!(!manager.contains("old").await);
        assert!(manager.contains("new").await);
    }

    #[tokio::test]
    async fn disabled_notifier_drops_commands() {
        let manager = WsManager::new();
        bind(&manager, "c", "dev").await;

        let notifier = TerminationNotifier::disabled();
        notifier.notify(TerminationCommand::EndAllForUser {
            key: SessionKey::new(1, 1),
            reason: reasons::REVOKED_BY_ADMIN,
        });
        assert!(manager.contains("c").await);
    }

    #[tokio::test]
    async fn apply_reports_terminated_count() {
        let manager = WsManager::new();
        bind(&manager, "a", "dev-a").await;
        bind(&manager, "b", "dev-a").await;

        let n = apply(
            &manager,
            &TerminationCommand::EndDeviceSession {
                key: SessionKey::new(1, 1),
                device_session_id: "dev-a".into(),
                reason: reasons::LOGOUT,
            },
        )
        .await;
        assert_eq!(n, 2);
        assert_eq!(manager.connection_count().await, 0);
    }
}
