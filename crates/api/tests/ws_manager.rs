//! Tests for `WsManager` driven through the termination notifier.
//!
//! These exercise the registry directly, without HTTP upgrades: binding,
//! queued termination commands, and connection bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tether_api::ws::manager::{BindError, ChannelIdentity};
use tether_api::ws::notifier::{apply, TerminationCommand, TerminationNotifier};
use tether_api::ws::protocol::reasons;
use tether_api::ws::WsManager;
use tether_core::types::SessionKey;
use uuid::Uuid;

fn key(user_id: i64) -> SessionKey {
    SessionKey::new(1, user_id)
}

async fn bound(manager: &WsManager, conn_id: &str, user_id: i64, device: &str) {
    let _rx = manager.add(conn_id.to_string()).await;
    manager
        .bind(
            conn_id,
            ChannelIdentity {
                key: key(user_id),
                session_id: Uuid::nil(),
                device_session_id: device.to_string(),
            },
        )
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unbound_channels_count_as_connections_only() {
    let manager = WsManager::new();
    let _rx = manager.add("conn-1".to_string()).await;
    bound(&manager, "conn-2", 1, "dev").await;

    assert_eq!(manager.connection_count().await, 2);
    assert_eq!(manager.bound_count().await, 1);
    let snapshot = manager.bound_snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].channel_id, "conn-2");
    assert_eq!(snapshot[0].key, key(1));
}

#[tokio::test]
async fn binding_an_unknown_channel_fails() {
    let manager = WsManager::new();
    let err = manager
        .bind(
            "ghost",
            ChannelIdentity {
                key: key(1),
                session_id: Uuid::nil(),
                device_session_id: "dev".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, BindError::UnknownChannel);
}

#[tokio::test]
async fn ping_reaches_every_connection() {
    let manager = WsManager::new();
    let mut rx = manager.add("conn-1".to_string()).await;
    manager.ping_all().await;
    assert!(matches!(rx.try_recv().unwrap(), Message::Ping(_)));
}

// ---------------------------------------------------------------------------
// Test: queued termination commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn supersede_command_spares_the_surviving_device() {
    let manager = Arc::new(WsManager::new());
    bound(&manager, "a-1", 1, "device-a").await;
    bound(&manager, "a-2", 1, "device-a").await;
    bound(&manager, "b-1", 1, "device-b").await;
    bound(&manager, "other", 2, "device-b").await;

    let (notifier, worker) = TerminationNotifier::spawn(Arc::clone(&manager));
    notifier.notify(TerminationCommand::SupersedeOtherDevices {
        key: key(1),
        keep_device: "device-a".into(),
        reason: reasons::SIGNED_IN_ELSEWHERE,
    });
    drop(notifier);
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .expect("worker drains and stops")
        .unwrap();

    assert!(manager.contains("a-1").await);
    assert!(manager.contains("a-2").await);
    assert!(!manager.contains("b-1").await);
    assert!(manager.contains("other").await);
}

#[tokio::test]
async fn commands_apply_in_order() {
    let manager = WsManager::new();
    bound(&manager, "a-1", 1, "device-a").await;
    bound(&manager, "b-1", 1, "device-b").await;

    let logout = TerminationCommand::EndDeviceSession {
        key: key(1),
        device_session_id: "device-b".into(),
        reason: reasons::LOGOUT,
    };
    assert_eq!(apply(&manager, &logout).await, 1);
    assert_eq!(apply(&manager, &logout).await, 0, "already gone");

    let revoke = TerminationCommand::EndAllForUser {
        key: key(1),
        reason: reasons::REVOKED_BY_ADMIN,
    };
    assert_eq!(apply(&manager, &revoke).await, 1);
    assert_eq!(manager.connection_count().await, 0);
}

#[tokio::test]
async fn disabled_notifier_drops_commands() {
    let manager = WsManager::new();
    bound(&manager, "a-1", 1, "device-a").await;

    let notifier = TerminationNotifier::disabled();
    notifier.notify(TerminationCommand::EndAllForUser {
        key: key(1),
        reason: reasons::REVOKED_BY_ADMIN,
    });
    assert!(manager.contains("a-1").await);
}
