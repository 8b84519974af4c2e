use std::sync::Arc;

use tether_db::store::SessionStore;

use crate::auth::credentials::CredentialVerifier;
use crate::auth::gate::RequestGate;
use crate::auth::login::LoginCoordinator;
use crate::auth::revocation::RevocationRegistry;
use crate::config::ServerConfig;
use crate::ws::notifier::TerminationNotifier;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; every registry lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Durable session records.
    pub sessions: Arc<dyn SessionStore>,
    pub revocations: Arc<RevocationRegistry>,
    /// Live realtime channels.
    pub ws_manager: Arc<WsManager>,
    pub gate: RequestGate,
    pub coordinator: Arc<LoginCoordinator>,
}

impl AppState {
    /// Wire the gate and login coordinator around the given collaborators.
    pub fn new(
        config: ServerConfig,
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialVerifier>,
        ws_manager: Arc<WsManager>,
        notifier: TerminationNotifier,
    ) -> Self {
        let revocations = Arc::new(RevocationRegistry::new(
            config.session.revocation_max_entries,
        ));
        let gate = RequestGate::new(
            config.jwt.clone(),
            Arc::clone(&sessions),
            Arc::clone(&revocations),
        );
        let coordinator = Arc::new(LoginCoordinator::new(
            Arc::clone(&sessions),
            credentials,
            Arc::clone(&revocations),
            notifier,
            config.jwt.clone(),
            config.session.login_settings(),
        ));

        Self {
            config: Arc::new(config),
            sessions,
            revocations,
            ws_manager,
            gate,
            coordinator,
        }
    }
}
