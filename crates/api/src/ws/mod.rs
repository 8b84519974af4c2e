//! Realtime session registry over WebSocket.
//!
//! - [`manager`] -- channel registry and termination operations.
//! - [`notifier`] -- queue + worker applying post-commit terminations.
//! - [`protocol`] -- JSON message types.

mod handler;
mod heartbeat;
pub mod manager;
pub mod notifier;
pub mod protocol;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
