//! Tether API server library.
//!
//! Exposes config, state, error handling, routes, the realtime registry and
//! background tasks so integration tests and the binary can both use them.

pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
