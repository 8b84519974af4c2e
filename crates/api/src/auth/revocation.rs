//! In-memory token denylist.
//!
//! Entries are keyed by the raw token and live until the token's own expiry;
//! after that the signature check rejects the token anyway. The registry is
//! capped: when full, expired entries are purged first and then the entries
//! closest to expiry are evicted.

use std::collections::HashMap;

use chrono::Utc;
use tether_core::types::Timestamp;
use tokio::sync::RwLock;

/// Default capacity of the registry.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Debug)]
pub struct RevocationRegistry {
    entries: RwLock<HashMap<String, Timestamp>>,
    max_entries: usize,
}

impl RevocationRegistry {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Deny `token` until `expires_at`. Already-expired tokens are ignored.
    pub async fn revoke(&self, token: &str, expires_at: Timestamp) {
        let now = Utc::now();
        if expires_at <= now {
            return;
        }

        let mut entries = self.entries.write().await;
        if !entries.contains_key(token) && entries.len() >= self.max_entries {
            entries.retain(|_, exp| *exp > now);
            while entries.len() >= self.max_entries {
                let Some(soonest) = entries
                    .iter()
                    .min_by_key(|(_, exp)| **exp)
                    .map(|(t, _)| t.clone())
                else {
                    break;
                };
                entries.remove(&soonest);
            }
        }
        entries.insert(token.to_string(), expires_at);
    }

    pub async fn is_revoked(&self, token: &str) -> bool {
        let entries = self.entries.read().await;
        entries.get(token).is_some_and(|exp| *exp > Utc::now())
    }

    /// Drop entries whose token has expired. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, exp| *exp > now);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for RevocationRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}
