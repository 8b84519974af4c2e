//! Device-group planning for realtime session termination.
//!
//! Pure logic, no I/O. The realtime registry hands in a snapshot of its
//! bound channels and applies the resulting [`TerminationPlan`].
//!
//! Channels of one login instance share a `device_session_id` (several
//! browser tabs). A (tenant, user) may keep exactly one such group; every
//! other group belongs to a superseded login and is terminated.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use crate::types::{SessionId, SessionKey, Timestamp};

/// A channel that has announced its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundChannel {
    pub channel_id: String,
    pub key: SessionKey,
    pub session_id: SessionId,
    pub device_session_id: String,
    pub bound_at: Timestamp,
}

/// All channels of one (tenant, user) that share a device session id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceGroup {
    pub device_session_id: String,
    /// Earliest `bound_at` in the group: when this login instance first
    /// showed up on the realtime channel.
    pub established_at: Timestamp,
    pub channel_ids: Vec<String>,
}

/// Channels to close and the device session that survives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminationPlan {
    pub keep: Option<String>,
    pub terminate: Vec<String>,
}

impl TerminationPlan {
    pub fn is_empty(&self) -> bool {
        self.terminate.is_empty()
    }
}

/// Group bound channels per (tenant, user), then per device session.
///
/// Groups within a key are ordered oldest first by `established_at`
/// (ties broken by device session id so the order is deterministic).
pub fn group_by_device(channels: &[BoundChannel]) -> BTreeMap<SessionKey, Vec<DeviceGroup>> {
    let mut by_key: BTreeMap<SessionKey, HashMap<&str, DeviceGroup>> = BTreeMap::new();

    for channel in channels {
        let groups = by_key.entry(channel.key).or_default();
        let group = groups
            .entry(channel.device_session_id.as_str())
            .or_insert_with(|| DeviceGroup {
                device_session_id: channel.device_session_id.clone(),
                established_at: channel.bound_at,
                channel_ids: Vec::new(),
            });
        if channel.bound_at < group.established_at {
            group.established_at = channel.bound_at;
        }
        group.channel_ids.push(channel.channel_id.clone());
    }

    by_key
        .into_iter()
        .map(|(key, groups)| {
            let mut groups: Vec<DeviceGroup> = groups.into_values().collect();
            for group in &mut groups {
                group.channel_ids.sort();
            }
            groups.sort_by(|a, b| {
                a.established_at
                    .cmp(&b.established_at)
                    .then_with(|| a.device_session_id.cmp(&b.device_session_id))
            });
            (key, groups)
        })
        .collect()
}

/// Pick the device session that should survive.
///
/// The authoritative device (from the session store) always wins, even when
/// no group carries it. Only without one does the most recently established
/// group survive.
pub fn current_device<'a>(
    groups: &'a [DeviceGroup],
    authoritative: Option<&'a str>,
) -> Option<&'a str> {
    if authoritative.is_some() {
        return authoritative;
    }
    groups
        .iter()
        .max_by(|a, b| {
            a.established_at
                .cmp(&b.established_at)
                .then_with(|| a.device_session_id.cmp(&b.device_session_id))
        })
        .map(|g| g.device_session_id.as_str())
}

/// Terminate every group except `keep`.
///
/// `keep` does not have to match any group: at login time the new device
/// usually has no channel yet, and every existing group is closed.
pub fn plan_termination(groups: &[DeviceGroup], keep: &str) -> TerminationPlan {
    let terminate = groups
        .iter()
        .filter(|g| g.device_session_id != keep)
        .flat_map(|g| g.channel_ids.iter().cloned())
        .collect();
    TerminationPlan {
        keep: Some(keep.to_string()),
        terminate,
    }
}

/// Compact description of a key's grouping, e.g. `"dev-a:2|dev-b:1"`.
pub fn grouping_signature(groups: &[DeviceGroup]) -> String {
    let mut parts: Vec<String> = groups
        .iter()
        .map(|g| format!("{}:{}", g.device_session_id, g.channel_ids.len()))
        .collect();
    parts.sort();
    parts.join("|")
}

/// Suppresses repeated sweeper log lines for an unchanged grouping.
///
/// A key is logged when its grouping signature differs from the last one
/// logged, or when `cooldown` has passed since then.
#[derive(Debug)]
pub struct GroupingLogGate {
    cooldown: Duration,
    last: HashMap<SessionKey, (String, Timestamp)>,
}

impl GroupingLogGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: HashMap::new(),
        }
    }

    /// Returns `true` if this observation should be logged, and records it.
    pub fn should_log(&mut self, key: SessionKey, signature: &str, now: Timestamp) -> bool {
        if let Some((last_signature, logged_at)) = self.last.get(&key) {
            let elapsed = now.signed_duration_since(*logged_at);
            let within_cooldown = chrono::Duration::from_std(self.cooldown)
                .map(|cooldown| elapsed < cooldown)
                .unwrap_or(true);
            if last_signature == signature && within_cooldown {
                return false;
            }
        }
        self.last.insert(key, (signature.to_string(), now));
        true
    }

    /// Forget keys that no longer have competing groups.
    pub fn retain_keys(&mut self, live: &HashSet<SessionKey>) {
        self.last.retain(|key, _| live.contains(key));
    }

    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}
