//! Reconciliation of realtime channels against the session store.
//!
//! Termination broadcasts are best effort. Each tick the sweeper snapshots
//! the bound channels and, for every (tenant, user) with bound channels,
//! keeps only the device session the store's active session names and
//! terminates the rest, whether or not that device has a channel of its
//! own. If the store cannot be asked, the most recently established group
//! is kept. If the store has no active session at all, every group gets
//! `session-ended`. Repeated passes over a settled registry do nothing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tether_core::device_groups::{
    current_device, group_by_device, grouping_signature, plan_termination, DeviceGroup,
    GroupingLogGate,
};
use tether_core::types::SessionKey;
use tether_db::store::SessionStore;
use tokio_util::sync::CancellationToken;

use crate::auth::revocation::RevocationRegistry;
use crate::ws::protocol::{reasons, ServerMessage};
use crate::ws::WsManager;

/// Totals of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Keys that had more than one device group.
    pub contested_keys: usize,
    pub channels_terminated: usize,
    pub channels_ended: usize,
    pub revocations_purged: usize,
}

pub struct SessionSweeper {
    ws_manager: Arc<WsManager>,
    sessions: Arc<dyn SessionStore>,
    revocations: Arc<RevocationRegistry>,
    log_gate: GroupingLogGate,
}

impl SessionSweeper {
    pub fn new(
        ws_manager: Arc<WsManager>,
        sessions: Arc<dyn SessionStore>,
        revocations: Arc<RevocationRegistry>,
        log_cooldown: Duration,
    ) -> Self {
        Self {
            ws_manager,
            sessions,
            revocations,
            log_gate: GroupingLogGate::new(log_cooldown),
        }
    }

    /// Run one reconciliation pass.
    pub async fn sweep_once(&mut self) -> SweepReport {
        let mut report = SweepReport::default();
        let snapshot = self.ws_manager.bound_snapshot().await;
        let grouped = group_by_device(&snapshot);

        let mut contested = HashSet::new();
        for (key, groups) in &grouped {
            if groups.len() > 1 {
                contested.insert(*key);
                report.contested_keys += 1;

                let signature = grouping_signature(groups);
                if self.log_gate.should_log(*key, &signature, Utc::now()) {
                    tracing::info!(%key, groups = %signature, "Competing device sessions detected");
                }
            }

            self.reconcile(*key, groups, &mut report).await;
        }
        self.log_gate.retain_keys(&contested);

        report.revocations_purged = self.revocations.purge_expired().await;
        if report.revocations_purged > 0 {
            tracing::debug!(purged = report.revocations_purged, "Purged expired revocations");
        }
        report
    }

    async fn reconcile(&self, key: SessionKey, groups: &[DeviceGroup], report: &mut SweepReport) {
        let authoritative = match self.sessions.find_active(key).await {
            Ok(Some(active)) => Some(active.device_session_id().to_string()),
            Ok(None) => {
                let all: Vec<String> = groups
                    .iter()
                    .flat_map(|g| g.channel_ids.iter().cloned())
                    .collect();
                let ended = self
                    .ws_manager
                    .terminate_channels(&all, &ServerMessage::session_ended(reasons::SESSION_INACTIVE))
                    .await;
                if ended > 0 {
                    tracing::info!(%key, ended, "Ended channels of inactive session");
                }
                report.channels_ended += ended;
                return;
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "Session lookup failed; keeping most recent device");
                None
            }
        };

        let Some(keep) = current_device(groups, authoritative.as_deref()) else {
            return;
        };
        let plan = plan_termination(groups, keep);
        let terminated = self
            .ws_manager
            .terminate_channels(
                &plan.terminate,
                &ServerMessage::force_terminate(reasons::SIGNED_IN_ELSEWHERE),
            )
            .await;
        if terminated > 0 {
            tracing::info!(%key, keep, terminated, "Sweeper terminated stale device sessions");
        }
        report.channels_terminated += terminated;
    }

    /// Sweep every `interval` until `cancel` is triggered.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_secs = interval.as_secs(), "Session sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Session sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }
}
