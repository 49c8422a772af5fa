//! Background expiry sweeper.
//!
//! Reports each lapsed grant exactly once: it appends an `Expire` audit
//! record and stamps `swept_at` in one write, holding the binding's lock
//! so a concurrent re-grant is never overwritten. The grant itself is not
//! touched; expiry is already enforced on read.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use keyward_core::error::KeywardResult;
use keyward_core::models::audit::CreateAuditRecord;
use keyward_core::models::binding::{Binding, BindingBatch};
use keyward_core::repository::{BindingRepository, Store};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::AuthzConfig;
use crate::locks::{BindingKey, KeyedLocks};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub role_bindings: usize,
    pub user_bindings: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.role_bindings + self.user_bindings
    }
}

pub struct ExpirySweeper<S: Store> {
    store: Arc<S>,
    locks: Arc<KeyedLocks>,
    interval: Duration,
    batch_size: u64,
}

impl<S: Store> ExpirySweeper<S> {
    pub fn new(store: Arc<S>, locks: Arc<KeyedLocks>, config: &AuthzConfig) -> Self {
        Self {
            store,
            locks,
            interval: config.sweep_interval(),
            batch_size: config.sweep_batch_size.max(1),
        }
    }

    /// Report every grant that lapsed at or before `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> KeywardResult<SweepReport> {
        let mut report = SweepReport::default();

        loop {
            let page = self
                .store
                .bindings()
                .pending_role_expirations(now, self.batch_size)
                .await?;
            let fetched = page.len() as u64;
            let mut swept = 0;
            for candidate in page {
                let _guard = self
                    .locks
                    .lock(BindingKey::Role {
                        role_id: candidate.role_id,
                        permission_id: candidate.permission_id,
                    })
                    .await;
                let Some(mut binding) = self
                    .store
                    .bindings()
                    .role_binding(candidate.role_id, candidate.permission_id)
                    .await?
                else {
                    continue;
                };
                if !binding.needs_sweep(now) {
                    continue;
                }
                let audit = CreateAuditRecord::role_expired(&binding, now);
                binding.mark_swept(now);
                self.store
                    .bindings()
                    .apply(BindingBatch {
                        role_bindings: vec![binding],
                        user_bindings: Vec::new(),
                        audit: vec![audit],
                    })
                    .await?;
                swept += 1;
            }
            report.role_bindings += swept;
            if fetched < self.batch_size || swept == 0 {
                break;
            }
        }

        loop {
            let page = self
                .store
                .bindings()
                .pending_user_expirations(now, self.batch_size)
                .await?;
            let fetched = page.len() as u64;
            let mut swept = 0;
            for candidate in page {
                let _guard = self
                    .locks
                    .lock(BindingKey::User {
                        user_id: candidate.user_id,
                        permission_id: candidate.permission_id,
                    })
                    .await;
                let Some(mut binding) = self
                    .store
                    .bindings()
                    .user_binding(candidate.user_id, candidate.permission_id)
                    .await?
                else {
                    continue;
                };
                if !binding.needs_sweep(now) {
                    continue;
                }
                let audit = CreateAuditRecord::user_expired(&binding, now);
                binding.mark_swept(now);
                self.store
                    .bindings()
                    .apply(BindingBatch {
                        role_bindings: Vec::new(),
                        user_bindings: vec![binding],
                        audit: vec![audit],
                    })
                    .await?;
                swept += 1;
            }
            report.user_bindings += swept;
            if fetched < self.batch_size || swept == 0 {
                break;
            }
        }

        let pruned = self.locks.prune();
        debug!(
            role_bindings = report.role_bindings,
            user_bindings = report.user_bindings,
            pruned_locks = pruned,
            "Expiry sweep finished"
        );
        Ok(report)
    }

    /// Sweep on every tick until `shutdown` turns `true` or its sender is
    /// dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report.total() > 0 => {
                            info!(
                                role_bindings = report.role_bindings,
                                user_bindings = report.user_bindings,
                                "Recorded expired permission grants"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Expiry sweep failed; retrying next tick"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }
}
