//! Debounced automatic backup.
//!
//! Rule edits call [`AutoBackupScheduler::schedule_backup`]. Each call
//! cancels whatever is pending or running and re-arms the debounce window,
//! so a burst of edits collapses into a single backup of the final state.
//!
//! Cancellation never aborts requests already sent. Every run carries its
//! own [`CancellationToken`]; a run whose token was cancelled by a newer
//! trigger simply does not report its result to the badge.

use crate::config::BackupConfig;
use crate::runtime::RuntimeEvent;
use crate::store::RuleStore;
use crate::sync::{Reconciler, SyncOutcome};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that can perform one full backup.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run_backup(&self) -> SyncOutcome;
}

#[async_trait]
impl BackupRunner for Reconciler {
    async fn run_backup(&self) -> SyncOutcome {
        self.backup().await
    }
}

struct Inner {
    runner: Arc<dyn BackupRunner>,
    store: Arc<RuleStore>,
    events: broadcast::Sender<RuntimeEvent>,
    debounce: Duration,
    current: Mutex<CancellationToken>,
}

/// Debounces rule-edit triggers into backup runs.
#[derive(Clone)]
pub struct AutoBackupScheduler {
    inner: Arc<Inner>,
}

impl AutoBackupScheduler {
    pub fn new(
        runner: Arc<dyn BackupRunner>,
        store: Arc<RuleStore>,
        events: broadcast::Sender<RuntimeEvent>,
        config: &BackupConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                store,
                events,
                debounce: config.debounce(),
                current: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Schedule a backup after the debounce window.
    ///
    /// Does nothing unless auto-backup is enabled. Returns `true` when a run
    /// was scheduled.
    pub async fn schedule_backup(&self, reason: &str) -> bool {
        if !self.inner.store.auto_backup_enabled().await {
            debug!(reason, "auto-backup disabled, not scheduling");
            return false;
        }

        let token = self.renew_token();
        info!(reason, debounce_ms = self.inner.debounce.as_millis() as u64, "backup scheduled");

        let this = self.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("scheduled backup superseded");
                }
                () = tokio::time::sleep(debounce) => {
                    this.execute(&token).await;
                }
            }
        });
        true
    }

    /// Run a backup now, dropping any pending or running one.
    pub async fn force_backup(&self) -> SyncOutcome {
        let token = self.renew_token();
        self.execute(&token).await
    }

    /// Cancel anything pending or in flight.
    ///
    /// A cancelled run never reports, so listeners are told the backup was
    /// abandoned.
    pub fn cancel(&self) {
        self.renew_token();
        debug!("backups cancelled");
        let _ = self.inner.events.send(RuntimeEvent::BackupAbandoned);
    }

    /// Cancel the current token and install a fresh one.
    fn renew_token(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        match self.inner.current.lock() {
            Ok(mut current) => {
                current.cancel();
                *current = fresh.clone();
            }
            Err(e) => warn!("backup token slot poisoned: {e}"),
        }
        fresh
    }

    async fn execute(&self, token: &CancellationToken) -> SyncOutcome {
        let _ = self.inner.events.send(RuntimeEvent::BackupStarted);
        info!("starting backup");

        let outcome = self.inner.runner.run_backup().await;

        if token.is_cancelled() {
            debug!(success = outcome.success, "newer backup started, discarding result");
            return outcome;
        }
        if outcome.success {
            info!(message = %outcome.message, "backup finished");
        } else {
            warn!(message = %outcome.message, "backup failed");
        }
        let _ = self.inner.events.send(RuntimeEvent::BackupFinished {
            success: outcome.success,
        });
        outcome
    }
}
