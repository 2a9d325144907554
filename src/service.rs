//! Top-level wiring of the reload manager.
//!
//! [`ReloaderService`] owns the running engines and exposes the named
//! actions the outside world drives: tab lifecycle notifications, rule
//! edits, backup and restore, login and logout.
//!
//! Startup sweeps every open tab and then tries a silent restore. A fresh
//! login (credential absent before, present after) triggers a visible
//! restore. Restores are mutually exclusive: an opportunistic trigger skips
//! while another restore runs, an explicit one reports that it is busy.

use crate::backup::AutoBackupScheduler;
use crate::badge::BadgePresenter;
use crate::config::ReloaderConfig;
use crate::error::{ReloaderError, Result};
use crate::platform::{BadgeSurface, Clock, TabHost, TabId, TokioAlarms};
use crate::remote::RemoteApi;
use crate::rules::Rule;
use crate::runtime::{RuntimeEvent, event_channel};
use crate::store::{Credential, MergeReport, RuleStore};
use crate::sync::{Reconciler, SyncOutcome};
use crate::timers::{TabTimerHandle, TabTimerScheduler};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message returned when an explicit restore finds another one running.
pub const RESTORE_BUSY_MESSAGE: &str = "A restore is already running.";

/// Where a restore request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Startup,
    OauthLogin,
    Manual,
}

impl RestoreSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::OauthLogin => "oauth_login",
            Self::Manual => "manual",
        }
    }
}

/// How a restore should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    pub source: RestoreSource,
    /// Log the result quietly.
    pub silent: bool,
    /// Return `None` instead of a busy result when a restore is running.
    pub skip_if_running: bool,
}

impl RestoreOptions {
    /// Opportunistic restore at process start.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            source: RestoreSource::Startup,
            silent: true,
            skip_if_running: true,
        }
    }

    /// Restore right after the user logged in.
    #[must_use]
    pub fn login() -> Self {
        Self {
            source: RestoreSource::OauthLogin,
            silent: false,
            skip_if_running: false,
        }
    }

    /// Restore the user asked for.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            source: RestoreSource::Manual,
            silent: false,
            skip_if_running: false,
        }
    }
}

/// Login and auto-backup state for the settings page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthStatus {
    pub logged_in: bool,
    pub expires_at: Option<u64>,
    pub auto_backup_enabled: bool,
}

/// External collaborators the service runs against.
pub struct ServiceDeps {
    pub store: Arc<RuleStore>,
    pub tabs: Arc<dyn TabHost>,
    pub surface: Arc<dyn BadgeSurface>,
    pub remote: Arc<dyn RemoteApi>,
    pub clock: Arc<dyn Clock>,
}

/// Clears the restore flag when a restore ends, however it ends.
struct RestoreGuard<'a>(&'a AtomicBool);

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The running reload manager.
pub struct ReloaderService {
    store: Arc<RuleStore>,
    timers: TabTimerHandle,
    reconciler: Arc<Reconciler>,
    auto_backup: AutoBackupScheduler,
    events: broadcast::Sender<RuntimeEvent>,
    clock: Arc<dyn Clock>,
    restore_in_progress: AtomicBool,
    cancel: CancellationToken,
}

impl ReloaderService {
    /// Spawn the engines and return the service.
    ///
    /// Call [`ReloaderService::startup`] afterwards to sweep existing tabs
    /// and run the startup restore.
    pub fn start(config: &ReloaderConfig, deps: ServiceDeps) -> Arc<Self> {
        let ServiceDeps {
            store,
            tabs,
            surface,
            remote,
            clock,
        } = deps;
        let events = event_channel();
        let cancel = CancellationToken::new();

        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let alarms = Arc::new(TokioAlarms::new(fired_tx));
        let timers = TabTimerScheduler::new(
            Arc::clone(&store),
            Arc::clone(&tabs),
            alarms,
            Arc::clone(&clock),
            events.clone(),
        )
        .spawn(fired_rx);

        let presenter = BadgePresenter::new(
            tabs,
            timers.snapshot(),
            Arc::clone(&clock),
            surface,
            config.badge.clone(),
        );
        tokio::spawn(presenter.run(events.subscribe(), cancel.child_token()));

        let reconciler = Arc::new(Reconciler::new(
            remote,
            Arc::clone(&store),
            config.remote.clone(),
        ));
        let auto_backup = AutoBackupScheduler::new(
            reconciler.clone(),
            Arc::clone(&store),
            events.clone(),
            &config.backup,
        );

        let service = Arc::new(Self {
            store,
            timers,
            reconciler,
            auto_backup,
            events,
            clock,
            restore_in_progress: AtomicBool::new(false),
            cancel,
        });
        Self::spawn_login_watcher(&service);
        info!("reloader service started");
        service
    }

    fn spawn_login_watcher(service: &Arc<Self>) {
        let mut changes = service.store.subscribe();
        let cancel = service.cancel.child_token();
        let weak = Arc::downgrade(service);
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    () = cancel.cancelled() => break,
                    change = changes.recv() => change,
                };
                match change {
                    Ok(change) if change.is_login() => {
                        let Some(service) = weak.upgrade() else { break };
                        info!("login detected, restoring rules");
                        if let Some(outcome) = service.restore(RestoreOptions::login()).await {
                            info!(success = outcome.success, message = %outcome.message, "login restore finished");
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "login watcher lagged behind store changes");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Sweep all open tabs, then try a silent restore.
    pub async fn startup(&self) {
        if let Err(e) = self.timers.sweep().await {
            warn!("initial tab sweep failed: {e}");
        }
        self.restore(RestoreOptions::startup()).await;
    }

    /// Stop background tasks and drop any pending backup.
    pub fn shutdown(&self) {
        self.auto_backup.cancel();
        self.cancel.cancel();
        info!("reloader service stopped");
    }

    /// Subscribe to runtime events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Timer scheduler handle.
    #[must_use]
    pub fn timers(&self) -> &TabTimerHandle {
        &self.timers
    }

    /// The rule store.
    #[must_use]
    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    // ── Tab lifecycle ──────────────────────────────────────────────

    /// A tab navigated or finished loading.
    pub fn tab_updated(&self, tab_id: TabId, url: &str) -> Result<()> {
        self.timers.url_changed(tab_id, url)
    }

    /// A tab was closed.
    pub fn tab_removed(&self, tab_id: TabId) -> Result<()> {
        self.timers.closed(tab_id)
    }

    /// The active tab or focused window changed.
    pub fn active_tab_changed(&self) {
        let _ = self.events.send(RuntimeEvent::ActiveTabChanged);
    }

    /// The toolbar action was clicked on a page. Returns `true` when the URL
    /// was kept for the rule form.
    pub fn action_clicked(&self, url: &str) -> bool {
        self.store.set_prefill_url(url)
    }

    /// Take the URL remembered by [`ReloaderService::action_clicked`].
    pub fn take_prefill(&self) -> Option<String> {
        self.store.take_prefill_url()
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Current rule list.
    pub async fn rules(&self) -> Vec<Rule> {
        self.store.rules().await
    }

    /// The rule list changed: sweep all tabs and optionally schedule a backup.
    pub async fn rules_changed(&self, trigger_auto_backup: bool, reason: Option<&str>) -> Result<()> {
        self.timers.rules_changed()?;
        if trigger_auto_backup {
            self.auto_backup
                .schedule_backup(reason.unwrap_or("patterns_updated"))
                .await;
        }
        Ok(())
    }

    /// Add a rule, or edit the rule keyed by `original_pattern`.
    pub async fn save_rule(&self, original_pattern: Option<&str>, rule: Rule) -> Result<()> {
        let reason = if original_pattern.is_some() {
            "pattern_updated"
        } else {
            "pattern_added"
        };
        self.store.upsert_rule(original_pattern, rule).await?;
        self.rules_changed(true, Some(reason)).await
    }

    /// Delete the rule with `url_pattern`.
    pub async fn delete_rule(&self, url_pattern: &str) -> Result<bool> {
        let removed = self.store.remove_rule(url_pattern).await?;
        if removed {
            self.rules_changed(true, Some("pattern_deleted")).await?;
        }
        Ok(removed)
    }

    /// Merge imported rules into the list.
    pub async fn import_rules(&self, rules: Vec<Rule>) -> Result<MergeReport> {
        let report = self.store.merge_rules(rules).await?;
        if report.imported > 0 {
            self.rules_changed(true, Some("patterns_imported")).await?;
        }
        Ok(report)
    }

    // ── Backup / restore ───────────────────────────────────────────

    /// Run a backup now, with badge pulses.
    pub async fn backup_now(&self) -> SyncOutcome {
        self.auto_backup.force_backup().await
    }

    /// Run a restore the user asked for.
    pub async fn restore_now(&self) -> SyncOutcome {
        self.restore(RestoreOptions::manual())
            .await
            .unwrap_or_else(|| SyncOutcome::failed(RESTORE_BUSY_MESSAGE))
    }

    /// Restore rules from the remote collection.
    ///
    /// Returns `None` when skipped because another restore is running.
    pub async fn restore(&self, options: RestoreOptions) -> Option<SyncOutcome> {
        let source = options.source.as_str();
        if self
            .restore_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if options.skip_if_running {
                debug!(source, "restore already running, skipping");
                return None;
            }
            return Some(SyncOutcome::failed(RESTORE_BUSY_MESSAGE));
        }
        let _guard = RestoreGuard(&self.restore_in_progress);

        let outcome = self.reconciler.restore().await;
        if outcome.success {
            if let Err(e) = self.timers.sweep().await {
                warn!(source, "tab sweep after restore failed: {e}");
            }
        }

        if options.silent {
            debug!(source, success = outcome.success, message = %outcome.message, "restore finished");
        } else {
            info!(source, success = outcome.success, message = %outcome.message, "restore finished");
        }
        let _ = self.events.send(RuntimeEvent::RestoreFinished {
            success: outcome.success,
        });
        Some(outcome)
    }

    // ── Auth ───────────────────────────────────────────────────────

    /// Store the tokens handed over by the OAuth login page.
    ///
    /// # Errors
    ///
    /// Rejects a hand-off missing any of the three fields.
    pub async fn login(
        &self,
        access_token: &str,
        refresh_token: &str,
        expires_in_secs: u64,
    ) -> Result<()> {
        if access_token.is_empty() || refresh_token.is_empty() || expires_in_secs == 0 {
            return Err(ReloaderError::Auth(
                "login requires access token, refresh token and expiry".to_owned(),
            ));
        }
        let credential = Credential::from_login(
            access_token,
            refresh_token,
            expires_in_secs,
            self.clock.now_ms(),
        );
        self.store.set_credential(credential).await?;
        info!("login stored");
        Ok(())
    }

    /// Forget the credential and turn auto-backup off.
    pub async fn logout(&self) -> Result<()> {
        self.auto_backup.cancel();
        self.store.logout().await?;
        info!("logged out");
        Ok(())
    }

    /// Current login and auto-backup state.
    pub async fn auth_status(&self) -> AuthStatus {
        let credential = self.store.credential().await;
        AuthStatus {
            logged_in: credential.as_ref().is_some_and(Credential::is_usable),
            expires_at: credential.and_then(|c| c.expires_at),
            auto_backup_enabled: self.store.auto_backup_enabled().await,
        }
    }

    /// Turn auto-backup on or off.
    pub async fn set_auto_backup(&self, enabled: bool) -> Result<()> {
        self.store.set_auto_backup_enabled(enabled).await?;
        if !enabled {
            self.auto_backup.cancel();
        }
        Ok(())
    }
}

impl Drop for ReloaderService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
