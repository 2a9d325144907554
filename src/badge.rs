//! Toolbar badge rendering.
//!
//! The badge shows the reload countdown of the active tab. Backup runs push
//! short-lived overlays (in progress, success, failure) that win over the
//! countdown until they expire; the next tick then resumes the countdown.

use crate::config::BadgeConfig;
use crate::platform::{Badge, BadgeColor, BadgeSurface, Clock, TabHost, TabId};
use crate::runtime::RuntimeEvent;
use crate::timers::TimerSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Text shown while a backup is running.
pub const BUSY_TEXT: &str = "⟳";
/// Text shown after a successful backup.
pub const SUCCESS_TEXT: &str = "✓";
/// Text shown after a failed backup.
pub const FAILURE_TEXT: &str = "✗";

/// Countdown text for `remaining`.
///
/// Whole minutes (rounded down) from one minute up, whole seconds below
/// that, and `0s` once the reload is due.
#[must_use]
pub fn countdown_text(remaining: Duration) -> String {
    let millis = remaining.as_millis();
    if millis == 0 {
        return "0s".to_owned();
    }
    let minutes = millis / 60_000;
    if minutes >= 1 {
        format!("{minutes}m")
    } else {
        format!("{}s", (millis % 60_000) / 1000)
    }
}

#[derive(Debug, Clone)]
struct Overlay {
    badge: Badge,
    /// Expiry in epoch ms; `None` lasts until replaced.
    until: Option<u64>,
}

/// Renders the active tab's countdown and backup status overlays.
pub struct BadgePresenter {
    tabs: Arc<dyn TabHost>,
    timers: watch::Receiver<TimerSnapshot>,
    clock: Arc<dyn Clock>,
    surface: Arc<dyn BadgeSurface>,
    config: BadgeConfig,
    overlay: Option<Overlay>,
    last_shown: Option<Badge>,
}

impl BadgePresenter {
    pub fn new(
        tabs: Arc<dyn TabHost>,
        timers: watch::Receiver<TimerSnapshot>,
        clock: Arc<dyn Clock>,
        surface: Arc<dyn BadgeSurface>,
        config: BadgeConfig,
    ) -> Self {
        Self {
            tabs,
            timers,
            clock,
            surface,
            config,
            overlay: None,
            last_shown: None,
        }
    }

    /// Update overlay state from a runtime event.
    pub fn apply_event(&mut self, event: &RuntimeEvent) {
        let now = self.clock.now_ms();
        match event {
            RuntimeEvent::BackupStarted => {
                self.overlay = Some(Overlay {
                    badge: Badge::new(BUSY_TEXT, BadgeColor::Busy),
                    until: None,
                });
            }
            RuntimeEvent::BackupFinished { success: true } => {
                self.overlay = Some(Overlay {
                    badge: Badge::new(SUCCESS_TEXT, BadgeColor::Success),
                    until: Some(now.saturating_add(self.config.success_clear_ms)),
                });
            }
            RuntimeEvent::BackupFinished { success: false } => {
                self.overlay = Some(Overlay {
                    badge: Badge::new(FAILURE_TEXT, BadgeColor::Failure),
                    until: Some(now.saturating_add(self.config.failure_clear_ms)),
                });
            }
            RuntimeEvent::BackupAbandoned => {
                if self
                    .overlay
                    .as_ref()
                    .is_some_and(|o| o.badge.color == BadgeColor::Busy)
                {
                    self.overlay = None;
                }
            }
            RuntimeEvent::TimerChanged { .. }
            | RuntimeEvent::TabReloaded { .. }
            | RuntimeEvent::ActiveTabChanged
            | RuntimeEvent::RestoreFinished { .. } => {}
        }
    }

    /// Badge for `active_tab` at the current time.
    pub fn render(&mut self, active_tab: Option<TabId>) -> Badge {
        let now = self.clock.now_ms();
        let expired = self
            .overlay
            .as_ref()
            .is_some_and(|o| o.until.is_some_and(|until| now >= until));
        if expired {
            self.overlay = None;
        }
        if let Some(overlay) = &self.overlay {
            return overlay.badge.clone();
        }

        let next_reload_at = active_tab.and_then(|id| self.timers.borrow().get(&id).copied());
        match next_reload_at {
            Some(at) => Badge::new(
                countdown_text(Duration::from_millis(at.saturating_sub(now))),
                BadgeColor::Countdown,
            ),
            None => Badge::blank(),
        }
    }

    /// Re-render for the current active tab and push it if it changed.
    pub async fn refresh(&mut self) -> Badge {
        let active = match self.tabs.active_tab().await {
            Ok(tab) => tab.map(|t| t.id),
            Err(e) => {
                debug!("cannot resolve active tab: {e}");
                None
            }
        };
        let badge = self.render(active);
        if self.last_shown.as_ref() != Some(&badge) {
            self.surface.show(&badge);
            self.last_shown = Some(badge.clone());
        }
        badge
    }

    /// Tick once per configured interval and on every runtime event until cancelled.
    pub async fn run(mut self, mut events: broadcast::Receiver<RuntimeEvent>, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.tick_ms.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick_ms, "badge presenter started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.refresh().await;
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        self.apply_event(&event);
                        self.refresh().await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "badge presenter lagged behind runtime events");
                        self.refresh().await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        info!("badge presenter stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::test_utils::{FakeTabHost, ManualClock, RecordingBadge};
    use std::collections::HashMap;

    const T0: u64 = 1_700_000_000_000;

    struct Fixture {
        tabs: Arc<FakeTabHost>,
        clock: Arc<ManualClock>,
        surface: Arc<RecordingBadge>,
        timers_tx: watch::Sender<TimerSnapshot>,
        presenter: BadgePresenter,
    }

    fn fixture() -> Fixture {
        let tabs = Arc::new(FakeTabHost::with_tabs(&[(1, "https://a.test"), (2, "https://b.test")]));
        let clock = Arc::new(ManualClock::at(T0));
        let surface = Arc::new(RecordingBadge::default());
        let (timers_tx, timers_rx) = watch::channel(TimerSnapshot::default());
        let presenter = BadgePresenter::new(
            tabs.clone(),
            timers_rx,
            clock.clone(),
            surface.clone(),
            BadgeConfig::default(),
        );
        Fixture {
            tabs,
            clock,
            surface,
            timers_tx,
            presenter,
        }
    }

    fn arm(tx: &watch::Sender<TimerSnapshot>, tab_id: TabId, at: u64) {
        let mut map: HashMap<TabId, u64> = (**tx.borrow()).clone();
        map.insert(tab_id, at);
        tx.send_replace(Arc::new(map));
    }

    #[test]
    fn countdown_text_formats() {
        assert_eq!(countdown_text(Duration::ZERO), "0s");
        assert_eq!(countdown_text(Duration::from_millis(999)), "0s");
        assert_eq!(countdown_text(Duration::from_secs(59)), "59s");
        assert_eq!(countdown_text(Duration::from_secs(60)), "1m");
        assert_eq!(countdown_text(Duration::from_secs(299)), "4m");
    }

    #[tokio::test]
    async fn blank_without_active_tab_or_timer() {
        let mut f = fixture();
        assert_eq!(f.presenter.refresh().await, Badge::blank());

        f.tabs.activate(2);
        arm(&f.timers_tx, 1, T0 + 60_000);
        assert_eq!(f.presenter.refresh().await, Badge::blank());
    }

    #[tokio::test]
    async fn countdown_for_active_tab() {
        let mut f = fixture();
        f.tabs.activate(1);
        arm(&f.timers_tx, 1, T0 + 125_000);

        assert_eq!(
            f.presenter.refresh().await,
            Badge::new("2m", BadgeColor::Countdown)
        );
        f.clock.advance(80_000);
        assert_eq!(f.presenter.refresh().await.text, "45s");
        f.clock.advance(60_000);
        assert_eq!(f.presenter.refresh().await.text, "0s");
    }

    #[tokio::test]
    async fn dropped_timer_blanks_badge() {
        let mut f = fixture();
        f.tabs.activate(1);
        arm(&f.timers_tx, 1, T0 + 60_000);
        assert_eq!(f.presenter.refresh().await.text, "1m");

        f.timers_tx.send_replace(TimerSnapshot::default());
        assert_eq!(f.presenter.refresh().await, Badge::blank());
    }

    #[tokio::test]
    async fn overlays_take_precedence_then_expire() {
        let mut f = fixture();
        f.tabs.activate(1);
        arm(&f.timers_tx, 1, T0 + 600_000);

        f.presenter.apply_event(&RuntimeEvent::BackupStarted);
        assert_eq!(
            f.presenter.refresh().await,
            Badge::new(BUSY_TEXT, BadgeColor::Busy)
        );
        f.clock.advance(30_000);
        assert_eq!(f.presenter.refresh().await.text, BUSY_TEXT);

        f.presenter
            .apply_event(&RuntimeEvent::BackupFinished { success: true });
        assert_eq!(f.presenter.refresh().await.color, BadgeColor::Success);
        f.clock.advance(2_999);
        assert_eq!(f.presenter.refresh().await.text, SUCCESS_TEXT);
        f.clock.advance(1);
        assert_eq!(f.presenter.refresh().await.color, BadgeColor::Countdown);
    }

    #[tokio::test]
    async fn abandoned_backup_clears_busy_overlay() {
        let mut f = fixture();
        f.tabs.activate(1);
        arm(&f.timers_tx, 1, T0 + 600_000);

        f.presenter.apply_event(&RuntimeEvent::BackupStarted);
        assert_eq!(f.presenter.refresh().await.text, BUSY_TEXT);
        f.presenter.apply_event(&RuntimeEvent::BackupAbandoned);
        assert_eq!(
            f.presenter.refresh().await,
            Badge::new("10m", BadgeColor::Countdown)
        );
    }

    #[tokio::test]
    async fn abandoned_backup_keeps_result_overlay() {
        let mut f = fixture();
        f.presenter
            .apply_event(&RuntimeEvent::BackupFinished { success: false });
        f.presenter.apply_event(&RuntimeEvent::BackupAbandoned);
        assert_eq!(f.presenter.refresh().await.color, BadgeColor::Failure);
    }

    #[tokio::test]
    async fn failure_overlay_lasts_five_seconds() {
        let mut f = fixture();
        f.presenter
            .apply_event(&RuntimeEvent::BackupFinished { success: false });
        assert_eq!(
            f.presenter.refresh().await,
            Badge::new(FAILURE_TEXT, BadgeColor::Failure)
        );
        f.clock.advance(4_000);
        assert_eq!(f.presenter.refresh().await.text, FAILURE_TEXT);
        f.clock.advance(1_000);
        assert_eq!(f.presenter.refresh().await, Badge::blank());
    }

    #[tokio::test]
    async fn unchanged_badge_is_not_pushed_again() {
        let mut f = fixture();
        f.tabs.activate(1);
        arm(&f.timers_tx, 1, T0 + 630_000);

        f.presenter.refresh().await;
        f.presenter.refresh().await;
        f.clock.advance(1_000);
        f.presenter.refresh().await;
        assert_eq!(f.surface.count(), 1);

        f.clock.advance(60_000);
        f.presenter.refresh().await;
        assert_eq!(f.surface.count(), 2);
        assert_eq!(f.surface.last().unwrap().text, "9m");
    }
}
