//! Abstract browser platform seams.
//!
//! The engines never talk to a browser directly. They depend on:
//!
//! - [`TabHost`]: tab enumeration, lookup and reload (the tab lifecycle source)
//! - [`AlarmHost`]: named deferred wake-ups (the alarm source)
//! - [`BadgeSurface`]: the toolbar badge
//! - [`Clock`]: wall-clock time in epoch milliseconds
//!
//! Production wiring uses [`TokioAlarms`] and [`SystemClock`]; tests plug in
//! fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Browser tab identifier.
pub type TabId = i64;

/// Current epoch time in milliseconds.
#[must_use]
pub fn now_epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Minimal view of an open tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    /// Tab identifier.
    pub id: TabId,
    /// Current URL, if the browser exposes one.
    #[serde(default)]
    pub url: Option<String>,
}

impl TabInfo {
    /// Create a tab view with a URL.
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: Some(url.into()),
        }
    }
}

/// Tab lifecycle source.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Enumerate all open tabs.
    async fn list_tabs(&self) -> crate::Result<Vec<TabInfo>>;

    /// Look up one tab. `Ok(None)` when it no longer exists.
    async fn get_tab(&self, tab_id: TabId) -> crate::Result<Option<TabInfo>>;

    /// Reload a tab. Fails when the tab no longer exists.
    async fn reload_tab(&self, tab_id: TabId) -> crate::Result<()>;

    /// The active tab of the focused window, if any.
    async fn active_tab(&self) -> crate::Result<Option<TabInfo>>;
}

/// Named deferred wake-ups.
///
/// Creating an alarm with an existing name replaces it.
pub trait AlarmHost: Send + Sync {
    /// Arm `name` to fire at `when_ms` (epoch milliseconds).
    fn create(&self, name: &str, when_ms: u64);

    /// Disarm `name`. Returns `true` when an alarm was pending.
    fn clear(&self, name: &str) -> bool;
}

/// Wall-clock source.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_ms(&self) -> u64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_epoch_millis()
    }
}

/// Badge background colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeColor {
    /// No timer for the active tab.
    Neutral,
    /// Countdown running.
    Countdown,
    /// Backup in progress.
    Busy,
    /// Backup succeeded.
    Success,
    /// Backup failed.
    Failure,
}

impl BadgeColor {
    /// CSS hex color.
    #[must_use]
    pub fn hex(self) -> &'static str {
        match self {
            Self::Neutral => "#6b7280",
            Self::Countdown => "#10b981",
            Self::Busy => "#FFA500",
            Self::Success => "#00AA00",
            Self::Failure => "#FF0000",
        }
    }
}

/// Rendered badge content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    /// Short badge text (empty = hidden).
    pub text: String,
    /// Background color.
    pub color: BadgeColor,
}

impl Badge {
    /// An empty badge.
    #[must_use]
    pub fn blank() -> Self {
        Self {
            text: String::new(),
            color: BadgeColor::Neutral,
        }
    }

    /// A badge with text and color.
    pub fn new(text: impl Into<String>, color: BadgeColor) -> Self {
        Self {
            text: text.into(),
            color,
        }
    }
}

/// Toolbar badge sink.
pub trait BadgeSurface: Send + Sync {
    /// Display `badge`.
    fn show(&self, badge: &Badge);
}

/// [`AlarmHost`] implemented with tokio timers.
///
/// Fired alarm names are delivered on the channel passed to [`TokioAlarms::new`].
pub struct TokioAlarms {
    fired_tx: mpsc::UnboundedSender<String>,
    pending: std::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioAlarms {
    /// Create an alarm host that reports fired alarms on `fired_tx`.
    pub fn new(fired_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            fired_tx,
            pending: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

impl AlarmHost for TokioAlarms {
    fn create(&self, name: &str, when_ms: u64) {
        let delay = Duration::from_millis(when_ms.saturating_sub(now_epoch_millis()));
        let fired_tx = self.fired_tx.clone();
        let alarm_name = name.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired_tx.send(alarm_name).is_err() {
                debug!("alarm receiver closed, dropping fired alarm");
            }
        });

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.retain(|_, h| !h.is_finished());
                if let Some(previous) = pending.insert(name.to_owned(), handle) {
                    previous.abort();
                }
            }
            Err(e) => {
                warn!("alarm table poisoned: {e}");
                handle.abort();
            }
        }
    }

    fn clear(&self, name: &str) -> bool {
        let Ok(mut pending) = self.pending.lock() else {
            return false;
        };
        match pending.remove(name) {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }
}

impl Drop for TokioAlarms {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, handle) in pending.drain() {
                handle.abort();
            }
        }
    }
}
