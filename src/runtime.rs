//! Runtime events shared between the engines and the badge presenter.
//!
//! Events are lightweight notifications on a broadcast channel. Nothing
//! depends on receiving every event: the badge presenter re-renders from
//! current state on its own tick, so a lagged receiver only delays a redraw.

use crate::platform::TabId;
use tokio::sync::broadcast;

/// Default capacity of the runtime event channel.
pub const EVENT_CAPACITY: usize = 128;

/// Events that describe what the reload manager is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A tab timer was armed, re-armed, or dropped.
    TimerChanged {
        /// Affected tab.
        tab_id: TabId,
        /// Whether a timer exists for the tab afterwards.
        armed: bool,
    },
    /// A tab was reloaded by its timer.
    TabReloaded { tab_id: TabId },
    /// The active tab or focused window changed.
    ActiveTabChanged,
    /// A backup run started (manual or automatic).
    BackupStarted,
    /// A backup run finished and its result is current.
    BackupFinished { success: bool },
    /// Pending and in-flight backups were cancelled with no run to follow.
    BackupAbandoned,
    /// A restore run finished.
    RestoreFinished { success: bool },
}

/// Create the runtime event channel.
#[must_use]
pub fn event_channel() -> broadcast::Sender<RuntimeEvent> {
    let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
    tx
}
