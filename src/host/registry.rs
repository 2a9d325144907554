//! Host-side mirror of the browser's tabs and toolbar badge.
//!
//! The browser shell reports tab lifecycle over the bridge; [`TabRegistry`]
//! keeps the last known URL of every tab and the active tab, and answers
//! the [`TabHost`] queries the engines make. Reloads and badge changes go
//! back to the shell as events.

use crate::host::contract::EventEnvelope;
use crate::platform::{Badge, BadgeSurface, TabHost, TabId, TabInfo};
use crate::{ReloaderError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Event asking the shell to reload a tab.
pub const TAB_RELOAD_REQUESTED: &str = "tab.reload_requested";

/// Event carrying the new badge.
pub const BADGE_UPDATED: &str = "badge.updated";

#[derive(Debug, Default)]
struct TabTable {
    tabs: BTreeMap<TabId, TabInfo>,
    active: Option<TabId>,
}

/// [`TabHost`] backed by tab reports from the browser shell.
#[derive(Debug)]
pub struct TabRegistry {
    table: Mutex<TabTable>,
    events: broadcast::Sender<EventEnvelope>,
}

impl TabRegistry {
    pub fn new(events: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            table: Mutex::new(TabTable::default()),
            events,
        }
    }

    fn with_table<T>(&self, f: impl FnOnce(&mut TabTable) -> T) -> Result<T> {
        let mut table = self
            .table
            .lock()
            .map_err(|e| ReloaderError::Platform(format!("tab table poisoned: {e}")))?;
        Ok(f(&mut table))
    }

    /// Record a tab's current URL, adding the tab if it is new.
    pub fn upsert(&self, tab_id: TabId, url: Option<String>) -> Result<()> {
        self.with_table(|t| {
            t.tabs.insert(tab_id, TabInfo { id: tab_id, url });
        })
    }

    /// Forget a closed tab. Returns `true` when it was known.
    pub fn remove(&self, tab_id: TabId) -> Result<bool> {
        self.with_table(|t| {
            if t.active == Some(tab_id) {
                t.active = None;
            }
            t.tabs.remove(&tab_id).is_some()
        })
    }

    /// Set the active tab of the focused window, or clear it.
    pub fn set_active(&self, tab_id: Option<TabId>) -> Result<()> {
        self.with_table(|t| {
            if let Some(id) = tab_id {
                t.tabs.entry(id).or_insert(TabInfo { id, url: None });
            }
            t.active = tab_id;
        })
    }

    /// Number of known tabs.
    pub fn len(&self) -> usize {
        self.with_table(|t| t.tabs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TabHost for TabRegistry {
    async fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        self.with_table(|t| t.tabs.values().cloned().collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<Option<TabInfo>> {
        self.with_table(|t| t.tabs.get(&tab_id).cloned())
    }

    async fn reload_tab(&self, tab_id: TabId) -> Result<()> {
        let known = self.with_table(|t| t.tabs.contains_key(&tab_id))?;
        if !known {
            return Err(ReloaderError::Platform(format!("no tab with id {tab_id}")));
        }
        let event = EventEnvelope::fresh(TAB_RELOAD_REQUESTED, serde_json::json!({ "tab_id": tab_id }));
        if self.events.send(event).is_err() {
            debug!(tab_id, "no event subscriber for reload request");
        }
        Ok(())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>> {
        self.with_table(|t| t.active.and_then(|id| t.tabs.get(&id).cloned()))
    }
}

/// [`BadgeSurface`] that forwards every badge to the shell.
#[derive(Debug, Clone)]
pub struct EventBadgeSurface {
    events: broadcast::Sender<EventEnvelope>,
}

impl EventBadgeSurface {
    pub fn new(events: broadcast::Sender<EventEnvelope>) -> Self {
        Self { events }
    }
}

impl BadgeSurface for EventBadgeSurface {
    fn show(&self, badge: &Badge) {
        let event = EventEnvelope::fresh(
            BADGE_UPDATED,
            serde_json::json!({ "text": badge.text, "color": badge.color.hex() }),
        );
        let _ = self.events.send(event);
    }
}
