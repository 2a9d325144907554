//! Per-tab reload timers.
//!
//! [`TabTimerScheduler`] keeps at most one [`TabTimer`] per tab. Whether a
//! timer exists is a pure function of the current rule list and the tab's
//! current URL: a tab gets a timer exactly when some rule matches its URL
//! (last match wins, see [`crate::rules::match_rule`]).
//!
//! The scheduler is an actor. It owns the timer map exclusively and
//! processes [`TabEvent`]s one at a time, so handlers never interleave on
//! the map. Every handler re-reads the rule list from the store instead of
//! trusting state captured earlier. Other components observe timers through
//! a [`watch`] snapshot rather than shared locks.
//!
//! A timer is armed as a platform alarm named `reload_tab_<id>`. When it
//! fires the tab is reloaded and its timer re-armed from the URL the tab
//! landed on. A reload against a tab that no longer exists drops the timer
//! without retrying.

use crate::platform::{AlarmHost, Clock, TabHost, TabId, TabInfo};
use crate::rules::{Rule, match_rule};
use crate::runtime::RuntimeEvent;
use crate::store::RuleStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// Prefix of alarm names owned by the scheduler.
pub const ALARM_PREFIX: &str = "reload_tab_";

/// Alarm name for a tab.
#[must_use]
pub fn alarm_name(tab_id: TabId) -> String {
    format!("{ALARM_PREFIX}{tab_id}")
}

/// Parse a tab id out of an alarm name created by [`alarm_name`].
#[must_use]
pub fn parse_alarm_name(name: &str) -> Option<TabId> {
    name.strip_prefix(ALARM_PREFIX)?.parse().ok()
}

/// Live reload timer for one tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabTimer {
    /// Tab the timer belongs to.
    pub tab_id: TabId,
    /// Rule that matched the tab's URL.
    pub rule: Rule,
    /// Reload interval in milliseconds.
    pub interval_ms: u64,
    /// Next reload, epoch milliseconds.
    pub next_reload_at: u64,
    /// Platform alarm backing this timer.
    pub alarm_name: String,
}

/// Read-only view of armed timers: tab id to next reload (epoch ms).
pub type TimerSnapshot = Arc<HashMap<TabId, u64>>;

/// Inputs to the scheduler actor.
#[derive(Debug)]
pub enum TabEvent {
    /// A tab navigated or finished loading.
    UrlChanged { tab_id: TabId, url: String },
    /// A tab was closed.
    Closed { tab_id: TabId },
    /// The rule list changed; sweep every open tab.
    RulesChanged {
        /// Signalled once the sweep has completed.
        done: Option<oneshot::Sender<()>>,
    },
    /// A platform alarm fired.
    AlarmFired { name: String },
}

/// Owner of all tab timers.
pub struct TabTimerScheduler {
    store: Arc<RuleStore>,
    tabs: Arc<dyn TabHost>,
    alarms: Arc<dyn AlarmHost>,
    clock: Arc<dyn Clock>,
    timers: HashMap<TabId, TabTimer>,
    snapshot_tx: watch::Sender<TimerSnapshot>,
    events: broadcast::Sender<RuntimeEvent>,
}

impl TabTimerScheduler {
    /// Create a scheduler with no timers.
    pub fn new(
        store: Arc<RuleStore>,
        tabs: Arc<dyn TabHost>,
        alarms: Arc<dyn AlarmHost>,
        clock: Arc<dyn Clock>,
        events: broadcast::Sender<RuntimeEvent>,
    ) -> Self {
        let (snapshot_tx, _rx) = watch::channel(TimerSnapshot::default());
        Self {
            store,
            tabs,
            alarms,
            clock,
            timers: HashMap::new(),
            snapshot_tx,
            events,
        }
    }

    /// Subscribe to timer snapshots.
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Timer for `tab_id`, if one is armed.
    #[must_use]
    pub fn timer(&self, tab_id: TabId) -> Option<&TabTimer> {
        self.timers.get(&tab_id)
    }

    /// Number of armed timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// No timers are armed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Time left until `tab_id` reloads (zero once overdue).
    #[must_use]
    pub fn remaining(&self, tab_id: TabId) -> Option<Duration> {
        self.timers.get(&tab_id).map(|timer| {
            Duration::from_millis(timer.next_reload_at.saturating_sub(self.clock.now_ms()))
        })
    }

    /// Re-evaluate one tab after a URL change.
    pub async fn on_tab_url_changed(&mut self, tab_id: TabId, url: &str) {
        let rules = self.store.rules().await;
        self.apply_rules(tab_id, url, &rules);
    }

    /// Forget a closed tab.
    pub fn on_tab_closed(&mut self, tab_id: TabId) {
        if self.timers.contains_key(&tab_id) {
            debug!(tab_id, "tab closed, dropping timer");
            self.drop_timer(tab_id);
        }
    }

    /// Re-evaluate every open tab against the current rule list.
    ///
    /// Any rule anywhere in the list can change the outcome for any tab, so
    /// this is a full sweep. Timers for tabs that are no longer open are
    /// dropped as well.
    pub async fn on_rules_changed(&mut self) {
        let rules = self.store.rules().await;
        let tabs = match self.tabs.list_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!("cannot enumerate tabs, skipping sweep: {e}");
                return;
            }
        };

        let open: HashSet<TabId> = tabs.iter().map(|tab| tab.id).collect();
        for TabInfo { id, url } in &tabs {
            match url {
                Some(url) => self.apply_rules(*id, url, &rules),
                None if self.timers.contains_key(id) => {
                    debug!(tab_id = *id, "tab URL unknown, dropping timer");
                    self.drop_timer(*id);
                }
                None => {}
            }
        }

        let stale: Vec<TabId> = self
            .timers
            .keys()
            .copied()
            .filter(|id| !open.contains(id))
            .collect();
        for tab_id in stale {
            debug!(tab_id, "tab vanished during sweep, dropping timer");
            self.drop_timer(tab_id);
        }

        info!(tabs = tabs.len(), timers = self.timers.len(), "re-evaluated all tabs");
    }

    /// Handle a fired platform alarm.
    pub async fn on_alarm(&mut self, name: &str) {
        let Some(tab_id) = parse_alarm_name(name) else {
            debug!(name, "ignoring foreign alarm");
            return;
        };
        if !self.timers.contains_key(&tab_id) {
            debug!(tab_id, "ignoring alarm for tab without timer");
            return;
        }

        if let Err(e) = self.tabs.reload_tab(tab_id).await {
            debug!(tab_id, "tab no longer exists, cleaning up timer: {e}");
            self.drop_timer(tab_id);
            return;
        }
        debug!(tab_id, "reloaded tab");
        let _ = self.events.send(RuntimeEvent::TabReloaded { tab_id });

        match self.tabs.get_tab(tab_id).await {
            Ok(Some(TabInfo { url: Some(url), .. })) => {
                self.on_tab_url_changed(tab_id, &url).await;
            }
            Ok(_) => self.drop_timer(tab_id),
            Err(e) => {
                debug!(tab_id, "cannot re-resolve reloaded tab: {e}");
                self.drop_timer(tab_id);
            }
        }
    }

    /// Process one event.
    pub async fn handle(&mut self, event: TabEvent) {
        match event {
            TabEvent::UrlChanged { tab_id, url } => self.on_tab_url_changed(tab_id, &url).await,
            TabEvent::Closed { tab_id } => self.on_tab_closed(tab_id),
            TabEvent::RulesChanged { done } => {
                self.on_rules_changed().await;
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            TabEvent::AlarmFired { name } => self.on_alarm(&name).await,
        }
    }

    /// Run the actor loop until the event channel closes.
    ///
    /// Alarm names from `fired_alarms` (e.g. a [`crate::platform::TokioAlarms`]
    /// channel) are handled like [`TabEvent::AlarmFired`].
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<TabEvent>,
        mut fired_alarms: mpsc::UnboundedReceiver<String>,
    ) {
        info!("tab timer scheduler started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                Some(name) = fired_alarms.recv() => self.on_alarm(&name).await,
            }
        }
        for timer in self.timers.values() {
            self.alarms.clear(&timer.alarm_name);
        }
        info!("tab timer scheduler stopped");
    }

    /// Spawn the actor and return a handle to it.
    pub fn spawn(self, fired_alarms: mpsc::UnboundedReceiver<String>) -> TabTimerHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TabTimerHandle {
            tx,
            snapshot: self.snapshot(),
            clock: Arc::clone(&self.clock),
        };
        tokio::spawn(self.run(rx, fired_alarms));
        handle
    }

    /// Cancel-then-recreate the timer for one tab.
    fn apply_rules(&mut self, tab_id: TabId, url: &str, rules: &[Rule]) {
        if let Some(previous) = self.timers.remove(&tab_id) {
            self.alarms.clear(&previous.alarm_name);
        }

        let Some(rule) = match_rule(rules, url) else {
            self.publish(tab_id, false);
            return;
        };

        let interval_ms = rule.interval_ms();
        let next_reload_at = self.clock.now_ms().saturating_add(interval_ms);
        let name = alarm_name(tab_id);
        self.alarms.create(&name, next_reload_at);
        debug!(
            tab_id,
            pattern = %rule.url_pattern,
            interval_minutes = rule.interval_minutes,
            "timer set"
        );
        self.timers.insert(
            tab_id,
            TabTimer {
                tab_id,
                rule: rule.clone(),
                interval_ms,
                next_reload_at,
                alarm_name: name,
            },
        );
        self.publish(tab_id, true);
    }

    fn drop_timer(&mut self, tab_id: TabId) {
        if let Some(timer) = self.timers.remove(&tab_id) {
            self.alarms.clear(&timer.alarm_name);
        }
        self.publish(tab_id, false);
    }

    fn publish(&self, tab_id: TabId, armed: bool) {
        let snapshot: HashMap<TabId, u64> = self
            .timers
            .iter()
            .map(|(id, timer)| (*id, timer.next_reload_at))
            .collect();
        self.snapshot_tx.send_replace(Arc::new(snapshot));
        let _ = self
            .events
            .send(RuntimeEvent::TimerChanged { tab_id, armed });
    }
}

/// Cloneable handle to a running [`TabTimerScheduler`].
#[derive(Clone)]
pub struct TabTimerHandle {
    tx: mpsc::UnboundedSender<TabEvent>,
    snapshot: watch::Receiver<TimerSnapshot>,
    clock: Arc<dyn Clock>,
}

impl TabTimerHandle {
    fn send(&self, event: TabEvent) -> crate::Result<()> {
        self.tx
            .send(event)
            .map_err(|e| crate::ReloaderError::Channel(format!("tab scheduler stopped: {e}")))
    }

    /// A tab navigated to `url`.
    pub fn url_changed(&self, tab_id: TabId, url: impl Into<String>) -> crate::Result<()> {
        self.send(TabEvent::UrlChanged {
            tab_id,
            url: url.into(),
        })
    }

    /// A tab closed.
    pub fn closed(&self, tab_id: TabId) -> crate::Result<()> {
        self.send(TabEvent::Closed { tab_id })
    }

    /// Queue a full sweep without waiting for it.
    pub fn rules_changed(&self) -> crate::Result<()> {
        self.send(TabEvent::RulesChanged { done: None })
    }

    /// Sweep all tabs and wait until the sweep has completed.
    pub async fn sweep(&self) -> crate::Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(TabEvent::RulesChanged {
            done: Some(done_tx),
        })?;
        done_rx
            .await
            .map_err(|e| crate::ReloaderError::Channel(format!("sweep dropped: {e}")))
    }

    /// Deliver a fired alarm from an external alarm source.
    pub fn alarm_fired(&self, name: impl Into<String>) -> crate::Result<()> {
        self.send(TabEvent::AlarmFired { name: name.into() })
    }

    /// Time left until `tab_id` reloads, if it has a timer.
    #[must_use]
    pub fn remaining(&self, tab_id: TabId) -> Option<Duration> {
        let next = self.snapshot.borrow().get(&tab_id).copied()?;
        Some(Duration::from_millis(
            next.saturating_sub(self.clock.now_ms()),
        ))
    }

    /// Subscribe to timer snapshots.
    #[must_use]
    pub fn snapshot(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshot.clone()
    }
}
