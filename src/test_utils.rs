//! Shared test fakes for the platform seams.

use crate::platform::{AlarmHost, Badge, BadgeSurface, Clock, TabHost, TabId, TabInfo};
use crate::remote::{RemoteApi, RemoteError};
use crate::sync::RemoteItem;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn at(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// In-memory tab table with a reload log.
#[derive(Debug, Default)]
pub struct FakeTabHost {
    tabs: Mutex<BTreeMap<TabId, TabInfo>>,
    active: Mutex<Option<TabId>>,
    reloads: Mutex<Vec<TabId>>,
    /// URL a tab lands on after its next reload.
    redirects: Mutex<BTreeMap<TabId, String>>,
}

impl FakeTabHost {
    pub fn with_tabs(tabs: &[(TabId, &str)]) -> Self {
        let host = Self::default();
        for (id, url) in tabs {
            host.open(*id, url);
        }
        host
    }

    pub fn open(&self, id: TabId, url: &str) {
        self.tabs.lock().unwrap().insert(id, TabInfo::new(id, url));
    }

    /// Keep the tab open but report its URL as unknown.
    pub fn forget_url(&self, id: TabId) {
        if let Some(tab) = self.tabs.lock().unwrap().get_mut(&id) {
            tab.url = None;
        }
    }

    pub fn close(&self, id: TabId) {
        self.tabs.lock().unwrap().remove(&id);
    }

    pub fn activate(&self, id: TabId) {
        *self.active.lock().unwrap() = Some(id);
    }

    pub fn redirect_on_reload(&self, id: TabId, url: &str) {
        self.redirects.lock().unwrap().insert(id, url.to_owned());
    }

    pub fn reloads(&self) -> Vec<TabId> {
        self.reloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabHost for FakeTabHost {
    async fn list_tabs(&self) -> crate::Result<Vec<TabInfo>> {
        Ok(self.tabs.lock().unwrap().values().cloned().collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> crate::Result<Option<TabInfo>> {
        Ok(self.tabs.lock().unwrap().get(&tab_id).cloned())
    }

    async fn reload_tab(&self, tab_id: TabId) -> crate::Result<()> {
        let mut tabs = self.tabs.lock().unwrap();
        let Some(tab) = tabs.get_mut(&tab_id) else {
            return Err(crate::ReloaderError::Platform(format!(
                "no tab with id {tab_id}"
            )));
        };
        if let Some(url) = self.redirects.lock().unwrap().remove(&tab_id) {
            tab.url = Some(url);
        }
        self.reloads.lock().unwrap().push(tab_id);
        Ok(())
    }

    async fn active_tab(&self) -> crate::Result<Option<TabInfo>> {
        let active = *self.active.lock().unwrap();
        Ok(active.and_then(|id| self.tabs.lock().unwrap().get(&id).cloned()))
    }
}

/// Alarm host that records armed alarms instead of firing them.
#[derive(Debug, Default)]
pub struct RecordingAlarms {
    armed: Mutex<BTreeMap<String, u64>>,
    cleared: Mutex<Vec<String>>,
}

impl RecordingAlarms {
    pub fn armed(&self) -> BTreeMap<String, u64> {
        self.armed.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().unwrap().clone()
    }
}

impl AlarmHost for RecordingAlarms {
    fn create(&self, name: &str, when_ms: u64) {
        self.armed.lock().unwrap().insert(name.to_owned(), when_ms);
    }

    fn clear(&self, name: &str) -> bool {
        self.cleared.lock().unwrap().push(name.to_owned());
        self.armed.lock().unwrap().remove(name).is_some()
    }
}

/// Badge surface that keeps every badge shown.
#[derive(Debug, Default)]
pub struct RecordingBadge {
    shown: Mutex<Vec<Badge>>,
}

impl RecordingBadge {
    pub fn last(&self) -> Option<Badge> {
        self.shown.lock().unwrap().last().cloned()
    }

    pub fn count(&self) -> usize {
        self.shown.lock().unwrap().len()
    }
}

impl BadgeSurface for RecordingBadge {
    fn show(&self, badge: &Badge) {
        self.shown.lock().unwrap().push(badge.clone());
    }
}

/// In-memory bookmark service speaking the same paths as the real one.
#[derive(Debug, Default)]
pub struct FakeRaindrop {
    token: Option<String>,
    state: Mutex<FakeRaindropState>,
}

#[derive(Debug, Default)]
struct FakeRaindropState {
    next_id: i64,
    collections: Vec<(i64, String)>,
    /// Item id to (collection id, item).
    items: BTreeMap<i64, (i64, RemoteItem)>,
    /// Item writes allowed before every write fails with 500.
    write_budget: Option<usize>,
    writes: usize,
    requests: Vec<String>,
}

impl FakeRaindropState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn fake_api_error(status: u16, path: &str, body: &str) -> RemoteError {
    RemoteError::Api {
        status,
        status_text: String::new(),
        body: body.to_owned(),
        path: path.to_owned(),
    }
}

impl FakeRaindrop {
    pub fn logged_in() -> Self {
        Self {
            token: Some("test-token".to_owned()),
            state: Mutex::default(),
        }
    }

    pub fn logged_out() -> Self {
        Self::default()
    }

    pub fn add_collection(&self, title: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id();
        state.collections.push((id, title.to_owned()));
        id
    }

    pub fn add_item(&self, collection_id: i64, link: &str, excerpt: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate_id();
        let item = RemoteItem {
            id,
            link: link.to_owned(),
            title: String::new(),
            excerpt: excerpt.to_owned(),
        };
        state.items.insert(id, (collection_id, item));
        id
    }

    pub fn collection_titles(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.collections.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn items(&self, collection_id: i64) -> Vec<RemoteItem> {
        let state = self.state.lock().unwrap();
        state
            .items
            .values()
            .filter(|(c, _)| *c == collection_id)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn fail_writes_after(&self, writes: usize) {
        self.state.lock().unwrap().write_budget = Some(writes);
    }

    pub fn stop_failing(&self) {
        self.state.lock().unwrap().write_budget = None;
    }

    /// Successful item writes (create, update, delete).
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().unwrap().requests.clear();
    }

    fn record(&self, method: &str, path: &str) {
        self.state
            .lock()
            .unwrap()
            .requests
            .push(format!("{method} {path}"));
    }

    fn spend_write(&self, path: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        match state.write_budget {
            Some(0) => Err(fake_api_error(500, path, "simulated failure")),
            Some(n) => {
                state.write_budget = Some(n - 1);
                state.writes += 1;
                Ok(())
            }
            None => {
                state.writes += 1;
                Ok(())
            }
        }
    }

    fn item_from_body(id: i64, body: &Value) -> RemoteItem {
        let field = |name: &str| body[name].as_str().unwrap_or_default().to_owned();
        RemoteItem {
            id,
            link: field("link"),
            title: field("title"),
            excerpt: field("excerpt"),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRaindrop {
    async fn active_token(&self) -> Option<String> {
        self.token.clone()
    }

    async fn get(&self, path: &str, _token: &str) -> Result<Value, RemoteError> {
        self.record("GET", path);
        let state = self.state.lock().unwrap();

        if path == "/collections" {
            let items: Vec<Value> = state
                .collections
                .iter()
                .map(|(id, title)| json!({ "_id": id, "title": title }))
                .collect();
            return Ok(json!({ "items": items }));
        }

        let Some(rest) = path.strip_prefix("/raindrops/") else {
            return Err(fake_api_error(404, path, "not found"));
        };
        let (collection, query) = rest.split_once('?').unwrap_or((rest, ""));
        let collection: i64 = collection.parse().unwrap();
        let mut per_page = 25usize;
        let mut page = 0usize;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("perpage", v)) => per_page = v.parse().unwrap(),
                Some(("page", v)) => page = v.parse().unwrap(),
                _ => {}
            }
        }

        let items: Vec<Value> = state
            .items
            .values()
            .filter(|(c, _)| *c == collection)
            .skip(page * per_page)
            .take(per_page)
            .map(|(_, item)| serde_json::to_value(item).unwrap())
            .collect();
        Ok(json!({ "items": items }))
    }

    async fn post(&self, path: &str, body: &Value, _token: &str) -> Result<Value, RemoteError> {
        self.record("POST", path);
        match path {
            "/collection" => {
                let title = body["title"].as_str().unwrap_or_default();
                let id = self.add_collection(title);
                Ok(json!({ "item": { "_id": id, "title": title } }))
            }
            "/raindrop" => {
                self.spend_write(path)?;
                let mut state = self.state.lock().unwrap();
                let collection = body["collection"]["$id"].as_i64().unwrap();
                let id = state.allocate_id();
                let item = Self::item_from_body(id, body);
                state.items.insert(id, (collection, item.clone()));
                Ok(json!({ "item": item }))
            }
            _ => Err(fake_api_error(404, path, "not found")),
        }
    }

    async fn put(&self, path: &str, body: &Value, _token: &str) -> Result<Value, RemoteError> {
        self.record("PUT", path);
        let id: i64 = path
            .strip_prefix("/raindrop/")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| fake_api_error(404, path, "not found"))?;
        self.spend_write(path)?;
        let mut state = self.state.lock().unwrap();
        let Some((_, item)) = state.items.get_mut(&id) else {
            return Err(fake_api_error(404, path, "not found"));
        };
        *item = Self::item_from_body(id, body);
        Ok(json!({ "item": item.clone() }))
    }

    async fn delete(&self, path: &str, _token: &str) -> Result<Value, RemoteError> {
        self.record("DELETE", path);
        let id: i64 = path
            .strip_prefix("/raindrop/")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| fake_api_error(404, path, "not found"))?;
        self.spend_write(path)?;
        self.state.lock().unwrap().items.remove(&id);
        Ok(json!({ "result": true }))
    }
}
