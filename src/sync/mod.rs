//! Backup and restore of the rule list to a bookmark collection.
//!
//! A backup makes the well-known collection mirror the local rules exactly:
//! one item per rule, joined on pattern id. The run fetches the complete
//! collection, computes a [`BackupPlan`], and then applies deletes, updates
//! and creates in that order with a short pause after each request.
//!
//! A failed request aborts the rest of the batch. Completed operations are
//! not rolled back; re-running the backup against the partially updated
//! collection converges on the same end state.
//!
//! A restore replaces the local rule list with whatever the collection
//! holds. It never creates the collection.

pub mod plan;
pub mod wire;

pub use plan::{BackupPlan, plan_backup};
pub use wire::{Collection, PatternMetadata, RemoteItem, item_payload, pattern_link};

use crate::config::RemoteConfig;
use crate::error::ReloaderError;
use crate::remote::{RemoteApi, RemoteError};
use crate::rules::Rule;
use crate::store::RuleStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wire::{CollectionList, CreatedCollection, ItemPage};

/// Why a backup or restore did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Please login to Raindrop.io first.")]
    NotLoggedIn,

    #[error("No patterns to backup.")]
    NothingToBackup,

    #[error("No \"{0}\" collection found. Backup your patterns first.")]
    CollectionMissing(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },

    #[error(transparent)]
    Store(#[from] ReloaderError),
}

impl SyncError {
    /// A precondition failed before anything was sent or changed.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotLoggedIn | Self::NothingToBackup | Self::CollectionMissing(_)
        )
    }
}

/// Counters reported by a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum SyncStats {
    Backup {
        created: usize,
        updated: usize,
        deleted: usize,
        collection_id: i64,
    },
    Restore {
        restored: usize,
        collection_id: i64,
    },
}

/// Result of a backup or restore, ready to show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
}

impl SyncOutcome {
    /// A successful run.
    pub fn succeeded(message: impl Into<String>, stats: SyncStats) -> Self {
        Self {
            success: true,
            message: message.into(),
            stats: Some(stats),
        }
    }

    /// A failed run.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            stats: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BackupCounts {
    created: usize,
    updated: usize,
    deleted: usize,
}

/// Reconciliation engine between the local rules and the remote collection.
pub struct Reconciler {
    api: Arc<dyn RemoteApi>,
    store: Arc<RuleStore>,
    config: RemoteConfig,
}

impl Reconciler {
    pub fn new(api: Arc<dyn RemoteApi>, store: Arc<RuleStore>, config: RemoteConfig) -> Self {
        Self { api, store, config }
    }

    /// Mirror the local rules into the remote collection.
    pub async fn backup(&self) -> SyncOutcome {
        let mut counts = BackupCounts::default();
        match self.try_backup(&mut counts).await {
            Ok(collection_id) => {
                let message = format!(
                    "✓ {} created, {} updated, {} deleted",
                    counts.created, counts.updated, counts.deleted
                );
                info!(
                    created = counts.created,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    collection_id,
                    "backup complete"
                );
                SyncOutcome::succeeded(
                    message,
                    SyncStats::Backup {
                        created: counts.created,
                        updated: counts.updated,
                        deleted: counts.deleted,
                        collection_id,
                    },
                )
            }
            Err(e) if e.is_precondition() => {
                debug!("backup skipped: {e}");
                SyncOutcome::failed(e.to_string())
            }
            Err(e) => {
                warn!(
                    created = counts.created,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    "backup aborted: {e}"
                );
                SyncOutcome::failed(format!("Backup failed: {e}"))
            }
        }
    }

    /// Replace the local rules with the contents of the remote collection.
    pub async fn restore(&self) -> SyncOutcome {
        match self.try_restore().await {
            Ok((restored, collection_id)) => {
                info!(restored, collection_id, "restore complete");
                SyncOutcome::succeeded(
                    format!("✓ {restored} pattern(s) restored"),
                    SyncStats::Restore {
                        restored,
                        collection_id,
                    },
                )
            }
            Err(e) if e.is_precondition() => {
                debug!("restore skipped: {e}");
                SyncOutcome::failed(e.to_string())
            }
            Err(e) => {
                warn!("restore failed: {e}");
                SyncOutcome::failed(format!("Restore failed: {e}"))
            }
        }
    }

    async fn try_backup(&self, counts: &mut BackupCounts) -> Result<i64, SyncError> {
        let token = self.api.active_token().await.ok_or(SyncError::NotLoggedIn)?;

        let rules = self.store.rules().await;
        if rules.is_empty() {
            return Err(SyncError::NothingToBackup);
        }

        let collection_id = self.get_or_create_collection(&token).await?;
        let remote = self.fetch_all_items(collection_id, &token).await?;
        let plan = plan_backup(&rules, &remote);
        debug!(
            remote = remote.len(),
            deletes = plan.deletes.len(),
            updates = plan.updates.len(),
            creates = plan.creates.len(),
            unchanged = plan.unchanged,
            "backup plan"
        );

        for item in &plan.deletes {
            self.api
                .delete(&format!("/raindrop/{}", item.id), &token)
                .await?;
            counts.deleted += 1;
            self.pause().await;
        }

        for (rule, item) in &plan.updates {
            let body = self.payload(rule, collection_id)?;
            self.api
                .put(&format!("/raindrop/{}", item.id), &body, &token)
                .await?;
            counts.updated += 1;
            self.pause().await;
        }

        for rule in &plan.creates {
            let body = self.payload(rule, collection_id)?;
            self.api.post("/raindrop", &body, &token).await?;
            counts.created += 1;
            self.pause().await;
        }

        Ok(collection_id)
    }

    async fn try_restore(&self) -> Result<(usize, i64), SyncError> {
        let token = self.api.active_token().await.ok_or(SyncError::NotLoggedIn)?;

        let collection_id = self
            .find_collection(&token)
            .await?
            .ok_or_else(|| SyncError::CollectionMissing(self.config.collection_name.clone()))?;

        let items = self.fetch_all_items(collection_id, &token).await?;
        let mut seen = HashSet::new();
        let mut restored: Vec<Rule> = Vec::with_capacity(items.len());
        for item in &items {
            let Some(rule) = item.to_rule() else {
                debug!(item_id = item.id, "skipping item without usable metadata");
                continue;
            };
            if seen.insert(rule.url_pattern.clone()) {
                restored.push(rule);
            } else {
                debug!(item_id = item.id, pattern = %rule.url_pattern, "skipping duplicate item");
            }
        }

        let count = restored.len();
        self.store.set_rules(restored).await?;
        Ok((count, collection_id))
    }

    async fn find_collection(&self, token: &str) -> Result<Option<i64>, SyncError> {
        let path = "/collections";
        let response = self.api.get(path, token).await?;
        let list: CollectionList = decode(path, response)?;
        Ok(list
            .items
            .into_iter()
            .find(|c| c.title == self.config.collection_name)
            .map(|c| c.id))
    }

    async fn get_or_create_collection(&self, token: &str) -> Result<i64, SyncError> {
        if let Some(id) = self.find_collection(token).await? {
            return Ok(id);
        }

        let path = "/collection";
        let body = serde_json::json!({
            "title": self.config.collection_name,
            "view": "list",
        });
        let response = self.api.post(path, &body, token).await?;
        let created: CreatedCollection = decode(path, response)?;
        info!(collection_id = created.item.id, "created backup collection");
        Ok(created.item.id)
    }

    /// Fetch every item of the collection, page by page.
    async fn fetch_all_items(
        &self,
        collection_id: i64,
        token: &str,
    ) -> Result<Vec<RemoteItem>, SyncError> {
        let per_page = self.config.page_size.max(1);
        let mut items = Vec::new();
        let mut page = 0usize;

        loop {
            let path = format!("/raindrops/{collection_id}?perpage={per_page}&page={page}");
            let response = self.api.get(&path, token).await?;
            let batch: ItemPage = decode(&path, response)?;
            let batch_len = batch.items.len();

            for raw in batch.items {
                match serde_json::from_value::<RemoteItem>(raw) {
                    Ok(item) => items.push(item),
                    Err(e) => debug!(page, "ignoring malformed item: {e}"),
                }
            }

            if batch_len < per_page {
                break;
            }
            page += 1;
            self.pause().await;
        }

        debug!(collection_id, items = items.len(), pages = page + 1, "fetched collection");
        Ok(items)
    }

    fn payload(&self, rule: &Rule, collection_id: i64) -> Result<serde_json::Value, SyncError> {
        item_payload(rule, collection_id).map_err(|e| SyncError::Decode {
            path: "/raindrop".to_owned(),
            message: format!("cannot encode item: {e}"),
        })
    }

    async fn pause(&self) {
        let pause = self.config.request_pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    path: &str,
    value: serde_json::Value,
) -> Result<T, SyncError> {
    serde_json::from_value(value).map_err(|e| SyncError::Decode {
        path: path.to_owned(),
        message: e.to_string(),
    })
}
