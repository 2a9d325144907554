//! Durable keyed record holding rules, the OAuth credential and settings.
//!
//! [`RuleStore`] is the single owner of cross-component mutable state. Every
//! key is replaced atomically: a mutation is applied to a copy of the
//! document, the copy is persisted, and only then does it become visible.
//! A failed write leaves the previous state intact.
//!
//! Each mutation publishes a [`StoreChange`] on a broadcast channel so that
//! other components can react (e.g. restore on login).
//!
//! The store file lives at `<data_dir>/store.json` unless configured
//! otherwise. The prefill URL is local-only and never written to disk.

use crate::error::{ReloaderError, Result};
use crate::rules::{Rule, RuleError, first_duplicate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, warn};

/// Capacity of the change broadcast channel.
const CHANGE_CAPACITY: usize = 64;

/// OAuth credential for the remote bookmark service.
///
/// Always replaced as a whole; never partially updated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Bearer token for API requests.
    pub access_token: String,
    /// Token used to obtain a fresh access token.
    pub refresh_token: String,
    /// Absolute expiry, Unix epoch milliseconds.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl Credential {
    /// Build a credential from a login hand-off with a relative expiry.
    #[must_use]
    pub fn from_login(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: Some(now_ms.saturating_add(expires_in_secs.saturating_mul(1000))),
        }
    }

    /// Both tokens are present.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }

    /// The token expires within `buffer_ms` of `now_ms` (or has no known expiry).
    #[must_use]
    pub fn is_expiring_soon(&self, now_ms: u64, buffer_ms: u64) -> bool {
        match self.expires_at {
            None => true,
            Some(expires_at) => now_ms.saturating_add(buffer_ms) >= expires_at,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A committed change to one store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// The rule list was replaced.
    Rules,
    /// The credential was set, replaced, or cleared.
    Credential {
        /// A usable credential existed before the change.
        was_present: bool,
        /// A usable credential exists after the change.
        is_present: bool,
    },
    /// The auto-backup toggle changed.
    AutoBackup(bool),
}

impl StoreChange {
    /// The change is a fresh login (credential went from absent to present).
    #[must_use]
    pub fn is_login(&self) -> bool {
        matches!(
            self,
            Self::Credential {
                was_present: false,
                is_present: true
            }
        )
    }
}

/// Outcome of merging a batch of rules into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Rules appended to the list.
    pub imported: usize,
    /// Rules skipped because the pattern already existed.
    pub duplicates: usize,
    /// Rules skipped because they failed validation.
    pub invalid: usize,
}

/// Persisted store document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StoreDocument {
    /// Schema version.
    #[serde(default = "default_document_version")]
    version: u8,
    /// Ordered rule list.
    rules: Vec<Rule>,
    /// OAuth credential, if logged in.
    credential: Option<Credential>,
    /// Whether rule edits trigger an automatic backup.
    auto_backup_enabled: bool,
}

/// Drop invalid rules and keep the last entry of each duplicated pattern.
fn sanitize_loaded_rules(rules: Vec<Rule>) -> Vec<Rule> {
    let mut seen = std::collections::HashSet::new();
    let mut kept: Vec<Rule> = rules
        .into_iter()
        .rev()
        .filter(|rule| {
            if let Err(e) = rule.validate() {
                warn!(pattern = %rule.url_pattern, "dropping invalid persisted rule: {e}");
                return false;
            }
            if !seen.insert(rule.url_pattern.clone()) {
                warn!(pattern = %rule.url_pattern, "dropping duplicate persisted rule");
                return false;
            }
            true
        })
        .collect();
    kept.reverse();
    kept
}

fn default_document_version() -> u8 {
    1
}

fn credential_present(credential: Option<&Credential>) -> bool {
    credential.is_some_and(Credential::is_usable)
}

/// Durable, atomically updated record of rules, credential and settings.
pub struct RuleStore {
    /// Backing file (None = memory only).
    path: Option<PathBuf>,
    /// Committed document.
    document: Mutex<StoreDocument>,
    /// Local-only context passed from the toolbar action to the rule form.
    prefill_url: std::sync::Mutex<Option<String>>,
    /// Change notifications.
    changes: broadcast::Sender<StoreChange>,
}

impl std::fmt::Debug for RuleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RuleStore {
    /// Create a store that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_document(None, StoreDocument::default())
    }

    /// Open (or create on first write) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ReloaderError::Store`] if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut document = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StoreDocument>(&bytes)
                .map_err(|e| ReloaderError::Store(format!("cannot parse store: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(ReloaderError::Store(format!("cannot read store: {e}"))),
        };

        document.rules = sanitize_loaded_rules(std::mem::take(&mut document.rules));
        debug!(path = %path.display(), rules = document.rules.len(), "opened rule store");
        Ok(Self::with_document(Some(path), document))
    }

    fn with_document(path: Option<PathBuf>, document: StoreDocument) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            path,
            document: Mutex::new(document),
            prefill_url: std::sync::Mutex::new(None),
            changes,
        }
    }

    /// Subscribe to committed changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    // ── Rules ──────────────────────────────────────────────────────

    /// Current rule list, in stored order.
    pub async fn rules(&self) -> Vec<Rule> {
        self.document.lock().await.rules.clone()
    }

    /// Replace the whole rule list.
    ///
    /// # Errors
    ///
    /// Rejects invalid rules and duplicate patterns; fails if the write fails.
    pub async fn set_rules(&self, rules: Vec<Rule>) -> Result<()> {
        for rule in &rules {
            rule.validate()?;
        }
        if let Some(pattern) = first_duplicate(&rules) {
            return Err(RuleError::Duplicate(pattern.to_owned()).into());
        }
        self.commit(|doc| {
            doc.rules = rules;
            Ok(())
        })
        .await?;
        self.notify(StoreChange::Rules);
        Ok(())
    }

    /// Add a rule, or replace the rule currently keyed by `original_pattern`.
    ///
    /// An edit keeps the rule's position in the list; an add appends.
    ///
    /// # Errors
    ///
    /// Rejects invalid input, a pattern already used by another rule, or an
    /// edit of a rule that no longer exists.
    pub async fn upsert_rule(&self, original_pattern: Option<&str>, rule: Rule) -> Result<()> {
        let rule = Rule::new(&rule.url_pattern, rule.interval_minutes)?;
        self.commit(|doc| {
            let editing = match original_pattern {
                Some(original) => Some(
                    doc.rules
                        .iter()
                        .position(|r| r.url_pattern == original)
                        .ok_or_else(|| RuleError::NotFound(original.to_owned()))?,
                ),
                None => None,
            };

            let duplicate = doc
                .rules
                .iter()
                .position(|r| r.url_pattern == rule.url_pattern);
            if duplicate.is_some() && duplicate != editing {
                return Err(RuleError::Duplicate(rule.url_pattern.clone()).into());
            }

            match editing {
                Some(index) => doc.rules[index] = rule,
                None => doc.rules.push(rule),
            }
            Ok(())
        })
        .await?;
        self.notify(StoreChange::Rules);
        Ok(())
    }

    /// Remove the rule with `url_pattern`. Returns `true` when one was removed.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub async fn remove_rule(&self, url_pattern: &str) -> Result<bool> {
        let removed = self
            .commit(|doc| {
                let before = doc.rules.len();
                doc.rules.retain(|r| r.url_pattern != url_pattern);
                Ok(doc.rules.len() != before)
            })
            .await?;
        if removed {
            self.notify(StoreChange::Rules);
        }
        Ok(removed)
    }

    /// Append valid rules whose patterns are not yet present.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub async fn merge_rules(&self, incoming: Vec<Rule>) -> Result<MergeReport> {
        let report = self
            .commit(|doc| {
                let mut report = MergeReport::default();
                for candidate in incoming {
                    let Ok(rule) = Rule::new(&candidate.url_pattern, candidate.interval_minutes)
                    else {
                        report.invalid += 1;
                        continue;
                    };
                    if doc.rules.iter().any(|r| r.url_pattern == rule.url_pattern) {
                        report.duplicates += 1;
                    } else {
                        doc.rules.push(rule);
                        report.imported += 1;
                    }
                }
                Ok(report)
            })
            .await?;
        if report.imported > 0 {
            self.notify(StoreChange::Rules);
        }
        Ok(report)
    }

    // ── Credential ─────────────────────────────────────────────────

    /// Stored credential, if any.
    pub async fn credential(&self) -> Option<Credential> {
        self.document.lock().await.credential.clone()
    }

    /// Replace the credential atomically.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub async fn set_credential(&self, credential: Credential) -> Result<()> {
        let change = self
            .commit(|doc| {
                let was_present = credential_present(doc.credential.as_ref());
                doc.credential = Some(credential);
                Ok(StoreChange::Credential {
                    was_present,
                    is_present: credential_present(doc.credential.as_ref()),
                })
            })
            .await?;
        self.notify(change);
        Ok(())
    }

    /// Clear the credential and disable auto-backup in one write.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub async fn logout(&self) -> Result<()> {
        let (was_present, auto_was_enabled) = self
            .commit(|doc| {
                let was_present = credential_present(doc.credential.as_ref());
                let auto_was_enabled = doc.auto_backup_enabled;
                doc.credential = None;
                doc.auto_backup_enabled = false;
                Ok((was_present, auto_was_enabled))
            })
            .await?;
        self.notify(StoreChange::Credential {
            was_present,
            is_present: false,
        });
        if auto_was_enabled {
            self.notify(StoreChange::AutoBackup(false));
        }
        Ok(())
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Whether rule edits trigger an automatic backup.
    pub async fn auto_backup_enabled(&self) -> bool {
        self.document.lock().await.auto_backup_enabled
    }

    /// Enable or disable auto-backup.
    ///
    /// # Errors
    ///
    /// Fails if the write fails.
    pub async fn set_auto_backup_enabled(&self, enabled: bool) -> Result<()> {
        let changed = self
            .commit(|doc| {
                let changed = doc.auto_backup_enabled != enabled;
                doc.auto_backup_enabled = enabled;
                Ok(changed)
            })
            .await?;
        if changed {
            self.notify(StoreChange::AutoBackup(enabled));
        }
        Ok(())
    }

    /// Remember the URL the toolbar action was clicked on.
    ///
    /// Only `http://` and `https://` URLs are kept. Returns `true` when stored.
    pub fn set_prefill_url(&self, url: &str) -> bool {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return false;
        }
        match self.prefill_url.lock() {
            Ok(mut slot) => {
                *slot = Some(url.to_owned());
                true
            }
            Err(e) => {
                warn!("prefill URL slot poisoned: {e}");
                false
            }
        }
    }

    /// Take (and clear) the remembered prefill URL.
    pub fn take_prefill_url(&self) -> Option<String> {
        self.prefill_url.lock().ok().and_then(|mut slot| slot.take())
    }

    // ── Internals ──────────────────────────────────────────────────

    /// Apply `mutate` to a copy of the document, persist it, then commit.
    async fn commit<T>(
        &self,
        mutate: impl FnOnce(&mut StoreDocument) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.document.lock().await;
        let mut next = guard.clone();
        let value = mutate(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(value)
    }

    fn persist(&self, document: &StoreDocument) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ReloaderError::Store(format!("cannot create store dir: {e}")))?;
        }

        let json = serde_json::to_string_pretty(document)
            .map_err(|e| ReloaderError::Store(format!("cannot serialize store: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| ReloaderError::Store(format!("cannot write store: {e}")))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| ReloaderError::Store(format!("cannot replace store: {e}")))?;
        Ok(())
    }

    fn notify(&self, change: StoreChange) {
        debug!(?change, "store changed");
        let _ = self.changes.send(change);
    }
}
