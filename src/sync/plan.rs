//! Backup diff computation.

use super::wire::RemoteItem;
use crate::rules::Rule;
use std::collections::{HashMap, HashSet};

/// Remote operations needed to make a collection mirror the local rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupPlan {
    /// Items to remove: stale patterns and extra copies of a pattern.
    pub deletes: Vec<RemoteItem>,
    /// Items whose content no longer matches their rule.
    pub updates: Vec<(Rule, RemoteItem)>,
    /// Rules with no remote item yet.
    pub creates: Vec<Rule>,
    /// Rules whose item is already up to date.
    pub unchanged: usize,
}

impl BackupPlan {
    /// Nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.creates.is_empty()
    }
}

/// Diff `rules` against the complete remote item list.
///
/// Items are joined on pattern id. Items whose link carries no pattern id
/// are left alone. When several items share a pattern id the first one is
/// the join partner and the others are deleted, so a successful run leaves
/// exactly one item per local rule.
#[must_use]
pub fn plan_backup(rules: &[Rule], remote: &[RemoteItem]) -> BackupPlan {
    let mut plan = BackupPlan::default();

    let mut by_pattern: HashMap<&str, &RemoteItem> = HashMap::new();
    for item in remote {
        let Some(pattern_id) = item.pattern_id() else {
            continue;
        };
        if by_pattern.contains_key(pattern_id) {
            plan.deletes.push(item.clone());
        } else {
            by_pattern.insert(pattern_id, item);
        }
    }

    let mut consumed: HashSet<String> = HashSet::new();
    for rule in rules {
        let pattern_id = rule.pattern_id();
        match by_pattern.get(pattern_id.as_str()) {
            Some(item) if item.is_current_for(rule) => plan.unchanged += 1,
            Some(item) => plan.updates.push((rule.clone(), (*item).clone())),
            None => plan.creates.push(rule.clone()),
        }
        consumed.insert(pattern_id);
    }

    for item in remote {
        let Some(pattern_id) = item.pattern_id() else {
            continue;
        };
        let is_partner = by_pattern
            .get(pattern_id)
            .is_some_and(|partner| partner.id == item.id);
        if is_partner && !consumed.contains(pattern_id) {
            plan.deletes.push(item.clone());
        }
    }

    plan
}
