//! Wire types for the bookmark service collections and items.
//!
//! Each backed-up rule is stored as one bookmark whose `link` carries the
//! rule's pattern id (`reloader-bear://patterns/<patternId>`) and whose
//! `excerpt` holds the rule metadata as pretty-printed JSON.

use crate::rules::Rule;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Scheme and path prefix of item links.
pub const LINK_PREFIX: &str = "reloader-bear://patterns/";

/// Tags attached to every backed-up item.
pub const ITEM_TAGS: [&str; 2] = ["reloader-bear", "pattern"];

/// Interval used when a restored item has no usable interval.
pub const DEFAULT_RESTORE_INTERVAL_MINUTES: u32 = 30;

/// A bookmark collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

/// `GET /collections` response.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CollectionList {
    #[serde(default)]
    pub items: Vec<Collection>,
}

/// `POST /collection` response.
#[derive(Debug, Deserialize)]
pub(crate) struct CreatedCollection {
    pub item: Collection,
}

/// `GET /raindrops/{collection}` response page.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ItemPage {
    #[serde(default)]
    pub items: Vec<Value>,
}

/// A bookmark item as returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    #[serde(rename = "_id")]
    pub id: i64,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
}

impl RemoteItem {
    /// Pattern id encoded in the link, `None` for items not written by us.
    #[must_use]
    pub fn pattern_id(&self) -> Option<&str> {
        self.link
            .strip_prefix(LINK_PREFIX)
            .filter(|id| !id.is_empty())
    }

    /// Parse the metadata held in the excerpt.
    #[must_use]
    pub fn metadata(&self) -> Option<PatternMetadata> {
        let excerpt = self.excerpt.trim();
        if excerpt.is_empty() {
            return None;
        }
        serde_json::from_str(excerpt).ok()
    }

    /// Rule described by this item, if its metadata is usable.
    ///
    /// A missing, zero or negative interval falls back to
    /// [`DEFAULT_RESTORE_INTERVAL_MINUTES`]; fractional minutes are rounded.
    #[must_use]
    pub fn to_rule(&self) -> Option<Rule> {
        let metadata = self.metadata()?;
        let interval = metadata
            .interval_minutes
            .filter(|m| m.is_finite() && *m >= 1.0)
            .map_or(DEFAULT_RESTORE_INTERVAL_MINUTES, |m| {
                if m.fract() != 0.0 {
                    debug!(
                        pattern = %metadata.url_pattern,
                        interval_minutes = m,
                        "rounding fractional restore interval"
                    );
                }
                m.round().min(f64::from(u32::MAX)) as u32
            });
        Rule::new(&metadata.url_pattern, interval).ok()
    }

    /// The item already holds exactly what `rule` would write.
    #[must_use]
    pub fn is_current_for(&self, rule: &Rule) -> bool {
        self.title == rule.to_string()
            && self.metadata().is_some_and(|m| {
                m.url_pattern == rule.url_pattern
                    && m.interval_minutes == Some(f64::from(rule.interval_minutes))
            })
    }
}

/// Metadata stored in an item's excerpt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url_pattern: String,
    #[serde(default)]
    pub interval_minutes: Option<f64>,
}

/// Link for a pattern id.
#[must_use]
pub fn pattern_link(pattern_id: &str) -> String {
    format!("{LINK_PREFIX}{pattern_id}")
}

/// Request body that creates or updates the item for `rule`.
///
/// # Errors
///
/// Fails only if the metadata cannot be serialized.
pub fn item_payload(rule: &Rule, collection_id: i64) -> Result<Value, serde_json::Error> {
    let pattern_id = rule.pattern_id();
    let metadata = json!({
        "id": pattern_id,
        "urlPattern": rule.url_pattern,
        "intervalMinutes": rule.interval_minutes,
    });
    Ok(json!({
        "link": pattern_link(&pattern_id),
        "title": rule.to_string(),
        "excerpt": serde_json::to_string_pretty(&metadata)?,
        "collection": { "$id": collection_id },
        "tags": ITEM_TAGS,
    }))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn item(link: &str, excerpt: &str) -> RemoteItem {
        RemoteItem {
            id: 1,
            link: link.to_owned(),
            title: String::new(),
            excerpt: excerpt.to_owned(),
        }
    }

    #[test]
    fn payload_matches_item_layout() {
        let rule = Rule::new("example.com/a b", 5).unwrap();
        let payload = item_payload(&rule, 77).unwrap();

        assert_eq!(payload["link"], "reloader-bear://patterns/example.com%2Fa%20b");
        assert_eq!(payload["title"], "example.com/a b (5m)");
        assert_eq!(payload["collection"]["$id"], 77);
        assert_eq!(payload["tags"], json!(["reloader-bear", "pattern"]));

        let excerpt = payload["excerpt"].as_str().unwrap();
        assert!(excerpt.contains("\n  \"urlPattern\": \"example.com/a b\""));
    }

    #[test]
    fn written_item_is_current_and_restorable() {
        let rule = Rule::new("news", 3).unwrap();
        let payload = item_payload(&rule, 1).unwrap();
        let stored = RemoteItem {
            id: 9,
            link: payload["link"].as_str().unwrap().to_owned(),
            title: payload["title"].as_str().unwrap().to_owned(),
            excerpt: payload["excerpt"].as_str().unwrap().to_owned(),
        };

        assert!(stored.is_current_for(&rule));
        assert!(!stored.is_current_for(&Rule::new("news", 4).unwrap()));
        assert_eq!(stored.to_rule(), Some(rule));
    }

    #[test]
    fn foreign_links_have_no_pattern_id() {
        assert_eq!(item("https://example.com", "").pattern_id(), None);
        assert_eq!(item("reloader-bear://patterns/", "").pattern_id(), None);
        assert_eq!(
            item("reloader-bear://patterns/a%2Fb", "").pattern_id(),
            Some("a%2Fb")
        );
    }

    #[test]
    fn restore_defaults_missing_interval() {
        let missing = item("", r#"{"urlPattern": "a"}"#);
        assert_eq!(missing.to_rule().unwrap().interval_minutes, 30);

        let zero = item("", r#"{"urlPattern": "a", "intervalMinutes": 0}"#);
        assert_eq!(zero.to_rule().unwrap().interval_minutes, 30);

        let negative = item("", r#"{"urlPattern": "a", "intervalMinutes": -4}"#);
        assert_eq!(negative.to_rule().unwrap().interval_minutes, 30);
    }

    #[test]
    fn restore_rounds_fractional_interval() {
        let half = item("", r#"{"urlPattern": "a", "intervalMinutes": 2.5}"#);
        assert_eq!(half.to_rule().unwrap().interval_minutes, 3);

        let low = item("", r#"{"urlPattern": "a", "intervalMinutes": 4.2}"#);
        assert_eq!(low.to_rule().unwrap().interval_minutes, 4);
    }

    #[test]
    fn unusable_metadata_yields_no_rule() {
        assert_eq!(item("", "").to_rule(), None);
        assert_eq!(item("", "{oops").to_rule(), None);
        assert_eq!(item("", r#"{"intervalMinutes": 5}"#).to_rule(), None);
        assert_eq!(item("", r#"["a"]"#).to_rule(), None);
    }
}
