//! Persisted queue items and the defensive codec for the stored document.
//!
//! The durable store holds an ordered JSON array of `{slug, expires, delay}`
//! records. Rows that fail to parse are dropped with a warning rather than
//! failing the whole queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::invalidator::Invalidator;

/// One scheduled invalidation in a cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Slug of the invalidator to resolve at flush time.
    pub slug: String,
    /// Absolute unix timestamp (seconds) at which the item becomes due.
    pub expires: i64,
    /// Stagger in seconds, kept so later ticks can recompute `expires`.
    pub delay: i64,
}

impl QueueItem {
    pub fn new(slug: impl Into<String>, expires: i64, delay: i64) -> Self {
        Self {
            slug: slug.into(),
            expires,
            delay,
        }
    }

    /// Schedule `invalidator` relative to `now`.
    pub fn from_invalidator(invalidator: &dyn Invalidator, now: i64) -> Self {
        let delay = invalidator.delay();
        Self::new(invalidator.slug(), now.saturating_add(delay), delay)
    }

    /// Hydrate a stored row, returning `None` for malformed input.
    ///
    /// Unknown keys are ignored. `expires` and `delay` accept integers,
    /// floats (truncated) and numeric strings.
    pub fn from_row(row: &Value) -> Option<Self> {
        let Some(fields) = row.as_object() else {
            warn!(row = %row, "Dropping non-object queue entry");
            return None;
        };

        let (Some(slug), Some(expires), Some(delay)) = (
            fields.get("slug"),
            fields.get("expires"),
            fields.get("delay"),
        ) else {
            warn!(row = %row, reason = "missing_keys", "Dropping malformed queue row");
            return None;
        };

        match (slug.as_str(), as_seconds(expires), as_seconds(delay)) {
            (Some(slug), Some(expires), Some(delay)) => Some(Self::new(slug, expires, delay)),
            _ => {
                warn!(row = %row, reason = "invalid_types", "Dropping malformed queue row");
                None
            }
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires
    }

    /// Copy of this item due `delay` seconds after `now`.
    pub fn refresh(&self, now: i64) -> Self {
        Self::new(self.slug.clone(), now.saturating_add(self.delay), self.delay)
    }

    pub fn to_row(&self) -> Value {
        serde_json::json!({
            "slug": self.slug,
            "expires": self.expires,
            "delay": self.delay,
        })
    }
}

fn as_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|float| float as i64))
        }
        _ => None,
    }
}

/// Decode a stored queue document, dropping anything that is not a valid item.
pub fn decode_queue(document: &Value) -> Vec<QueueItem> {
    let Some(rows) = document.as_array() else {
        warn!(document = %document, "Stored queue is not an array; treating as empty");
        return Vec::new();
    };

    rows.iter().filter_map(QueueItem::from_row).collect()
}

pub fn encode_queue(items: &[QueueItem]) -> Value {
    Value::Array(items.iter().map(QueueItem::to_row).collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hydrates_valid_row() {
        let item = QueueItem::from_row(&json!({
            "slug": "cloudflare",
            "expires": 1_000_100,
            "delay": 100,
        }))
        .expect("row should parse");

        assert_eq!(item, QueueItem::new("cloudflare", 1_000_100, 100));
    }

    #[test]
    fn rejects_missing_keys() {
        assert!(QueueItem::from_row(&json!({ "slug": "object_cache" })).is_none());
        assert!(QueueItem::from_row(&json!({})).is_none());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(
            QueueItem::from_row(&json!({ "slug": "x", "expires": "foo", "delay": 10 })).is_none()
        );
        assert!(
            QueueItem::from_row(&json!({ "slug": "x", "expires": 1000, "delay": null })).is_none()
        );
        assert!(
            QueueItem::from_row(&json!({ "slug": 123, "expires": 1000, "delay": 10 })).is_none()
        );
        assert!(QueueItem::from_row(&json!(["object_cache", 1000, 10])).is_none());
    }

    #[test]
    fn accepts_extra_keys_and_numeric_strings() {
        let item = QueueItem::from_row(&json!({
            "slug": "page_cache",
            "expires": "1050",
            "delay": 50.0,
            "priority": 10,
        }))
        .expect("row should parse");

        assert_eq!(item, QueueItem::new("page_cache", 1050, 50));
    }

    #[test]
    fn expiry_is_inclusive() {
        let item = QueueItem::new("object_cache", 1000, 10);
        assert!(!item.is_expired(999));
        assert!(item.is_expired(1000));
        assert!(item.is_expired(1001));
    }

    #[test]
    fn refresh_restarts_from_now() {
        let item = QueueItem::new("cloudflare", 1000, 100);
        let refreshed = item.refresh(2000);

        assert_eq!(refreshed, QueueItem::new("cloudflare", 2100, 100));
        assert_eq!(item.expires, 1000);
    }

    #[test]
    fn decode_drops_malformed_rows_and_keeps_order() {
        let document = json!([
            { "slug": 123, "expires": "x" },
            { "slug": "object_cache", "expires": 10, "delay": 10 },
            "garbage",
            { "slug": "cloudflare", "expires": 100, "delay": 100 },
        ]);

        let items = decode_queue(&document);
        let slugs: Vec<_> = items.iter().map(|item| item.slug.as_str()).collect();
        assert_eq!(slugs, ["object_cache", "cloudflare"]);
    }

    #[test]
    fn decode_non_array_is_empty() {
        assert!(decode_queue(&json!({ "slug": "object_cache" })).is_empty());
        assert!(decode_queue(&Value::Null).is_empty());
    }

    #[test]
    fn encode_writes_wire_field_names() {
        let document = encode_queue(&[QueueItem::new("object_cache", 1010, 10)]);
        assert_eq!(
            document,
            json!([{ "slug": "object_cache", "expires": 1010, "delay": 10 }])
        );
    }
}
