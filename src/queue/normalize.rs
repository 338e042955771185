//! Defensive re-validation of persisted queue records
//!
//! Every read and every write of `queue_runtime` / `queue_items` passes
//! through this module. Records written by older builds, by the UI layer or
//! by a crash halfway through a write are repaired here instead of being
//! trusted:
//!
//! - runtime: unknown status becomes `idle`, `idle` never carries an active
//!   context, and a half-present context (item without tab or tab without
//!   item) is dropped entirely
//! - items: invalid or non-http(s) URLs are dropped, later case-insensitive
//!   duplicates are dropped, unknown status becomes `pending`, timestamps are
//!   ordered, `lastError` exists exactly on `failed`/`cancelled` items

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

use super::types::{QueueItem, QueueItemStatus, QueueRuntime, RuntimeStatus};
use crate::utils::GENERIC_FAILURE_MESSAGE;

/// Validate a queue URL: absolute, http(s), with a host.
///
/// Returns the trimmed URL on success.
#[must_use]
pub fn validate_queue_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Some(trimmed.to_string()),
        _ => None,
    }
}

/// Key used for queue-wide URL uniqueness (case-insensitive)
#[must_use]
pub fn url_key(url: &str) -> String {
    url.trim().to_lowercase()
}

/// Rebuild a runtime from whatever JSON the store returned.
#[must_use]
pub fn normalize_runtime(raw: Option<&Value>, now: i64) -> QueueRuntime {
    let Some(Value::Object(map)) = raw else {
        return QueueRuntime {
            updated_at: now,
            ..QueueRuntime::default()
        };
    };

    let status = map
        .get("status")
        .and_then(Value::as_str)
        .and_then(RuntimeStatus::parse)
        .unwrap_or_default();

    let runtime = QueueRuntime {
        status,
        active_queue_item_id: non_empty_string(map.get("activeQueueItemId")),
        active_tab_id: integer(map.get("activeTabId")),
        controller_window_id: integer(map.get("controllerWindowId")),
        next_run_at: integer(map.get("nextRunAt")),
        updated_at: integer(map.get("updatedAt")).unwrap_or(now),
    };

    enforce_runtime_invariants(runtime)
}

/// Apply the runtime invariants to a typed value.
#[must_use]
pub fn enforce_runtime_invariants(mut runtime: QueueRuntime) -> QueueRuntime {
    let partial = runtime.active_queue_item_id.is_some() != runtime.active_tab_id.is_some();
    if runtime.status == RuntimeStatus::Idle || partial {
        runtime.clear_active_context();
    }
    runtime
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawQueueItem {
    id: Option<Value>,
    url: Option<Value>,
    title: Option<Value>,
    status: Option<Value>,
    attempts: Option<Value>,
    created_at: Option<Value>,
    updated_at: Option<Value>,
    last_error: Option<Value>,
}

/// Rebuild the item list from whatever JSON the store returned.
#[must_use]
pub fn normalize_items(raw: Option<&Value>, now: i64) -> Vec<QueueItem> {
    let Some(Value::Array(entries)) = raw else {
        return Vec::new();
    };

    let parsed = entries.iter().filter_map(|entry| {
        let raw: RawQueueItem = serde_json::from_value(entry.clone()).ok()?;
        let url = raw.url.as_ref().and_then(Value::as_str)?.to_string();
        let created_at = integer(raw.created_at.as_ref()).unwrap_or(now);
        Some(QueueItem {
            id: non_empty_string(raw.id.as_ref()).unwrap_or_default(),
            title: non_empty_string(raw.title.as_ref()).unwrap_or_else(|| url.clone()),
            url,
            status: raw
                .status
                .as_ref()
                .and_then(Value::as_str)
                .and_then(QueueItemStatus::parse)
                .unwrap_or(QueueItemStatus::Pending),
            attempts: raw
                .attempts
                .as_ref()
                .and_then(Value::as_u64)
                .map_or(0, |n| u32::try_from(n).unwrap_or(u32::MAX)),
            created_at,
            updated_at: integer(raw.updated_at.as_ref()).unwrap_or(created_at),
            last_error: non_empty_string(raw.last_error.as_ref()),
        })
    });

    sanitize_items(parsed)
}

/// Apply the item invariants to typed values, keeping list order.
pub fn sanitize_items(items: impl IntoIterator<Item = QueueItem>) -> Vec<QueueItem> {
    let mut seen_urls = HashSet::new();
    let mut seen_ids = HashSet::new();

    items
        .into_iter()
        .filter_map(|mut item| {
            let url = validate_queue_url(&item.url)?;
            if !seen_urls.insert(url_key(&url)) {
                return None;
            }
            item.url = url;

            if item.id.trim().is_empty() || !seen_ids.insert(item.id.clone()) {
                item.id = uuid::Uuid::new_v4().to_string();
                seen_ids.insert(item.id.clone());
            }
            if item.title.trim().is_empty() {
                item.title = item.url.clone();
            }
            item.updated_at = item.updated_at.max(item.created_at);
            item.last_error = if item.status.is_retryable() {
                Some(
                    item.last_error
                        .take()
                        .map(|e| e.trim().to_string())
                        .filter(|e| !e.is_empty())
                        .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
                )
            } else {
                None
            };
            Some(item)
        })
        .collect()
}

/// A link selected for archiving
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCandidate {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl LinkCandidate {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
        }
    }
}

/// Result of appending collected links to the queue
#[derive(Debug, Clone)]
pub struct AuthoredItems {
    /// Full list after appending
    pub items: Vec<QueueItem>,
    pub added_count: usize,
    pub skipped_count: usize,
}

/// Append new `pending` items for `links`, deduplicated against the
/// existing queue and within the batch. The queue never grows past
/// `max_items`; links beyond the cap count as skipped.
#[must_use]
pub fn author_queue_items(
    existing: Vec<QueueItem>,
    links: &[LinkCandidate],
    max_items: usize,
    now: i64,
) -> AuthoredItems {
    let mut seen: HashSet<String> = existing.iter().map(|item| url_key(&item.url)).collect();
    let mut items = existing;
    let mut added_count = 0;
    let mut skipped_count = 0;

    for link in links {
        let Some(url) = validate_queue_url(&link.url) else {
            skipped_count += 1;
            continue;
        };
        if items.len() >= max_items || !seen.insert(url_key(&url)) {
            skipped_count += 1;
            continue;
        }
        let title = link
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map_or_else(|| url.clone(), str::to_string);
        items.push(QueueItem::new(url, title, now));
        added_count += 1;
    }

    AuthoredItems {
        items,
        added_count,
        skipped_count,
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integers only: floats with a fractional part and strings are rejected.
fn integer(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.is_finite())
        .map(|f| f as i64)
}
