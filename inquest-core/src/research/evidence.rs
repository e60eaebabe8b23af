//! Evidence items and the per-sub-task evidence store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of document the text was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Pdf,
    Text,
}

/// One piece of retrieved, extracted source text tied to a sub-task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source_id: String,
    pub sub_task_id: String,
    /// URL or local path the text came from.
    pub location: String,
    pub title: String,
    /// Search snippet, if the backend supplied one.
    #[serde(default)]
    pub snippet: String,
    pub content_kind: ContentKind,
    pub extracted_text: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Canonical form of a location used for de-duplication.
///
/// URLs lose their fragment, default port and trailing slash; scheme and
/// host are lower-cased. Anything that is not an absolute URL is treated
/// as a path and only trimmed.
pub fn normalize_location(location: &str) -> String {
    let trimmed = location.trim();
    match url::Url::parse(trimmed) {
        Ok(mut url) if url.has_host() => {
            url.set_fragment(None);
            let path = url.path().trim_end_matches('/').to_string();
            url.set_path(if path.is_empty() { "/" } else { &path });
            url.to_string().trim_end_matches('/').to_string()
        }
        _ => trimmed.trim_end_matches(['/', '\\']).to_string(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Evidence keyed by sub-task id.
///
/// Items are append-only and kept in insertion order; a second item with
/// the same normalized location under the same sub-task is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceStore {
    max_content_length: usize,
    items: BTreeMap<String, Vec<EvidenceItem>>,
}

impl EvidenceStore {
    pub fn new(max_content_length: usize) -> Self {
        Self {
            max_content_length,
            items: BTreeMap::new(),
        }
    }

    /// Store `item` under `sub_task_id`. Returns `false` for a duplicate.
    pub fn put(&mut self, sub_task_id: &str, mut item: EvidenceItem) -> bool {
        let key = normalize_location(&item.location);
        let bucket = self.items.entry(sub_task_id.to_string()).or_default();
        if bucket
            .iter()
            .any(|existing| normalize_location(&existing.location) == key)
        {
            return false;
        }
        item.sub_task_id = sub_task_id.to_string();
        if self.max_content_length > 0 {
            item.extracted_text = truncate_chars(&item.extracted_text, self.max_content_length);
        }
        bucket.push(item);
        true
    }

    /// Evidence for `sub_task_id` in insertion order.
    pub fn get(&self, sub_task_id: &str) -> &[EvidenceItem] {
        self.items
            .get(sub_task_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn source_ids(&self, sub_task_id: &str) -> Vec<&str> {
        self.get(sub_task_id)
            .iter()
            .map(|i| i.source_id.as_str())
            .collect()
    }

    pub fn total_items(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_items() == 0
    }
}

#[cfg(test)]
pub(crate) fn test_item(sub_task_id: &str, n: usize, location: &str, text: &str) -> EvidenceItem {
    EvidenceItem {
        source_id: format!("{}-S{}", sub_task_id, n),
        sub_task_id: sub_task_id.to_string(),
        location: location.to_string(),
        title: format!("Source {}", n),
        snippet: String::new(),
        content_kind: ContentKind::Html,
        extracted_text: text.to_string(),
        retrieved_at: Utc::now(),
    }
}
