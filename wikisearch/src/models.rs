//! Internal data models (not exposed via FFI)
//!
//! Wire shapes returned by collaborators and rows read from local storage.

use crate::interface::ResultItem;

/// Snippet shown for saved pages matched by title only.
pub const OFFLINE_TITLE_SNIPPET: &str = "Saved for offline reading";

// ─────────────────────────────────────────────────────────────────────────────
// REMOTE
// ─────────────────────────────────────────────────────────────────────────────

/// One search hit from the remote search endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHit {
    pub id: String,
    pub title: String,
    pub snippet: Option<String>,
    /// Server-assigned rank within the result set, ascending.
    pub relevance_index: u32,
    pub thumbnail_url: Option<String>,
}

impl RemoteHit {
    pub fn has_snippet(&self) -> bool {
        self.snippet.as_deref().is_some_and(|s| !s.trim().is_empty())
    }

    pub fn into_result_item(self, is_offline_available: bool) -> ResultItem {
        ResultItem {
            id: self.id,
            title: self.title,
            snippet: self.snippet.unwrap_or_default(),
            thumbnail_url: self.thumbnail_url,
            is_full_text_match: false,
            is_offline_available,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSearchResponse {
    pub items: Vec<RemoteHit>,
}

// ─────────────────────────────────────────────────────────────────────────────
// LOCAL STORAGE
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata row for a page saved for offline reading
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct SavedPage {
    pub page_id: String,
    pub title: String,
    pub canonical_url: String,
    pub revision_id: i64,
    pub saved_at_unix: i64,
}

impl SavedPage {
    pub fn new(page_id: impl Into<String>, title: impl Into<String>, canonical_url: impl Into<String>, revision_id: i64) -> Self {
        Self {
            page_id: page_id.into(),
            title: title.into(),
            canonical_url: canonical_url.into(),
            revision_id,
            saved_at_unix: chrono::Utc::now().timestamp(),
        }
    }
}

/// Title match from the metadata store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleRow {
    pub id: String,
    pub title: String,
}

/// Body match from the full-text index
#[derive(Debug, Clone, PartialEq)]
pub struct FullTextHit {
    pub id: String,
    pub title: String,
    pub snippet: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// CONTENT ASSEMBLY
// ─────────────────────────────────────────────────────────────────────────────

/// Success payload of a priority asset download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPage {
    pub page_id: String,
    pub title: String,
    pub html_body: String,
    pub canonical_url: String,
    pub revision_id: i64,
}

/// Events emitted while downloading a page's priority assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetProgress {
    Downloading { completed: u32, total: u32 },
    Complete(AssembledPage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Options for turning an article body into a renderable document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderOptions {
    pub collapse_sections: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_snippet_counts_as_missing() {
        let hit = RemoteHit {
            id: "1".into(),
            title: "Abyssal whip".into(),
            snippet: Some("  ".into()),
            relevance_index: 0,
            thumbnail_url: None,
        };
        assert!(!hit.has_snippet());
        let item = hit.into_result_item(true);
        assert!(item.is_offline_available);
        assert!(!item.is_full_text_match);
    }
}
