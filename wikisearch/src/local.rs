//! Local Title Search and Local Full-Text Search over saved pages.
//!
//! Both are blocking store reads, so they run on `spawn_blocking` threads.
//! Failures degrade to an empty list: a broken offline index must never
//! break the search screen.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::interface::{ResultItem, SearchError};
use crate::models::{FullTextHit, TitleRow, OFFLINE_TITLE_SNIPPET};
use crate::sources::{FullTextIndex, MetadataStore};

fn title_row_to_item(row: TitleRow) -> ResultItem {
    ResultItem {
        id: row.id,
        title: row.title,
        snippet: OFFLINE_TITLE_SNIPPET.to_string(),
        thumbnail_url: None,
        is_full_text_match: false,
        is_offline_available: true,
    }
}

fn full_text_hit_to_item(hit: FullTextHit) -> ResultItem {
    ResultItem {
        id: hit.id,
        title: hit.title,
        snippet: hit.snippet.unwrap_or_else(|| OFFLINE_TITLE_SNIPPET.to_string()),
        thumbnail_url: None,
        is_full_text_match: true,
        is_offline_available: true,
    }
}

/// Title and full-text search over the offline library.
pub struct LocalSearch {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn FullTextIndex>,
    limit: usize,
}

impl LocalSearch {
    pub fn new(store: Arc<dyn MetadataStore>, index: Arc<dyn FullTextIndex>, limit: usize) -> Self {
        Self { store, index, limit }
    }

    /// Case-insensitive substring match on saved titles.
    pub async fn search_titles(&self, query: &str) -> Vec<ResultItem> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let store = Arc::clone(&self.store);
        let pattern = trimmed.to_string();
        let limit = self.limit;
        let result = tokio::task::spawn_blocking(move || store.search_title_like(&pattern, limit)).await;

        match result {
            Ok(Ok(rows)) => rows.into_iter().map(title_row_to_item).collect(),
            Ok(Err(e)) => {
                warn!(query = %trimmed, error = %e, "Local title search failed");
                Vec::new()
            }
            Err(e) => {
                warn!(query = %trimmed, error = %e, "Local title search task failed");
                Vec::new()
            }
        }
    }

    /// Indexed match against saved page bodies.
    pub async fn search_full_text(&self, query: &str) -> Vec<ResultItem> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let index = Arc::clone(&self.index);
        let text = trimmed.to_string();
        let limit = self.limit;
        let result = tokio::task::spawn_blocking(move || index.search(&text, limit)).await;

        match result {
            Ok(Ok(hits)) => hits.into_iter().map(full_text_hit_to_item).collect(),
            Ok(Err(e)) => {
                warn!(query = %trimmed, error = %e, "Local full-text search failed");
                Vec::new()
            }
            Err(e) => {
                warn!(query = %trimmed, error = %e, "Local full-text search task failed");
                Vec::new()
            }
        }
    }

    /// Run both searches concurrently and merge them.
    ///
    /// The only error is `Cancelled`, when `token` fires before both finish.
    pub async fn search_merged(&self, query: &str, token: &CancellationToken) -> Result<Vec<ResultItem>, SearchError> {
        let both = async {
            tokio::join!(self.search_titles(query), self.search_full_text(query))
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(SearchError::Cancelled),
            (titles, full_text) = both => {
                if token.is_cancelled() {
                    return Err(SearchError::Cancelled);
                }
                Ok(crate::merge::merge(titles, full_text))
            }
        }
    }
}
