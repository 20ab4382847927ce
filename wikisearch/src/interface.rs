//! Wiki Search FFI Interface Definition
//!
//! This file defines the types exposed to the Android app via UniFFI.
//! It acts as the source of truth for shared types.

use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS (Structs)
// ═══════════════════════════════════════════════════════════════════════════════

/// One row of a search result list, as rendered by the UI.
///
/// `id` is the identity used for de-duplication: the wiki page id for network
/// and saved-page items.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct ResultItem {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub thumbnail_url: Option<String>,
    pub is_full_text_match: bool,
    /// The page is saved locally and can be opened without a network.
    pub is_offline_available: bool,
}

/// A window of ranked results plus the cursors of its neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Default, uniffi::Record)]
pub struct ResultPage {
    pub items: Vec<ResultItem>,
    pub prev_key: Option<u32>,
    pub next_key: Option<u32>,
}

impl ResultPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// A top result downloaded and rendered ahead of being opened.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct PrefetchedPage {
    pub page_id: String,
    pub rendered_content: String,
    pub canonical_url: String,
    pub revision_id: i64,
    pub fetched_at_timestamp: i64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// The result stream currently authoritative for display.
/// Exactly one of the two is shown; items never mix.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum ResultStream {
    Online { page: ResultPage },
    Offline { items: Vec<ResultItem> },
}

impl ResultStream {
    pub fn items(&self) -> &[ResultItem] {
        match self {
            ResultStream::Online { page } => &page.items,
            ResultStream::Offline { items } => items,
        }
    }
}

/// Main content area state. Exactly one is shown at a time.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Enum)]
pub enum ResultsView {
    /// No active query: "enter a query" prompt, no spinner.
    Prompt,
    Loading,
    Error { message: String, retryable: bool },
    NoResults,
    Populated { stream: ResultStream },
}

/// Offline indicator, orthogonal to [`ResultsView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum OfflineBanner {
    Hidden,
    /// Offline with no query.
    Offline,
    /// Offline while showing saved-page results for a query.
    ShowingOfflineResults,
}

/// Everything the search screen needs to render.
#[derive(Debug, Clone, PartialEq, Eq, uniffi::Record)]
pub struct DisplayState {
    /// Generation of the query this state belongs to.
    pub generation: u64,
    pub query: String,
    pub online: bool,
    pub view: ResultsView,
    pub banner: OfflineBanner,
}

impl DisplayState {
    pub fn initial(online: bool) -> Self {
        Self {
            generation: 0,
            query: String::new(),
            online,
            view: ResultsView::Prompt,
            banner: if online { OfflineBanner::Hidden } else { OfflineBanner::Offline },
        }
    }

    /// Items currently shown, empty unless populated.
    pub fn items(&self) -> &[ResultItem] {
        match &self.view {
            ResultsView::Populated { stream } => stream.items(),
            _ => &[],
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for search operations
#[derive(Debug, Clone, PartialEq, Eq, Error, uniffi::Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Database error: {0}")]
    Database(String),
    #[error("Index error: {0}")]
    Index(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SearchError {
    /// Page-load failures the UI may offer to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Network(_) | SearchError::Timeout | SearchError::Protocol(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SearchError::Cancelled)
    }

    /// Message for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            SearchError::Network(_) | SearchError::Timeout => {
                "Couldn't reach the wiki. Check your connection and try again.".to_string()
            }
            SearchError::Protocol(_) => {
                "The wiki returned an unexpected response. Try again later.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<crate::database::DatabaseError> for SearchError {
    fn from(e: crate::database::DatabaseError) -> Self {
        SearchError::Database(e.to_string())
    }
}

impl From<crate::indexer::IndexerError> for SearchError {
    fn from(e: crate::indexer::IndexerError) -> Self {
        SearchError::Index(e.to_string())
    }
}

impl From<crate::remote::RemoteError> for SearchError {
    fn from(e: crate::remote::RemoteError) -> Self {
        use crate::remote::RemoteError;
        match e {
            RemoteError::Timeout => SearchError::Timeout,
            RemoteError::Transport(msg) => SearchError::Network(msg),
            RemoteError::Status(code) => SearchError::Protocol(format!("HTTP {code}")),
            RemoteError::Malformed(msg) => SearchError::Protocol(msg),
            RemoteError::Api { code, info } => SearchError::Protocol(format!("{code}: {info}")),
        }
    }
}
