//! Remote Paged Search Source
//!
//! Turns (query, offset, limit) into one ready page of network results:
//! relevance-sorted, snippets completed, offline flags set. A page is only
//! returned once every sub-step has finished, so a half-enriched item is
//! never observable.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SearchConfig;
use crate::interface::{ResultPage, SearchError};
use crate::remote::RemoteResult;
use crate::sources::{MetadataStore, RemoteSearchApi};

/// Await `fut` under a timeout, giving up early when `token` is cancelled.
async fn guarded<T, F>(token: &CancellationToken, timeout: Duration, fut: F) -> Result<T, SearchError>
where
    F: Future<Output = RemoteResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SearchError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Err(SearchError::Timeout),
        },
    }
}

pub struct RemotePagedSource {
    api: Arc<dyn RemoteSearchApi>,
    store: Arc<dyn MetadataStore>,
    search_timeout: Duration,
    extract_timeout: Duration,
}

impl RemotePagedSource {
    pub fn new(api: Arc<dyn RemoteSearchApi>, store: Arc<dyn MetadataStore>, config: &SearchConfig) -> Self {
        Self {
            api,
            store,
            search_timeout: config.search_timeout(),
            extract_timeout: config.extract_timeout(),
        }
    }

    /// Load one page. A blank query yields an empty page without a request.
    ///
    /// Transport and protocol failures are returned as retryable errors;
    /// `Err(Cancelled)` means a newer query superseded this one.
    pub async fn load(
        &self,
        query: &str,
        offset: u32,
        limit: u32,
        token: &CancellationToken,
    ) -> Result<ResultPage, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(ResultPage::empty());
        }
        let limit = limit.max(1);

        let response = guarded(token, self.search_timeout, self.api.search(query, limit, offset)).await?;
        let mut hits = response.items;
        let returned = hits.len();

        // Stable: equal indices keep server order
        hits.sort_by_key(|h| h.relevance_index);

        let missing: Vec<String> = hits.iter().filter(|h| !h.has_snippet()).map(|h| h.id.clone()).collect();
        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();

        let (extracts, offline) = tokio::join!(
            self.complete_snippets(query, &missing, token),
            self.offline_ids(ids),
        );
        let mut extracts = extracts?;
        if token.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let items = hits
            .into_iter()
            .map(|mut hit| {
                if !hit.has_snippet() {
                    if let Some(extract) = extracts.remove(&hit.id) {
                        hit.snippet = Some(extract);
                    }
                }
                let is_offline = offline.contains(&hit.id);
                hit.into_result_item(is_offline)
            })
            .collect();

        debug!(query = %query, offset, limit, returned, "Remote page loaded");

        Ok(ResultPage {
            items,
            prev_key: prev_key(offset, limit),
            next_key: next_key(offset, limit, returned),
        })
    }

    /// Batched extract lookup for hits without a snippet.
    /// Failures are swallowed; only cancellation escapes.
    async fn complete_snippets(
        &self,
        query: &str,
        ids: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<String, String>, SearchError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        match guarded(token, self.extract_timeout, self.api.extract(ids)).await {
            Ok(extracts) => Ok(extracts),
            Err(SearchError::Cancelled) => Err(SearchError::Cancelled),
            Err(e) => {
                warn!(query = %query, missing = ids.len(), error = %e, "Snippet fallback failed");
                Ok(HashMap::new())
            }
        }
    }

    /// Ids in the page that are saved locally. Store errors mean "none".
    async fn offline_ids(&self, ids: Vec<String>) -> HashSet<String> {
        if ids.is_empty() {
            return HashSet::new();
        }
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.get_by_ids(&ids)).await {
            Ok(Ok(found)) => found.into_iter().collect(),
            Ok(Err(e)) => {
                warn!(error = %e, "Offline availability lookup failed");
                HashSet::new()
            }
            Err(e) => {
                warn!(error = %e, "Offline availability task failed");
                HashSet::new()
            }
        }
    }
}

fn prev_key(offset: u32, limit: u32) -> Option<u32> {
    (offset > 0).then(|| offset.saturating_sub(limit))
}

/// `None` once the page is short or the next offset is out of range.
fn next_key(offset: u32, limit: u32, returned: usize) -> Option<u32> {
    if returned < limit as usize {
        return None;
    }
    offset.checked_add(limit)
}

// ─────────────────────────────────────────────────────────────────────────────
// Refresh key
// ─────────────────────────────────────────────────────────────────────────────

/// Pages currently loaded by a list, and where it is scrolled to.
#[derive(Debug, Clone, Default)]
pub struct PagingState {
    pub pages: Vec<ResultPage>,
    /// Index of the item the list is anchored on, across all pages.
    pub anchor_position: Option<usize>,
    pub page_size: u32,
}

impl PagingState {
    /// Page containing `position`, or the last page when past the end.
    pub fn closest_page_to_position(&self, position: usize) -> Option<&ResultPage> {
        let mut start = 0;
        for page in &self.pages {
            let end = start + page.items.len();
            if position < end {
                return Some(page);
            }
            start = end;
        }
        self.pages.last()
    }
}

/// Offset to reload from after invalidation: the anchored page's own offset,
/// derived from its neighbour cursors. `None` restarts from the first page.
///
/// The next cursor is exact, so it wins. The previous cursor is clamped at
/// zero: on a last page that starts inside the first `page_size` items the
/// reload starts at `page_size` rather than the page's own offset.
pub fn refresh_key(state: &PagingState) -> Option<u32> {
    let anchor = state.anchor_position?;
    let page = state.closest_page_to_position(anchor)?;
    page.next_key
        .map(|next| next.saturating_sub(state.page_size))
        .or_else(|| page.prev_key.map(|prev| prev.saturating_add(state.page_size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseError, DatabaseResult};
    use crate::models::{RemoteHit, RemoteSearchResponse, TitleRow};
    use crate::remote::RemoteError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hit(id: &str, index: u32, snippet: Option<&str>) -> RemoteHit {
        RemoteHit {
            id: id.to_string(),
            title: format!("Page {id}"),
            snippet: snippet.map(str::to_string),
            relevance_index: index,
            thumbnail_url: None,
        }
    }

    #[derive(Default)]
    struct FakeApi {
        hits: Vec<RemoteHit>,
        extracts: HashMap<String, String>,
        fail_search: Option<RemoteError>,
        fail_extract: bool,
        search_delay: Option<Duration>,
        extract_delay: Option<Duration>,
        search_calls: AtomicUsize,
        extract_calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl RemoteSearchApi for FakeApi {
        async fn search(&self, _query: &str, limit: u32, offset: u32) -> RemoteResult<RemoteSearchResponse> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.search_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = &self.fail_search {
                return Err(e.clone());
            }
            let items = self.hits.iter().skip(offset as usize).take(limit as usize).cloned().collect();
            Ok(RemoteSearchResponse { items })
        }

        async fn extract(&self, ids: &[String]) -> RemoteResult<HashMap<String, String>> {
            self.extract_calls.lock().push(ids.to_vec());
            if let Some(delay) = self.extract_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_extract {
                return Err(RemoteError::Status(503));
            }
            Ok(ids.iter().filter_map(|id| self.extracts.get(id).map(|s| (id.clone(), s.clone()))).collect())
        }
    }

    struct FakeStore {
        saved: Vec<String>,
        fail: bool,
    }

    impl MetadataStore for FakeStore {
        fn get_by_ids(&self, ids: &[String]) -> DatabaseResult<Vec<String>> {
            if self.fail {
                return Err(DatabaseError::Io(std::io::Error::other("locked")));
            }
            Ok(ids.iter().filter(|id| self.saved.contains(id)).cloned().collect())
        }

        fn search_title_like(&self, _pattern: &str, _limit: usize) -> DatabaseResult<Vec<TitleRow>> {
            Ok(Vec::new())
        }
    }

    fn paged_source(api: FakeApi, saved: &[&str]) -> (RemotePagedSource, Arc<FakeApi>) {
        let api = Arc::new(api);
        let store = Arc::new(FakeStore { saved: saved.iter().map(|s| s.to_string()).collect(), fail: false });
        let config = SearchConfig::default()
            .with_search_timeout(Duration::from_secs(1))
            .with_extract_timeout(Duration::from_millis(500));
        (RemotePagedSource::new(api.clone(), store, &config), api)
    }

    fn ids(page: &ResultPage) -> Vec<&str> {
        page.items.iter().map(|i| i.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_blank_query_makes_no_request() {
        let (source, api) = paged_source(FakeApi::default(), &[]);
        let page = source.load("  ", 0, 20, &CancellationToken::new()).await.unwrap();
        assert_eq!(page, ResultPage::empty());
        assert_eq!(api.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sorted_by_relevance_and_snippet_patched() {
        let mut extracts = HashMap::new();
        extracts.insert("12".to_string(), "Patched extract.".to_string());
        let api = FakeApi {
            hits: vec![hit("30", 2, Some("c")), hit("12", 0, None), hit("7", 1, Some("b"))],
            extracts,
            ..Default::default()
        };
        let (source, api) = paged_source(api, &[]);

        let page = source.load("dragon", 0, 20, &CancellationToken::new()).await.unwrap();
        assert_eq!(ids(&page), vec!["12", "7", "30"]);
        assert_eq!(page.items[0].snippet, "Patched extract.");
        // Only the item missing a snippet is looked up, in one batch
        assert_eq!(*api.extract_calls.lock(), vec![vec!["12".to_string()]]);
    }

    #[tokio::test]
    async fn test_snippet_fallback_failure_is_swallowed() {
        let api = FakeApi {
            hits: vec![hit("1", 0, None), hit("2", 1, Some("b"))],
            fail_extract: true,
            ..Default::default()
        };
        let (source, _api) = paged_source(api, &[]);

        let page = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].snippet, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_snippet_fallback_times_out_to_empty_snippet() {
        let mut extracts = HashMap::new();
        extracts.insert("1".to_string(), "Too late.".to_string());
        let api = FakeApi {
            hits: vec![hit("1", 0, None), hit("2", 1, Some("b"))],
            extracts,
            extract_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let (source, api) = paged_source(api, &["2"]);

        let started = tokio::time::Instant::now();
        let page = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ids(&page), vec!["1", "2"]);
        assert_eq!(page.items[0].snippet, "");
        assert!(page.items[1].is_offline_available);
        assert_eq!(api.extract_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_flags_from_store() {
        let api = FakeApi {
            hits: vec![hit("1", 0, Some("a")), hit("2", 1, Some("b"))],
            ..Default::default()
        };
        let (source, _api) = paged_source(api, &["2"]);

        let page = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap();
        assert!(!page.items[0].is_offline_available);
        assert!(page.items[1].is_offline_available);
        assert!(page.items.iter().all(|i| !i.is_full_text_match));
    }

    #[tokio::test]
    async fn test_store_failure_leaves_flags_false() {
        let api = Arc::new(FakeApi { hits: vec![hit("1", 0, Some("a"))], ..Default::default() });
        let store = Arc::new(FakeStore { saved: vec!["1".into()], fail: true });
        let source = RemotePagedSource::new(api, store, &SearchConfig::default());

        let page = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap();
        assert!(!page.items[0].is_offline_available);
    }

    #[tokio::test]
    async fn test_page_keys() {
        let hits: Vec<RemoteHit> = (0..5).map(|i| hit(&i.to_string(), i, Some("s"))).collect();
        let (source, _api) = paged_source(FakeApi { hits, ..Default::default() }, &[]);
        let token = CancellationToken::new();

        let first = source.load("rune", 0, 2, &token).await.unwrap();
        assert_eq!((first.prev_key, first.next_key), (None, Some(2)));

        let second = source.load("rune", 2, 2, &token).await.unwrap();
        assert_eq!((second.prev_key, second.next_key), (Some(0), Some(4)));

        // Short page ends the results
        let last = source.load("rune", 4, 2, &token).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!((last.prev_key, last.next_key), (Some(2), None));
    }

    #[tokio::test]
    async fn test_offset_at_end_of_range_has_no_next_key() {
        assert_eq!(next_key(u32::MAX - 5, 20, 20), None);
        assert_eq!(next_key(u32::MAX - 20, 20, 20), Some(u32::MAX));

        let hits: Vec<RemoteHit> = (0..5).map(|i| hit(&i.to_string(), i, Some("s"))).collect();
        let (source, _api) = paged_source(FakeApi { hits, ..Default::default() }, &[]);
        let page = source.load("rune", u32::MAX, 20, &CancellationToken::new()).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_key, None);
    }

    #[test]
    fn test_prev_key_clamps_at_start() {
        assert_eq!(prev_key(5, 20), Some(0));
        assert_eq!(prev_key(0, 20), None);
    }

    #[tokio::test]
    async fn test_transport_and_protocol_errors() {
        let api = FakeApi { fail_search: Some(RemoteError::Transport("unreachable".into())), ..Default::default() };
        let (source, _api) = paged_source(api, &[]);
        let err = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::Network(_)));
        assert!(err.is_retryable());

        let api = FakeApi { fail_search: Some(RemoteError::Status(500)), ..Default::default() };
        let (source, _api) = paged_source(api, &[]);
        let err = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::Protocol(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_recoverable_error() {
        let api = FakeApi {
            hits: vec![hit("1", 0, Some("a"))],
            search_delay: Some(Duration::from_secs(30)),
            ..Default::default()
        };
        let (source, _api) = paged_source(api, &[]);
        let err = source.load("whip", 0, 20, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, SearchError::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_page_error() {
        let api = FakeApi {
            hits: vec![hit("1", 0, Some("a"))],
            search_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let (source, _api) = paged_source(api, &[]);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = source.load("whip", 0, 20, &token).await.unwrap_err();
        assert_eq!(err, SearchError::Cancelled);
    }

    fn page(n: usize, prev: Option<u32>, next: Option<u32>) -> ResultPage {
        let items = (0..n)
            .map(|i| crate::interface::ResultItem {
                id: i.to_string(),
                title: String::new(),
                snippet: String::new(),
                thumbnail_url: None,
                is_full_text_match: false,
                is_offline_available: false,
            })
            .collect();
        ResultPage { items, prev_key: prev, next_key: next }
    }

    #[test]
    fn test_refresh_key_resumes_at_anchor_page() {
        let state = PagingState {
            pages: vec![page(20, None, Some(20)), page(20, Some(0), Some(40)), page(20, Some(20), Some(60))],
            anchor_position: Some(45),
            page_size: 20,
        };
        assert_eq!(refresh_key(&state), Some(40));

        let state = PagingState { anchor_position: Some(3), ..state };
        assert_eq!(refresh_key(&state), Some(0));
    }

    #[test]
    fn test_refresh_key_for_unaligned_offsets() {
        // Pages loaded from offset 5
        let state = PagingState {
            pages: vec![page(20, Some(0), Some(25)), page(20, Some(5), Some(45)), page(3, Some(25), None)],
            anchor_position: Some(2),
            page_size: 20,
        };
        assert_eq!(refresh_key(&state), Some(5));

        let state = PagingState { anchor_position: Some(30), ..state };
        assert_eq!(refresh_key(&state), Some(25));

        // Last page: only the previous cursor is known
        let state = PagingState { anchor_position: Some(41), ..state };
        assert_eq!(refresh_key(&state), Some(45));
    }

    #[test]
    fn test_refresh_key_without_anchor_restarts() {
        let state = PagingState { pages: vec![page(20, Some(20), Some(60))], anchor_position: None, page_size: 20 };
        assert_eq!(refresh_key(&state), None);
        assert_eq!(refresh_key(&PagingState { anchor_position: Some(0), ..Default::default() }), None);
    }
}
