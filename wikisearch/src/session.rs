//! SearchSession - Main API for the Android app
//!
//! Owns the Query Coordinator, both result sources, the Connectivity Gate
//! and the prefetch slot, and exposes them over UniFFI.
//!
//! Driver Architecture:
//! A single driver task consumes debounced query events, connectivity flips
//! and fetch outcomes, and is the only writer of the display state. Every
//! fetch is tagged with the generation of the query that started it; an
//! outcome for any other generation is dropped, so superseded results never
//! reach the screen. The driver is aborted when the session is dropped.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::connectivity::{ConnectivityGate, ConnectivitySignal, StreamResults};
use crate::database::Database;
use crate::indexer::Indexer;
use crate::interface::{DisplayState, PrefetchedPage, ResultItem, ResultPage, ResultStream, ResultsView, SearchError};
use crate::local::LocalSearch;
use crate::models::SavedPage;
use crate::paging::RemotePagedSource;
use crate::prefetch::{PrefetchCache, PrefetchState};
use crate::query::{QueryCoordinator, QueryEvent, QuerySnapshot, QuerySubscription};
use crate::remote::WikiApiClient;
use crate::sources::{ContentAssembler, FullTextIndex, MetadataStore, RemoteSearchApi};

/// Global fallback Tokio runtime for when the session is used outside any runtime context.
/// Used by UniFFI which doesn't provide a tokio runtime.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

/// Uses the current runtime if available, otherwise the global fallback
fn runtime_handle() -> Handle {
    Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}

/// RAII guard that cancels a token when dropped.
/// When Kotlin cancels a coroutine, UniFFI drops the Future, which drops this guard.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Collaborators a session reads from.
pub struct Sources {
    pub api: Arc<dyn RemoteSearchApi>,
    pub store: Arc<dyn MetadataStore>,
    pub index: Arc<dyn FullTextIndex>,
    pub assembler: Arc<dyn ContentAssembler>,
}

/// The writable side of the offline library: metadata rows plus indexed bodies.
#[derive(Clone)]
struct OfflineLibrary {
    db: Arc<Database>,
    indexer: Arc<Indexer>,
}

impl OfflineLibrary {
    fn save(&self, page: &SavedPage, body: &str) -> Result<(), SearchError> {
        if page.page_id.trim().is_empty() {
            return Err(SearchError::InvalidInput("page id is empty".to_string()));
        }
        self.db.upsert_page(page)?;
        self.indexer.add_document(&page.page_id, &page.title, body)?;
        self.indexer.commit()?;
        Ok(())
    }

    fn remove(&self, page_id: &str) -> Result<(), SearchError> {
        self.db.delete_page(page_id)?;
        self.indexer.delete_document(page_id)?;
        self.indexer.commit()?;
        Ok(())
    }
}

/// Search screen state holder
#[derive(uniffi::Object)]
pub struct SearchSession {
    config: SearchConfig,
    coordinator: Arc<QueryCoordinator>,
    paging: Arc<RemotePagedSource>,
    prefetch: Arc<PrefetchCache>,
    display: Arc<watch::Sender<DisplayState>>,
    connectivity: ConnectivitySignal,
    library: Option<OfflineLibrary>,
    runtime: Handle,
    _driver: AbortOnDropHandle<()>,
}

// Internal implementation (not exported via FFI)
impl SearchSession {
    /// Session over arbitrary collaborators. Offline writes are unavailable.
    pub fn with_sources(config: SearchConfig, sources: Sources, online: bool) -> Self {
        Self::build(config, sources, None, online)
    }

    /// Session whose offline library is the given database and index.
    pub fn with_library(
        config: SearchConfig,
        api: Arc<dyn RemoteSearchApi>,
        assembler: Arc<dyn ContentAssembler>,
        db: Arc<Database>,
        indexer: Arc<Indexer>,
        online: bool,
    ) -> Self {
        let sources = Sources {
            api,
            store: db.clone(),
            index: indexer.clone(),
            assembler,
        };
        Self::build(config, sources, Some(OfflineLibrary { db, indexer }), online)
    }

    fn build(config: SearchConfig, sources: Sources, library: Option<OfflineLibrary>, online: bool) -> Self {
        let runtime = runtime_handle();
        let coordinator = Arc::new(QueryCoordinator::new());
        let connectivity = ConnectivitySignal::new(online);
        let display = Arc::new(watch::Sender::new(DisplayState::initial(online)));

        let paging = Arc::new(RemotePagedSource::new(sources.api, Arc::clone(&sources.store), &config));
        let local = Arc::new(LocalSearch::new(sources.store, sources.index, config.local_result_limit));
        let prefetch = Arc::new(PrefetchCache::new(sources.assembler, &config, runtime.clone()));

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            paging: Arc::clone(&paging),
            local,
            prefetch: Arc::clone(&prefetch),
            display: Arc::clone(&display),
            outcomes: outcomes_tx,
            page_size: config.page_size,
            prefetch_enabled: config.prefetch_enabled,
            query: coordinator.current(),
            results: StreamResults::default(),
            settled: false,
            online_requested: false,
            online,
        };
        let queries = coordinator.subscribe(config.debounce());
        let handle = runtime.spawn(driver.run(queries, connectivity.subscribe(), outcomes_rx));

        Self {
            config,
            coordinator,
            paging,
            prefetch,
            display,
            connectivity,
            library,
            runtime,
            _driver: AbortOnDropHandle::new(handle),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.display.subscribe()
    }

    /// Wait until the display state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&DisplayState) -> bool) -> DisplayState {
        let mut rx = self.display.subscribe();
        let found = rx.wait_for(predicate).await.map(|state| state.clone());
        match found {
            Ok(state) => state,
            // The sender lives as long as `self`
            Err(_) => self.display_state(),
        }
    }

    pub fn prefetch_state(&self) -> PrefetchState {
        self.prefetch.state()
    }

    fn library(&self) -> Result<OfflineLibrary, SearchError> {
        self.library
            .clone()
            .ok_or_else(|| SearchError::InvalidInput("session has no writable offline library".to_string()))
    }
}

// FFI-exported constructor (must be in standalone impl block)
#[uniffi::export]
impl SearchSession {
    /// Open a session with the offline library at `db_path`.
    ///
    /// `config_json` overrides [`SearchConfig`] defaults field by field.
    #[uniffi::constructor]
    pub fn new(db_path: String, config_json: Option<String>, online: bool) -> Result<Self, SearchError> {
        let config = match config_json {
            Some(json) => SearchConfig::from_json(&json).map_err(|e| SearchError::InvalidInput(e.to_string()))?,
            None => SearchConfig::default(),
        };

        let path = PathBuf::from(db_path);
        let db = Database::open(&path)?;

        // Index directory next to the database
        let index_path = path
            .parent()
            .map(|p| p.join("offline_index_v1"))
            .unwrap_or_else(|| PathBuf::from("offline_index_v1"));
        let indexer = Indexer::new(&index_path)?;

        let client = Arc::new(WikiApiClient::new(&config)?);
        info!(db = %path.display(), api = %config.api_url, online, "Opened search session");

        Ok(Self::with_library(config, client.clone(), client, Arc::new(db), Arc::new(indexer), online))
    }
}

#[uniffi::export]
impl SearchSession {
    /// Store a new query. Returns false if the trimmed text did not change.
    pub fn submit_query(&self, query: String) -> bool {
        let changed = self.coordinator.submit(&query);
        if changed {
            self.prefetch.invalidate(self.coordinator.current().generation);
        }
        changed
    }

    pub fn current_query(&self) -> String {
        self.coordinator.current().text
    }

    /// Re-run the current query under a new generation.
    pub fn retry(&self) {
        let snapshot = self.coordinator.resubmit();
        self.prefetch.invalidate(snapshot.generation);
        debug!(query = %snapshot.text, generation = snapshot.generation, "Retrying query");
    }

    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn display_state(&self) -> DisplayState {
        self.display.borrow().clone()
    }

    /// Resolves with the first display state different from `previous`.
    pub async fn next_display_state(&self, previous: DisplayState) -> DisplayState {
        self.wait_for(|state| *state != previous).await
    }

    /// Load the online page starting at `key` for the current query.
    ///
    /// Returns `Err(Cancelled)` if the query changes before the page is ready.
    pub async fn load_page(&self, key: u32) -> Result<ResultPage, SearchError> {
        let snapshot = self.coordinator.current();
        if snapshot.is_blank() {
            return Ok(ResultPage::empty());
        }

        // Dropping this call cancels only this load, not the whole query
        let token = snapshot.token.child_token();
        let _guard = DropGuard::new(token.clone());

        let paging = Arc::clone(&self.paging);
        let text = snapshot.text.clone();
        let limit = self.config.page_size;
        let handle = self.runtime.spawn(async move { paging.load(&text, key, limit, &token).await });

        let page = match handle.await {
            Ok(result) => result?,
            Err(_join_error) => return Err(SearchError::Cancelled),
        };
        if !self.coordinator.is_current(snapshot.generation) {
            return Err(SearchError::Cancelled);
        }
        Ok(page)
    }

    /// Prefetch the top online result of the displayed state. Returns false
    /// when nothing was started: offline, disabled, no results, or the item
    /// was already tried for this query.
    pub fn prefetch_top_result(&self) -> bool {
        if !self.config.prefetch_enabled || !ConnectivityGate::allows_prefetch(self.connectivity.is_online()) {
            return false;
        }
        let state = self.display_state();
        if !self.coordinator.is_current(state.generation) {
            return false;
        }
        match top_online_item(&state) {
            Some(item) => self.prefetch.prefetch(item, state.generation),
            None => false,
        }
    }

    /// Take the prefetched page for `page_id`. A hit is returned once.
    pub fn take_cached_page(&self, page_id: String) -> Option<PrefetchedPage> {
        self.prefetch.take(&page_id)
    }

    /// Save a page for offline reading, indexing `body` for full-text search.
    pub async fn save_offline_page(&self, page: SavedPage, body: String) -> Result<(), SearchError> {
        let library = self.library()?;
        let page_id = page.page_id.clone();
        let handle = self.runtime.spawn_blocking(move || library.save(&page, &body));
        match handle.await {
            Ok(result) => {
                result?;
                info!(page_id = %page_id, "Saved page for offline reading");
                Ok(())
            }
            Err(_join_error) => Err(SearchError::Cancelled),
        }
    }

    pub async fn remove_offline_page(&self, page_id: String) -> Result<(), SearchError> {
        let library = self.library()?;
        let id = page_id.clone();
        let handle = self.runtime.spawn_blocking(move || library.remove(&id));
        match handle.await {
            Ok(result) => {
                result?;
                info!(page_id = %page_id, "Removed offline page");
                Ok(())
            }
            Err(_join_error) => Err(SearchError::Cancelled),
        }
    }

    pub fn offline_page_count(&self) -> Result<u64, SearchError> {
        Ok(self.library()?.db.count_pages()?)
    }
}

fn top_online_item(state: &DisplayState) -> Option<&ResultItem> {
    match &state.view {
        ResultsView::Populated { stream: ResultStream::Online { page } } => page.items.first(),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

enum FetchOutcome {
    Online { generation: u64, result: Result<ResultPage, SearchError> },
    Offline { generation: u64, result: Result<Vec<ResultItem>, SearchError> },
}

impl FetchOutcome {
    fn generation(&self) -> u64 {
        match self {
            FetchOutcome::Online { generation, .. } | FetchOutcome::Offline { generation, .. } => *generation,
        }
    }
}

struct Driver {
    paging: Arc<RemotePagedSource>,
    local: Arc<LocalSearch>,
    prefetch: Arc<PrefetchCache>,
    display: Arc<watch::Sender<DisplayState>>,
    outcomes: mpsc::UnboundedSender<FetchOutcome>,
    page_size: u32,
    prefetch_enabled: bool,
    /// Query the driver currently renders for
    query: QuerySnapshot,
    results: StreamResults,
    /// The debounce window has passed for `query`
    settled: bool,
    online_requested: bool,
    online: bool,
}

impl Driver {
    async fn run(
        mut self,
        mut queries: QuerySubscription,
        mut connectivity: watch::Receiver<bool>,
        mut outcomes: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        let mut connectivity_open = true;
        loop {
            tokio::select! {
                event = queries.next() => match event {
                    Some(QueryEvent::Changed(snapshot)) => self.on_changed(snapshot),
                    Some(QueryEvent::Settled(snapshot)) => self.on_settled(snapshot),
                    None => break,
                },
                changed = connectivity.changed(), if connectivity_open => match changed {
                    Ok(()) => {
                        let online = *connectivity.borrow_and_update();
                        self.on_connectivity(online);
                    }
                    Err(_) => connectivity_open = false,
                },
                Some(outcome) = outcomes.recv() => self.on_outcome(outcome),
            }
        }
        debug!("Search driver stopped");
    }

    fn on_changed(&mut self, snapshot: QuerySnapshot) {
        debug!(query = %snapshot.text, generation = snapshot.generation, "Query changed");
        self.query = snapshot;
        self.results = StreamResults::default();
        self.settled = false;
        self.online_requested = false;
        self.publish();
    }

    fn on_settled(&mut self, snapshot: QuerySnapshot) {
        // A newer change is still queued; its own settle will follow
        if snapshot.generation != self.query.generation {
            return;
        }
        info!(query = %self.query.text, generation = self.query.generation, online = self.online, "Query settled");
        self.settled = true;
        self.spawn_offline();
        if self.online {
            self.spawn_online();
        }
    }

    fn on_connectivity(&mut self, online: bool) {
        info!(online, query = %self.query.text, "Connectivity changed");
        self.online = online;
        let needs_online = !self.online_requested || matches!(self.results.online, Some(Err(_)));
        if online && self.settled && !self.query.is_blank() && needs_online {
            self.results.online = None;
            self.spawn_online();
        }
        self.publish();
    }

    fn on_outcome(&mut self, outcome: FetchOutcome) {
        let generation = outcome.generation();
        if generation != self.query.generation || self.query.token.is_cancelled() {
            debug!(generation, current = self.query.generation, "Discarding stale result");
            return;
        }

        match outcome {
            FetchOutcome::Online { result: Err(SearchError::Cancelled), .. }
            | FetchOutcome::Offline { result: Err(SearchError::Cancelled), .. } => return,
            FetchOutcome::Online { result, .. } => {
                if let Err(e) = &result {
                    warn!(query = %self.query.text, generation, error = %e, "Online search failed");
                }
                self.results.online = Some(result);
            }
            FetchOutcome::Offline { result, .. } => {
                self.results.offline = Some(result.unwrap_or_default());
            }
        }
        self.publish();
    }

    fn spawn_online(&mut self) {
        self.online_requested = true;
        let paging = Arc::clone(&self.paging);
        let outcomes = self.outcomes.clone();
        let query = self.query.clone();
        let limit = self.page_size;
        tokio::spawn(async move {
            let result = paging.load(&query.text, 0, limit, &query.token).await;
            let _ = outcomes.send(FetchOutcome::Online { generation: query.generation, result });
        });
    }

    fn spawn_offline(&self) {
        let local = Arc::clone(&self.local);
        let outcomes = self.outcomes.clone();
        let query = self.query.clone();
        tokio::spawn(async move {
            let result = local.search_merged(&query.text, &query.token).await;
            let _ = outcomes.send(FetchOutcome::Offline { generation: query.generation, result });
        });
    }

    fn publish(&self) {
        let state = ConnectivityGate::decide(self.online, &self.query.text, self.query.generation, &self.results);
        let top = top_online_item(&state).cloned();

        self.display.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });

        if self.query.token.is_cancelled() {
            return;
        }
        if let Some(item) = top {
            if self.prefetch_enabled && ConnectivityGate::allows_prefetch(self.online) {
                self.prefetch.prefetch(&item, self.query.generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetProgress, RemoteSearchResponse, RenderOptions, Theme, TitleRow, FullTextHit};
    use crate::database::DatabaseResult;
    use crate::indexer::IndexerResult;
    use crate::remote::RemoteResult;
    use crate::sources::AssemblyError;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::collections::HashMap;

    struct EmptyApi;

    #[async_trait]
    impl RemoteSearchApi for EmptyApi {
        async fn search(&self, _query: &str, _limit: u32, _offset: u32) -> RemoteResult<RemoteSearchResponse> {
            Ok(RemoteSearchResponse::default())
        }

        async fn extract(&self, _ids: &[String]) -> RemoteResult<HashMap<String, String>> {
            Ok(HashMap::new())
        }
    }

    struct EmptyStore;

    impl MetadataStore for EmptyStore {
        fn get_by_ids(&self, _ids: &[String]) -> DatabaseResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn search_title_like(&self, _pattern: &str, _limit: usize) -> DatabaseResult<Vec<TitleRow>> {
            Ok(Vec::new())
        }
    }

    impl FullTextIndex for EmptyStore {
        fn search(&self, _query: &str, _limit: usize) -> IndexerResult<Vec<FullTextHit>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ContentAssembler for EmptyStore {
        fn download_priority_assets(
            &self,
            _page_id: &str,
            _url: &str,
        ) -> BoxStream<'static, Result<AssetProgress, AssemblyError>> {
            Box::pin(futures::stream::empty())
        }

        async fn build_document(
            &self,
            _title: &str,
            _html_body: &str,
            _theme: Theme,
            _options: &RenderOptions,
        ) -> Result<String, AssemblyError> {
            Err(AssemblyError::Render("unused".into()))
        }
    }

    fn session(online: bool) -> SearchSession {
        let sources = Sources {
            api: Arc::new(EmptyApi),
            store: Arc::new(EmptyStore),
            index: Arc::new(EmptyStore),
            assembler: Arc::new(EmptyStore),
        };
        SearchSession::with_sources(SearchConfig::default(), sources, online)
    }

    #[tokio::test]
    async fn test_initial_state_is_prompt() {
        let online = session(true);
        assert_eq!(online.display_state(), DisplayState::initial(true));
        assert_eq!(online.current_query(), "");

        let offline = session(false);
        assert_eq!(offline.display_state().banner, crate::interface::OfflineBanner::Offline);
    }

    #[tokio::test]
    async fn test_submit_reports_change() {
        let session = session(true);
        assert!(session.submit_query(" whip ".into()));
        assert!(!session.submit_query("whip".into()));
        assert_eq!(session.current_query(), "whip");
    }

    #[tokio::test]
    async fn test_writes_without_library_are_rejected() {
        let session = session(true);
        let page = SavedPage::new("7", "Abyssal whip", "https://oldschool.runescape.wiki/w/Abyssal_whip", 1);
        let err = session.save_offline_page(page, "body".into()).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
        assert!(session.offline_page_count().is_err());
    }

    #[tokio::test]
    async fn test_blank_load_page_is_empty() {
        let session = session(true);
        assert_eq!(session.load_page(20).await.unwrap(), ResultPage::empty());
    }

    #[tokio::test]
    async fn test_prefetch_not_started_without_results() {
        let session = session(true);
        assert!(!session.prefetch_top_result());
        assert_eq!(session.prefetch_state(), PrefetchState::Idle);
    }
}
