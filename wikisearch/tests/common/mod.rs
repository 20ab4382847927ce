//! Fakes and helpers shared by the session tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;

use wikisearch::database::Database;
use wikisearch::indexer::Indexer;
use wikisearch::models::{AssembledPage, AssetProgress, RemoteHit, RemoteSearchResponse, RenderOptions, Theme};
use wikisearch::remote::{RemoteError, RemoteResult};
use wikisearch::sources::{AssemblyError, ContentAssembler, RemoteSearchApi};
use wikisearch::{DisplayState, SavedPage, SearchConfig, SearchSession};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn hit(id: &str, title: &str, index: u32, snippet: Option<&str>) -> RemoteHit {
    RemoteHit {
        id: id.to_string(),
        title: title.to_string(),
        snippet: snippet.map(str::to_string),
        relevance_index: index,
        thumbnail_url: None,
    }
}

/// Scripted wiki API: per-query hit lists, optional per-query delay,
/// and a queue of failures returned before any hits.
#[derive(Default)]
pub struct FakeApi {
    pub hits: Mutex<HashMap<String, Vec<RemoteHit>>>,
    pub extracts: Mutex<HashMap<String, String>>,
    pub delays: Mutex<HashMap<String, Duration>>,
    pub failures: Mutex<Vec<RemoteError>>,
    pub searches: Mutex<Vec<(String, u32)>>,
    pub extract_calls: AtomicUsize,
}

impl FakeApi {
    pub fn with_hits(query: &str, hits: Vec<RemoteHit>) -> Arc<Self> {
        let api = Arc::new(Self::default());
        api.hits.lock().insert(query.to_string(), hits);
        api
    }

    pub fn add_hits(&self, query: &str, hits: Vec<RemoteHit>) {
        self.hits.lock().insert(query.to_string(), hits);
    }

    pub fn search_count(&self, query: &str) -> usize {
        self.searches.lock().iter().filter(|(q, _)| q == query).count()
    }
}

#[async_trait]
impl RemoteSearchApi for FakeApi {
    async fn search(&self, query: &str, limit: u32, offset: u32) -> RemoteResult<RemoteSearchResponse> {
        self.searches.lock().push((query.to_string(), offset));
        let delay = self.delays.lock().get(query).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().pop() {
            return Err(err);
        }
        let all = self.hits.lock().get(query).cloned().unwrap_or_default();
        let items = all.into_iter().skip(offset as usize).take(limit as usize).collect();
        Ok(RemoteSearchResponse { items })
    }

    async fn extract(&self, ids: &[String]) -> RemoteResult<HashMap<String, String>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        let extracts = self.extracts.lock();
        Ok(ids
            .iter()
            .filter_map(|id| extracts.get(id).map(|e| (id.clone(), e.clone())))
            .collect())
    }
}

/// Assembler that finishes each download after `delay`
pub struct FakeAssembler {
    pub delay: Duration,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeAssembler {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay, downloads: Mutex::new(Vec::new()) })
    }
}

#[async_trait]
impl ContentAssembler for FakeAssembler {
    fn download_priority_assets(
        &self,
        page_id: &str,
        url: &str,
    ) -> BoxStream<'static, Result<AssetProgress, AssemblyError>> {
        self.downloads.lock().push(page_id.to_string());
        let delay = self.delay;
        let page = AssembledPage {
            page_id: page_id.to_string(),
            title: format!("Page {}", page_id),
            html_body: "<p>Body</p>".to_string(),
            canonical_url: url.to_string(),
            revision_id: 1001,
        };
        futures::stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok(AssetProgress::Complete(page))
        })
        .boxed()
    }

    async fn build_document(
        &self,
        title: &str,
        html_body: &str,
        _theme: Theme,
        _options: &RenderOptions,
    ) -> Result<String, AssemblyError> {
        Ok(format!("<h1>{}</h1>{}", title, html_body))
    }
}

pub struct Harness {
    pub session: SearchSession,
    pub api: Arc<FakeApi>,
    pub assembler: Arc<FakeAssembler>,
    _temp: TempDir,
}

pub fn test_config() -> SearchConfig {
    SearchConfig::default()
        .with_debounce(Duration::from_millis(20))
        .with_search_timeout(Duration::from_secs(2))
}

pub fn harness(api: Arc<FakeApi>, config: SearchConfig, online: bool) -> Harness {
    harness_with_assembler(api, FakeAssembler::new(Duration::from_millis(10)), config, online)
}

pub fn harness_with_assembler(
    api: Arc<FakeApi>,
    assembler: Arc<FakeAssembler>,
    config: SearchConfig,
    online: bool,
) -> Harness {
    let temp = TempDir::new().unwrap();
    let db = Database::open(temp.path().join("offline.db")).unwrap();
    let indexer = Indexer::new(&temp.path().join("offline_index_v1")).unwrap();
    let session = SearchSession::with_library(
        config,
        api.clone(),
        assembler.clone(),
        Arc::new(db),
        Arc::new(indexer),
        online,
    );
    Harness { session, api, assembler, _temp: temp }
}

pub async fn save(session: &SearchSession, id: &str, title: &str, body: &str) {
    let url = format!("https://oldschool.runescape.wiki/w/{}", title.replace(' ', "_"));
    session
        .save_offline_page(SavedPage::new(id, title, url, 1), body.to_string())
        .await
        .unwrap();
}

/// Wait for a display state matching `predicate`, failing the test after `WAIT`.
pub async fn wait_for(session: &SearchSession, predicate: impl FnMut(&DisplayState) -> bool) -> DisplayState {
    tokio::time::timeout(WAIT, session.wait_for(predicate))
        .await
        .expect("timed out waiting for display state")
}

pub fn ids(state: &DisplayState) -> Vec<&str> {
    state.items().iter().map(|i| i.id.as_str()).collect()
}
