//! Preemptive Prefetch Cache
//!
//! One slot, one job. The slot moves `Idle -> Fetching -> Cached` and back to
//! `Idle` on failure, on invalidation or when the cached page is taken. A job
//! id is stamped on every fetch so a finishing task can tell whether it still
//! owns the slot; a superseded job never writes.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::SearchConfig;
use crate::interface::{PrefetchedPage, ResultItem};
use crate::models::{AssetProgress, RenderOptions, Theme};
use crate::remote::page_url;
use crate::sources::{AssemblyError, ContentAssembler};

enum Slot {
    Idle,
    Fetching {
        page_id: String,
        job: u64,
        token: CancellationToken,
    },
    Cached(PrefetchedPage),
}

struct Inner {
    slot: Slot,
    /// `(generation, page_id)` of the last prefetch started, so each top
    /// result is tried once per query.
    attempted: Option<(u64, String)>,
    /// Newest query generation the slot was invalidated for. Prefetches for
    /// older generations are refused.
    current_generation: u64,
    next_job: u64,
}

impl Inner {
    fn cancel_in_flight(&mut self) {
        if let Slot::Fetching { token, .. } = &self.slot {
            token.cancel();
        }
    }
}

/// Observable summary of the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchState {
    Idle,
    Fetching { page_id: String },
    Cached { page_id: String },
}

pub struct PrefetchCache {
    inner: Arc<Mutex<Inner>>,
    assembler: Arc<dyn ContentAssembler>,
    article_base_url: String,
    theme: Theme,
    options: RenderOptions,
    runtime: Handle,
}

impl PrefetchCache {
    pub fn new(assembler: Arc<dyn ContentAssembler>, config: &SearchConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner { slot: Slot::Idle, attempted: None, current_generation: 0, next_job: 0 })),
            assembler,
            article_base_url: config.article_base_url.clone(),
            theme: config.render_theme,
            options: config.render_options(),
            runtime,
        }
    }

    /// Start fetching `item` for query `generation`, cancelling any previous
    /// job. Returns false when this item was already tried for the generation
    /// or the generation has been superseded.
    pub fn prefetch(&self, item: &ResultItem, generation: u64) -> bool {
        let Some(url) = page_url(&self.article_base_url, &item.title) else {
            debug!(page_id = %item.id, title = %item.title, "No article URL, skipping prefetch");
            return false;
        };

        let mut inner = self.inner.lock();
        if generation < inner.current_generation {
            debug!(page_id = %item.id, generation, current = inner.current_generation, "Prefetch for superseded query refused");
            return false;
        }
        let key = (generation, item.id.clone());
        if inner.attempted.as_ref() == Some(&key) {
            return false;
        }

        inner.cancel_in_flight();
        inner.next_job += 1;
        let job = inner.next_job;
        let token = CancellationToken::new();
        inner.slot = Slot::Fetching { page_id: item.id.clone(), job, token: token.clone() };
        inner.attempted = Some(key);
        drop(inner);

        debug!(page_id = %item.id, generation, job, "Prefetch started");

        let shared = Arc::clone(&self.inner);
        let assembler = Arc::clone(&self.assembler);
        let page_id = item.id.clone();
        let theme = self.theme;
        let options = self.options.clone();

        self.runtime.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                outcome = assemble(assembler.as_ref(), &page_id, &url, theme, &options) => outcome,
            };

            let mut inner = shared.lock();
            let owns_slot = matches!(&inner.slot, Slot::Fetching { job: current, .. } if *current == job);
            if !owns_slot || token.is_cancelled() {
                return;
            }
            inner.slot = match outcome {
                Ok(page) => {
                    debug!(page_id = %page_id, job, "Prefetch cached");
                    Slot::Cached(page)
                }
                Err(e) => {
                    debug!(page_id = %page_id, job, error = %e, "Prefetch failed");
                    Slot::Idle
                }
            };
        });

        true
    }

    /// Drop everything for a new query `generation`: cancel the in-flight job,
    /// empty the slot and refuse later prefetches for older generations.
    pub fn invalidate(&self, generation: u64) {
        let mut inner = self.inner.lock();
        inner.cancel_in_flight();
        inner.slot = Slot::Idle;
        inner.attempted = None;
        inner.current_generation = inner.current_generation.max(generation);
    }

    /// Navigation to `page_id`. A cached page is consumed whichever page is
    /// opened, and returned only when it is the one asked for.
    pub fn take(&self, page_id: &str) -> Option<PrefetchedPage> {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Cached(_)) {
            return None;
        }
        match std::mem::replace(&mut inner.slot, Slot::Idle) {
            Slot::Cached(page) if page.page_id == page_id => Some(page),
            Slot::Cached(page) => {
                debug!(cached = %page.page_id, opened = page_id, "Prefetched page evicted by navigation");
                None
            }
            _ => None,
        }
    }

    pub fn state(&self) -> PrefetchState {
        match &self.inner.lock().slot {
            Slot::Idle => PrefetchState::Idle,
            Slot::Fetching { page_id, .. } => PrefetchState::Fetching { page_id: page_id.clone() },
            Slot::Cached(page) => PrefetchState::Cached { page_id: page.page_id.clone() },
        }
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        self.inner.lock().cancel_in_flight();
    }
}

/// Download priority assets, then render. The stream must end with a
/// `Complete` payload.
async fn assemble(
    assembler: &dyn ContentAssembler,
    page_id: &str,
    url: &str,
    theme: Theme,
    options: &RenderOptions,
) -> Result<PrefetchedPage, AssemblyError> {
    let mut progress = assembler.download_priority_assets(page_id, url);
    let mut assembled = None;
    while let Some(step) = progress.next().await {
        match step? {
            AssetProgress::Downloading { completed, total } => {
                trace!(page_id, completed, total, "Prefetch progress");
            }
            AssetProgress::Complete(page) => {
                assembled = Some(page);
                break;
            }
        }
    }
    let page = assembled.ok_or(AssemblyError::Incomplete)?;

    let rendered_content = assembler.build_document(&page.title, &page.html_body, theme, options).await?;

    Ok(PrefetchedPage {
        // Keyed by the id that was asked for, which is what `take` is called with
        page_id: page_id.to_string(),
        rendered_content,
        canonical_url: page.canonical_url,
        revision_id: page.revision_id,
        fetched_at_timestamp: chrono::Utc::now().timestamp(),
    })
}
