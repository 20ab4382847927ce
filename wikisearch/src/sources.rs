//! Collaborator seams.
//!
//! The search core only talks to the network, local storage and the content
//! assembly pipeline through these traits. Production implementations live in
//! `remote`, `database` and `indexer`; content assembly is provided by the app.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::database::DatabaseResult;
use crate::indexer::IndexerResult;
use crate::models::{AssetProgress, FullTextHit, RemoteSearchResponse, RenderOptions, Theme, TitleRow};
use crate::remote::RemoteResult;

/// Remote full-text search and content-extract endpoints.
#[async_trait]
pub trait RemoteSearchApi: Send + Sync {
    async fn search(&self, query: &str, limit: u32, offset: u32) -> RemoteResult<RemoteSearchResponse>;

    /// Plain-text extracts keyed by page id. Ids with no extract are absent.
    async fn extract(&self, ids: &[String]) -> RemoteResult<HashMap<String, String>>;
}

/// Saved-page metadata. Blocking; callers run it off the async threads.
pub trait MetadataStore: Send + Sync {
    /// Ids among `ids` that are saved locally.
    fn get_by_ids(&self, ids: &[String]) -> DatabaseResult<Vec<String>>;

    /// Case-insensitive substring match on saved titles.
    fn search_title_like(&self, pattern: &str, limit: usize) -> DatabaseResult<Vec<TitleRow>>;
}

/// Full-text index over saved page bodies. Blocking.
pub trait FullTextIndex: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> IndexerResult<Vec<FullTextHit>>;
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("Download failed: {0}")]
    Download(String),
    #[error("Download finished without a page payload")]
    Incomplete,
    #[error("Render failed: {0}")]
    Render(String),
}

/// Turns a page id into renderable content.
#[async_trait]
pub trait ContentAssembler: Send + Sync {
    fn download_priority_assets(
        &self,
        page_id: &str,
        url: &str,
    ) -> BoxStream<'static, Result<AssetProgress, AssemblyError>>;

    async fn build_document(
        &self,
        title: &str,
        html_body: &str,
        theme: Theme,
        options: &RenderOptions,
    ) -> Result<String, AssemblyError>;
}
