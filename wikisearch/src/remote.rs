//! MediaWiki API client for remote search and content extracts

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::SearchConfig;
use crate::models::{AssembledPage, AssetProgress, RemoteHit, RemoteSearchResponse, RenderOptions, Theme};
use crate::sources::{AssemblyError, ContentAssembler, RemoteSearchApi};
use futures::stream::{BoxStream, StreamExt};

/// Extracts requested per page for the snippet fallback.
const EXTRACT_SENTENCES: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("API error {code}: {info}")]
    Api { code: String, info: String },
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Malformed(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Status(status.as_u16())
        } else {
            RemoteError::Transport(e.to_string())
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// ─────────────────────────────────────────────────────────────────────────────
// Wire format (formatversion=2)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    query: Option<ApiQuery>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct ApiQuery {
    #[serde(default)]
    pages: Vec<ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    pageid: Option<u64>,
    #[serde(default)]
    title: String,
    /// Search rank when pages come from `generator=search`.
    index: Option<u32>,
    #[serde(default)]
    extract: Option<String>,
    #[serde(default)]
    thumbnail: Option<ApiThumbnail>,
    #[serde(default)]
    missing: bool,
}

#[derive(Debug, Deserialize)]
struct ApiThumbnail {
    source: String,
}

fn parse_envelope(body: &str) -> RemoteResult<Vec<ApiPage>> {
    let envelope: ApiEnvelope =
        serde_json::from_str(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    if let Some(err) = envelope.error {
        return Err(RemoteError::Api { code: err.code, info: err.info });
    }
    // No `query` key means no results
    Ok(envelope.query.map(|q| q.pages).unwrap_or_default())
}

/// Parse a `generator=search` response body.
pub(crate) fn parse_search_response(body: &str) -> RemoteResult<RemoteSearchResponse> {
    let pages = parse_envelope(body)?;
    let mut items = Vec::with_capacity(pages.len());
    for page in pages.into_iter().filter(|p| !p.missing) {
        let id = page
            .pageid
            .ok_or_else(|| RemoteError::Malformed(format!("search hit '{}' has no pageid", page.title)))?;
        let relevance_index = page
            .index
            .ok_or_else(|| RemoteError::Malformed(format!("search hit {id} has no index")))?;
        items.push(RemoteHit {
            id: id.to_string(),
            title: page.title,
            snippet: page.extract.filter(|s| !s.trim().is_empty()),
            relevance_index,
            thumbnail_url: page.thumbnail.map(|t| t.source),
        });
    }
    Ok(RemoteSearchResponse { items })
}

#[derive(Debug, Deserialize)]
struct ParseEnvelope {
    #[serde(default)]
    parse: Option<ParsedArticle>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ParsedArticle {
    title: String,
    pageid: u64,
    #[serde(default)]
    revid: i64,
    #[serde(default)]
    text: String,
}

/// Parse an `action=parse` response body into an assembled article.
pub(crate) fn parse_article_response(body: &str, canonical_url: &str) -> RemoteResult<AssembledPage> {
    let envelope: ParseEnvelope =
        serde_json::from_str(body).map_err(|e| RemoteError::Malformed(e.to_string()))?;
    if let Some(err) = envelope.error {
        return Err(RemoteError::Api { code: err.code, info: err.info });
    }
    let article = envelope
        .parse
        .ok_or_else(|| RemoteError::Malformed("parse response has no `parse` key".to_string()))?;
    Ok(AssembledPage {
        page_id: article.pageid.to_string(),
        title: article.title,
        html_body: article.text,
        canonical_url: canonical_url.to_string(),
        revision_id: article.revid,
    })
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Wrap an article body in a standalone document for the reader view.
pub fn render_document(title: &str, html_body: &str, theme: Theme, options: &RenderOptions) -> String {
    let theme_class = match theme {
        Theme::Light => "theme-light",
        Theme::Dark => "theme-dark",
    };
    let collapsed = if options.collapse_sections { " data-collapse-sections" } else { "" };
    let title = escape_html(title);
    format!(
        "<!DOCTYPE html><html class=\"{theme_class}\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>{title}</title></head><body{collapsed}><h1>{title}</h1>{html_body}</body></html>"
    )
}

/// Parse a `prop=extracts` response body into id → extract.
pub(crate) fn parse_extract_response(body: &str) -> RemoteResult<HashMap<String, String>> {
    let pages = parse_envelope(body)?;
    Ok(pages
        .into_iter()
        .filter_map(|p| {
            let id = p.pageid?;
            let extract = p.extract.filter(|s| !s.trim().is_empty())?;
            Some((id.to_string(), extract))
        })
        .collect())
}

/// URL of an article, `base` joined with the title in wiki form.
pub fn page_url(base: &str, title: &str) -> Option<String> {
    let wiki_title = title.trim().replace(' ', "_").replace('?', "%3F");
    // "./" keeps namespaced titles like "Update:Foo" from parsing as a scheme
    url::Url::parse(base)
        .ok()?
        .join(&format!("./{}", wiki_title))
        .ok()
        .map(|u| u.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for a MediaWiki `api.php` endpoint.
///
/// Cheap to clone: the underlying reqwest client is reference counted.
#[derive(Clone)]
pub struct WikiApiClient {
    client: reqwest::Client,
    api_url: String,
    thumbnail_size: u32,
}

impl WikiApiClient {
    pub fn new(config: &SearchConfig) -> RemoteResult<Self> {
        // Per-call timeouts are applied by the paging source; this is a backstop.
        let backstop = Duration::from_millis(config.search_timeout_ms.max(config.extract_timeout_ms) * 2);
        let client = reqwest::Client::builder()
            .timeout(backstop)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            thumbnail_size: config.thumbnail_size,
        })
    }

    async fn get(&self, params: &[(&str, String)]) -> RemoteResult<String> {
        let response = self.client.get(&self.api_url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl RemoteSearchApi for WikiApiClient {
    async fn search(&self, query: &str, limit: u32, offset: u32) -> RemoteResult<RemoteSearchResponse> {
        let params = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
            ("generator", "search".to_string()),
            ("gsrsearch", query.to_string()),
            ("gsrlimit", limit.to_string()),
            ("gsroffset", offset.to_string()),
            ("gsrwhat", "text".to_string()),
            ("prop", "pageimages|extracts".to_string()),
            ("piprop", "thumbnail".to_string()),
            ("pithumbsize", self.thumbnail_size.to_string()),
            ("pilimit", limit.to_string()),
            ("exintro", "1".to_string()),
            ("explaintext", "1".to_string()),
            ("exsentences", EXTRACT_SENTENCES.to_string()),
            ("exlimit", "max".to_string()),
        ];
        let body = self.get(&params).await?;
        parse_search_response(&body)
    }

    async fn extract(&self, ids: &[String]) -> RemoteResult<HashMap<String, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let params = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("formatversion", "2".to_string()),
            ("prop", "extracts".to_string()),
            ("pageids", ids.join("|")),
            ("exintro", "1".to_string()),
            ("explaintext", "1".to_string()),
            ("exsentences", EXTRACT_SENTENCES.to_string()),
            ("exlimit", "max".to_string()),
        ];
        let body = self.get(&params).await?;
        parse_extract_response(&body)
    }
}

/// Articles are fetched in one `action=parse` request, so the progress
/// stream has a single download step before the payload.
#[async_trait]
impl ContentAssembler for WikiApiClient {
    fn download_priority_assets(
        &self,
        page_id: &str,
        url: &str,
    ) -> BoxStream<'static, Result<AssetProgress, AssemblyError>> {
        let client = self.clone();
        let page_id = page_id.to_string();
        let canonical_url = url.to_string();

        let fetch = async move {
            let params = [
                ("action", "parse".to_string()),
                ("format", "json".to_string()),
                ("formatversion", "2".to_string()),
                ("pageid", page_id),
                ("prop", "text|revid".to_string()),
                ("disableeditsection", "1".to_string()),
                ("disabletoc", "1".to_string()),
            ];
            let body = client
                .get(&params)
                .await
                .map_err(|e| AssemblyError::Download(e.to_string()))?;
            let page = parse_article_response(&body, &canonical_url)
                .map_err(|e| AssemblyError::Download(e.to_string()))?;
            Ok::<_, AssemblyError>(AssetProgress::Complete(page))
        };

        futures::stream::iter([Ok::<_, AssemblyError>(AssetProgress::Downloading { completed: 0, total: 1 })])
            .chain(futures::stream::once(fetch))
            .boxed()
    }

    async fn build_document(
        &self,
        title: &str,
        html_body: &str,
        theme: Theme,
        options: &RenderOptions,
    ) -> Result<String, AssemblyError> {
        Ok(render_document(title, html_body, theme, options))
    }
}
