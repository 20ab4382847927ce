//! Configuration for the search session.
//!
//! Every field has a serde default so a partial JSON document (or none at
//! all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::{RenderOptions, Theme};

fn default_api_url() -> String {
    "https://oldschool.runescape.wiki/api.php".to_string()
}

fn default_article_base_url() -> String {
    "https://oldschool.runescape.wiki/w/".to_string()
}

fn default_user_agent() -> String {
    concat!("wikisearch/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Quiet period before a typed query is searched.
fn default_debounce_ms() -> u64 {
    300
}

fn default_page_size() -> u32 {
    20
}

fn default_search_timeout_ms() -> u64 {
    10_000
}

fn default_extract_timeout_ms() -> u64 {
    5_000
}

fn default_thumbnail_size() -> u32 {
    160
}

fn default_local_result_limit() -> usize {
    50
}

fn default_prefetch_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// MediaWiki `api.php` endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Prefix that article titles are joined onto to form page URLs.
    #[serde(default = "default_article_base_url")]
    pub article_base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Results per remote page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Timeout for the snippet fallback lookup.
    #[serde(default = "default_extract_timeout_ms")]
    pub extract_timeout_ms: u64,

    /// Thumbnail edge length requested from the API, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,

    /// Cap on title and full-text matches each.
    #[serde(default = "default_local_result_limit")]
    pub local_result_limit: usize,

    #[serde(default = "default_prefetch_enabled")]
    pub prefetch_enabled: bool,

    #[serde(default)]
    pub render_theme: Theme,

    #[serde(default)]
    pub collapse_sections: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            article_base_url: default_article_base_url(),
            user_agent: default_user_agent(),
            debounce_ms: default_debounce_ms(),
            page_size: default_page_size(),
            search_timeout_ms: default_search_timeout_ms(),
            extract_timeout_ms: default_extract_timeout_ms(),
            thumbnail_size: default_thumbnail_size(),
            local_result_limit: default_local_result_limit(),
            prefetch_enabled: default_prefetch_enabled(),
            render_theme: Theme::default(),
            collapse_sections: false,
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON, filling in defaults for missing fields.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_prefetch_enabled(mut self, enabled: bool) -> Self {
        self.prefetch_enabled = enabled;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_millis(self.extract_timeout_ms)
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions { collapse_sections: self.collapse_sections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SearchConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.page_size, 20);
        assert!(config.prefetch_enabled);
        assert_eq!(config.render_theme, Theme::Light);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SearchConfig::from_json(r#"{"page_size": 50, "render_theme": "dark"}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.render_theme, Theme::Dark);
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.api_url, default_api_url());
    }

    #[test]
    fn test_builder() {
        let config = SearchConfig::new()
            .with_page_size(0)
            .with_debounce(Duration::from_millis(50))
            .with_search_timeout(Duration::from_secs(2));
        assert_eq!(config.page_size, 1);
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.search_timeout(), Duration::from_secs(2));
    }
}
