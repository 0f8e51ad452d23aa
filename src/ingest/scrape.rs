// src/ingest/scrape.rs
//! Article text extraction.
//!
//! Pages are fetched with a desktop browser user agent; the article text is the
//! content of every `<p>` element in document order. Fetched pages can be kept in
//! an on-disk cache keyed by the SHA-256 of the URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::OracleError;
use crate::ingest::normalize_text;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static RE_PARAGRAPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p\s*>").expect("paragraph regex"));
static RE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
        .expect("noise regex")
});

#[async_trait]
pub trait ArticleScraper: Send + Sync {
    /// Article text of `url`, paragraphs separated by blank lines.
    /// A page without paragraphs yields an empty string, not an error.
    async fn scrape(&self, url: &str) -> Result<String, OracleError>;
}

/// Non-empty paragraph texts of an HTML document, in order.
pub fn extract_paragraphs(html: &str) -> Vec<String> {
    let cleaned = RE_NOISE.replace_all(html, "");
    RE_PARAGRAPH
        .captures_iter(&cleaned)
        .filter_map(|c| c.get(1))
        .map(|m| normalize_text(m.as_str()))
        .filter(|p| !p.is_empty())
        .collect()
}

/// Cache file name for `url`.
pub fn cache_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{}.html", hex::encode(digest))
}

pub struct HttpScraper {
    client: reqwest::Client,
    cache_dir: Option<PathBuf>,
}

impl HttpScraper {
    pub fn new(timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_UA)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            cache_dir: None,
        })
    }

    /// Keep fetched pages under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    async fn read_cached(&self, dir: &Path, url: &str) -> Option<String> {
        let path = dir.join(cache_key(url));
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => {
                debug!(target: "ingest", %url, "page served from cache");
                Some(s)
            }
            Err(_) => None,
        }
    }

    async fn write_cached(&self, dir: &Path, url: &str, body: &str) {
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!(target: "ingest", dir = %dir.display(), error = %e, "creating page cache dir failed");
            return;
        }
        let path = dir.join(cache_key(url));
        if let Err(e) = tokio::fs::write(&path, body).await {
            warn!(target: "ingest", path = %path.display(), error = %e, "writing page cache failed");
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, OracleError> {
        if let Some(dir) = &self.cache_dir {
            if let Some(body) = self.read_cached(dir, url).await {
                return Ok(body);
            }
        }

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Api {
                status: status.as_u16(),
                message: format!("fetching {url}"),
            });
        }
        let body = resp.text().await?;

        if let Some(dir) = &self.cache_dir {
            self.write_cached(dir, url, &body).await;
        }
        Ok(body)
    }
}

#[async_trait]
impl ArticleScraper for HttpScraper {
    async fn scrape(&self, url: &str) -> Result<String, OracleError> {
        let html = self.fetch(url).await?;
        Ok(extract_paragraphs(&html).join("\n\n"))
    }
}
