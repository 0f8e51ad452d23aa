// src/ingest/rss.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::histogram;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::OracleError;
use crate::ingest::normalize_text;
use crate::ingest::types::{FeedBatch, FeedItem, FeedSource};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

/// Host part of a URL, used when a feed has no channel title.
fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

pub struct RssFeed {
    name: String,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeed {
    /// Serve a fixed document; `name` stands in for the feed URL.
    pub fn from_fixture_str(name: &str, xml: &str) -> Self {
        Self {
            name: name.to_string(),
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crypto-bunker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: url.to_string(),
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        })
    }

    fn parse_items_from_str(&self, s: &str) -> Result<FeedBatch, OracleError> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);
        let rss: Rss = from_str(&xml_clean).map_err(|e| {
            OracleError::malformed("rss", format!("{}: {e}", self.name))
        })?;

        let source_name = rss
            .channel
            .title
            .as_deref()
            .map(normalize_text)
            .filter(|t| !t.is_empty())
            .or_else(|| host_of(&self.name))
            .unwrap_or_else(|| self.name.clone());

        let mut items = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let Some(link) = it.link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()) else {
                continue;
            };
            items.push(FeedItem {
                title: normalize_text(it.title.as_deref().unwrap_or_default()),
                link,
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            });
        }

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(FeedBatch { source_name, items })
    }
}

#[async_trait]
impl FeedSource for RssFeed {
    async fn fetch_latest(&self) -> Result<FeedBatch, OracleError> {
        match &self.mode {
            Mode::Fixture(s) => self.parse_items_from_str(s),
            Mode::Http { url, client } => {
                let resp = client.get(url).send().await.map_err(|e| {
                    tracing::debug!(target: "ingest", error = ?e, feed = %url, "feed http error");
                    OracleError::from(e)
                })?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(OracleError::Api {
                        status: status.as_u16(),
                        message: format!("feed {url}"),
                    });
                }
                let body = resp.text().await?;
                self.parse_items_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Replace HTML-only entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&hellip;", "...")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2822_dates() {
        let dt = parse_rfc2822("Tue, 05 Mar 2024 14:30:00 +0000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-05T14:30:00+00:00");
        let shifted = parse_rfc2822("Tue, 05 Mar 2024 16:30:00 +0200").unwrap();
        assert_eq!(dt, shifted);
        assert!(parse_rfc2822("yesterday").is_none());
    }

    #[test]
    fn host_fallback() {
        assert_eq!(host_of("https://www.coindesk.com/feed").as_deref(), Some("coindesk.com"));
        assert_eq!(host_of("not a url"), None);
    }
}
