// src/publish/mod.rs
pub mod ghost;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::OracleError;

pub use ghost::{GhostAdminKey, GhostPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Published,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Members,
}

/// One post as sent to the publishing API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRequest {
    pub title: String,
    pub html: String,
    pub feature_image: Option<String>,
    pub featured: bool,
    pub status: PostStatus,
    pub visibility: Visibility,
}

impl PostRequest {
    /// Regular news item: published, public, not featured.
    pub fn standard(title: String, html: String, feature_image: Option<String>) -> Self {
        Self {
            title,
            html,
            feature_image,
            featured: false,
            status: PostStatus::Published,
            visibility: Visibility::Public,
        }
    }

    /// Periodic report: same policy, but featured.
    pub fn featured(title: String, html: String, feature_image: Option<String>) -> Self {
        Self {
            featured: true,
            ..Self::standard(title, html, feature_image)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub id: Option<String>,
    pub url: Option<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, post: &PostRequest) -> Result<PublishedPost, OracleError>;
}

/// Append the source link to a paraphrased body.
pub fn with_attribution(body: &str, url: &str) -> String {
    format!(
        "{body}<br><br><a href='{}'>Source</a>",
        html_escape::encode_single_quoted_attribute(url)
    )
}
