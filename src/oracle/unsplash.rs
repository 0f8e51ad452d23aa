// src/oracle/unsplash.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::ImageOracle;
use crate::error::OracleError;

const UNSPLASH_RANDOM_URL: &str = "https://api.unsplash.com/photos/random";

/// Random photo lookup. Requires `UNSPLASH_ACCESS_KEY`.
pub struct UnsplashClient {
    http: reqwest::Client,
    access_key: String,
    base_url: String,
}

impl UnsplashClient {
    pub fn new(access_key: String, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("crypto-bunker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            access_key,
            base_url: UNSPLASH_RANDOM_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct RandomPhoto {
    urls: PhotoUrls,
}

#[derive(Deserialize)]
struct PhotoUrls {
    small: Option<String>,
    regular: Option<String>,
}

#[async_trait]
impl ImageOracle for UnsplashClient {
    async fn image_url(&self, query: &str) -> Result<String, OracleError> {
        if self.access_key.is_empty() {
            return Err(OracleError::Config("UNSPLASH_ACCESS_KEY not set".into()));
        }

        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("query", query)])
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .header("Accept-Version", "v1")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let photo: RandomPhoto = resp.json().await?;
        photo
            .urls
            .small
            .or(photo.urls.regular)
            .filter(|u| !u.is_empty())
            .ok_or(OracleError::Empty("image"))
    }
}
