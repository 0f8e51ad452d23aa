// src/publish/ghost.rs
//! Ghost Admin API client.
//!
//! Each request is signed with a short-lived HS256 token derived from the admin
//! key (`<id>:<hex secret>`). Transport failures before any response are retried
//! with backoff; a response of any kind is never retried, since the post may
//! already exist.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PostRequest, PublishedPost, Publisher};
use crate::error::OracleError;

const TOKEN_TTL_SECS: i64 = 5 * 60;

#[derive(Clone)]
pub struct GhostAdminKey {
    id: String,
    secret: Vec<u8>,
}

impl std::fmt::Debug for GhostAdminKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostAdminKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl GhostAdminKey {
    pub fn parse(raw: &str) -> Result<Self, OracleError> {
        let (id, secret_hex) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| OracleError::Config("GHOST_ADMIN_KEY must be <id>:<secret>".into()))?;
        if id.is_empty() {
            return Err(OracleError::Config("GHOST_ADMIN_KEY id is empty".into()));
        }
        let secret = hex::decode(secret_hex)
            .map_err(|e| OracleError::Config(format!("GHOST_ADMIN_KEY secret is not hex: {e}")))?;
        Ok(Self {
            id: id.to_string(),
            secret,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Admin token valid for five minutes from `iat`.
    pub fn token(&self, iat: i64) -> Result<String, OracleError> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.id.clone());
        let claims = AdminClaims {
            iat,
            exp: iat + TOKEN_TTL_SECS,
            aud: "/admin/".to_string(),
        };
        encode(&header, &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| OracleError::Config(format!("signing admin token: {e}")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AdminClaims {
    iat: i64,
    exp: i64,
    aud: String,
}

#[derive(Serialize)]
struct PostsEnvelope<'a> {
    posts: [&'a PostRequest; 1],
}

#[derive(Deserialize)]
struct PostsResponse {
    #[serde(default)]
    posts: Vec<CreatedPost>,
}

#[derive(Deserialize)]
struct CreatedPost {
    id: Option<String>,
    url: Option<String>,
}

pub struct GhostPublisher {
    base_url: String,
    key: Option<GhostAdminKey>,
    client: reqwest::Client,
    max_retries: u8,
}

impl GhostPublisher {
    /// `key` is `None` when no admin key is configured; every publish then fails
    /// with `OracleError::Config`.
    pub fn new(
        base_url: String,
        key: Option<GhostAdminKey>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crypto-bunker/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            key,
            client,
            max_retries: 3,
        })
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/ghost/api/admin/posts/", self.base_url)
    }
}

#[async_trait]
impl Publisher for GhostPublisher {
    async fn publish(&self, post: &PostRequest) -> Result<PublishedPost, OracleError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| OracleError::Config("GHOST_ADMIN_KEY not set".into()))?;
        if self.base_url.is_empty() {
            return Err(OracleError::Config("GHOST_URL not set".into()));
        }

        let body = PostsEnvelope { posts: [post] };
        let mut attempt: u8 = 0;
        let resp = loop {
            attempt += 1;
            let token = key.token(chrono::Utc::now().timestamp())?;
            let res = self
                .client
                .post(self.endpoint())
                .query(&[("source", "html")])
                .header("Authorization", format!("Ghost {token}"))
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) => break rsp,
                Err(e) if e.is_connect() && attempt < self.max_retries => {
                    warn!(target: "ingest", attempt, error = %e, "ghost connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let created: PostsResponse = resp.json().await?;
        let first = created.posts.into_iter().next();
        let published = PublishedPost {
            id: first.as_ref().and_then(|p| p.id.clone()),
            url: first.and_then(|p| p.url),
        };
        info!(target: "ingest", title = %post.title, url = ?published.url, "post published");
        Ok(published)
    }
}
